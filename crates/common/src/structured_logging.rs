use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration resolved at process start.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Emit one JSON object per line instead of the human format.
    pub json: bool,
    /// Overrides `RUST_LOG`; falls back to `info` when neither is set.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: None,
        }
    }
}

/// Install the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops (first subscriber wins).
pub fn init_logging(config: &LogConfig) {
    let filter = match &config.filter {
        Some(directives) => EnvFilter::new(directives.clone()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("logging already initialized, keeping existing subscriber");
    }
}
