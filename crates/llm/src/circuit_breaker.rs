use chrono::Utc;
use council_core::{BreakerRecord, BreakerState, ProviderKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Cooldown before the first recovery probe.
    pub initial_backoff: Duration,
    /// Backoff ceiling; doubling stops here.
    pub max_backoff: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Per-provider failure guard.
///
/// CLOSED passes all calls and counts consecutive failures. OPEN fast-fails
/// until the probe time, then HALF_OPEN admits exactly one call: success
/// closes the breaker and resets the backoff, failure reopens it with the
/// backoff doubled (capped).
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    current_backoff: Duration,
    opened_at: Option<Instant>,
    next_probe_at: Option<Instant>,
    probe_in_flight: bool,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            current_backoff: config.initial_backoff,
            opened_at: None,
            next_probe_at: None,
            probe_in_flight: false,
            config,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether a dispatch would currently be admitted, without consuming
    /// the half-open probe slot. Used for routing candidate filtering.
    pub fn is_dispatchable(&self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => self
                .next_probe_at
                .map(|probe| Instant::now() >= probe)
                .unwrap_or(true),
            BreakerState::HalfOpen => !self.probe_in_flight,
        }
    }

    /// Admit or refuse a call. OPEN transitions to HALF_OPEN once the
    /// probe time is reached; HALF_OPEN admits a single in-flight probe.
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let due = self
                    .next_probe_at
                    .map(|probe| Instant::now() >= probe)
                    .unwrap_or(true);
                if due {
                    info!(state = %self.state, "circuit breaker moving to HALF_OPEN for probe");
                    self.state = BreakerState::HalfOpen;
                    self.probe_in_flight = true;
                    true
                } else {
                    debug!("circuit breaker OPEN, refusing call");
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    debug!("circuit breaker HALF_OPEN, probe already in flight");
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Success anywhere resets the failure counter and backoff.
    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            info!(failures = self.consecutive_failures, "circuit breaker recovered, CLOSED");
        } else if self.consecutive_failures > 0 {
            debug!(
                failures = self.consecutive_failures,
                "circuit breaker resetting failure count"
            );
        }
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.current_backoff = self.config.initial_backoff;
        self.opened_at = None;
        self.next_probe_at = None;
        self.probe_in_flight = false;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;

        match self.state {
            BreakerState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = self.consecutive_failures,
                        backoff_secs = self.current_backoff.as_secs(),
                        "circuit breaker OPENING"
                    );
                    self.open_with_current_backoff();
                } else {
                    debug!(
                        failures = self.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker failure recorded"
                    );
                }
            }
            BreakerState::HalfOpen => {
                self.current_backoff =
                    (self.current_backoff * 2).min(self.config.max_backoff);
                warn!(
                    backoff_secs = self.current_backoff.as_secs(),
                    "circuit breaker probe failed, back to OPEN"
                );
                self.open_with_current_backoff();
            }
            BreakerState::Open => {
                debug!("circuit breaker failure while OPEN");
            }
        }
    }

    fn open_with_current_backoff(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.next_probe_at = Some(Instant::now() + self.current_backoff);
        self.probe_in_flight = false;
    }

    /// Observable snapshot with wall-clock timestamps.
    pub fn record(&self, provider: ProviderKind) -> BreakerRecord {
        let now = Instant::now();
        let to_utc = |at: Instant| {
            if at >= now {
                Utc::now() + chrono::Duration::from_std(at - now).unwrap_or_else(|_| chrono::Duration::zero())
            } else {
                Utc::now() - chrono::Duration::from_std(now - at).unwrap_or_else(|_| chrono::Duration::zero())
            }
        };
        BreakerRecord {
            provider,
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            opened_at: self.opened_at.map(to_utc),
            next_probe_at: self.next_probe_at.map(to_utc),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

/// Shared board of one breaker per provider. Transitions are atomic under
/// the board lock; observers see pre- or post-transition state only.
pub struct BreakerBoard {
    breakers: Mutex<HashMap<ProviderKind, CircuitBreaker>>,
    config: BreakerConfig,
}

impl BreakerBoard {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn is_dispatchable(&self, provider: ProviderKind) -> bool {
        let breakers = self.breakers.lock();
        breakers
            .get(&provider)
            .map(|b| b.is_dispatchable())
            .unwrap_or(true)
    }

    pub fn try_acquire(&self, provider: ProviderKind) -> bool {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(provider)
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .try_acquire()
    }

    pub fn record_success(&self, provider: ProviderKind) {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(provider)
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .record_success();
    }

    pub fn record_failure(&self, provider: ProviderKind) {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(provider)
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .record_failure();
    }

    pub fn state(&self, provider: ProviderKind) -> BreakerState {
        let breakers = self.breakers.lock();
        breakers
            .get(&provider)
            .map(|b| b.state())
            .unwrap_or(BreakerState::Closed)
    }

    pub fn snapshots(&self) -> Vec<BreakerRecord> {
        let breakers = self.breakers.lock();
        breakers
            .iter()
            .map(|(provider, breaker)| breaker.record(*provider))
            .collect()
    }
}

impl Default for BreakerBoard {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
