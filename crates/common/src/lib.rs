//! Shared infrastructure for the council control plane: logging setup,
//! input validation, the sliding-window rate limiter, and the per-request
//! progress bus.

pub mod input_validation;
pub mod progress_bus;
pub mod rate_limiter;
pub mod structured_logging;

pub use input_validation::{validate_prompt, MAX_PAGE_SIZE, MAX_PROMPT_CHARS, MIN_PROMPT_CHARS};
pub use progress_bus::{ProgressBus, ProgressBusConfig};
pub use rate_limiter::RateLimiter;
pub use structured_logging::{init_logging, LogConfig};
