use council_core::{OrchestrationError, Role};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sliding-window rate limiter keyed on (principal, role).
///
/// Counters are process-wide; increment-and-read happens atomically under
/// one lock and expired entries decay lazily on read. Per-role defaults:
/// demo 3/h, authenticated 100/h, admin 1000/h.
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, Role), VecDeque<Instant>>>,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(3600))
    }

    /// Shorter windows are used by tests; production keeps one hour.
    pub fn with_window(window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Record one operation for the principal, failing with `RateLimited`
    /// and a `retry_after` hint when the window is full.
    pub fn check_and_record(&self, principal: &str, role: Role) -> Result<(), OrchestrationError> {
        let limit = role.hourly_limit() as usize;
        let now = Instant::now();

        let mut windows = self.windows.lock();
        let entries = windows
            .entry((principal.to_string(), role))
            .or_insert_with(VecDeque::new);

        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= limit {
            let oldest = entries
                .front()
                .copied()
                .unwrap_or(now);
            let retry_after = self
                .window
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1);
            warn!(
                principal,
                role = %role,
                limit,
                retry_after,
                "rate limit exceeded"
            );
            return Err(OrchestrationError::RateLimited { retry_after });
        }

        entries.push_back(now);
        debug!(principal, role = %role, used = entries.len(), limit, "rate limit check passed");
        Ok(())
    }

    /// Operations left in the current window for the principal.
    pub fn remaining(&self, principal: &str, role: Role) -> u32 {
        let limit = role.hourly_limit();
        let now = Instant::now();

        let mut windows = self.windows.lock();
        let Some(entries) = windows.get_mut(&(principal.to_string(), role)) else {
            return limit;
        };
        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }
        limit.saturating_sub(entries.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_limit_is_three_per_window() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check_and_record("d1", Role::Demo).is_ok());
        }
        let err = limiter.check_and_record("d1", Role::Demo).unwrap_err();
        match err {
            OrchestrationError::RateLimited { retry_after } => {
                assert!(retry_after > 0 && retry_after <= 3600);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn principals_are_isolated() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            limiter.check_and_record("d1", Role::Demo).unwrap();
        }
        assert!(limiter.check_and_record("d2", Role::Demo).is_ok());
    }

    #[test]
    fn window_expiry_frees_slots() {
        let limiter = RateLimiter::with_window(Duration::from_millis(50));
        for _ in 0..3 {
            limiter.check_and_record("d1", Role::Demo).unwrap();
        }
        assert!(limiter.check_and_record("d1", Role::Demo).is_err());
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check_and_record("d1", Role::Demo).is_ok());
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.remaining("a", Role::Demo), 3);
        limiter.check_and_record("a", Role::Demo).unwrap();
        assert_eq!(limiter.remaining("a", Role::Demo), 2);
    }
}
