//! Exponential backoff with jitter.
//!
//! Used by the accept loop: transient accept failures (EMFILE, ECONNABORTED)
//! must not spin the loop or kill the server.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Calculate exponential backoff delay with jitter.
///
/// Attempt 0 is free; attempt `n` waits `base * 2^(n-1)` capped at `max`,
/// plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Consecutive-failure counter for a retrying loop.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    base_ms: u64,
    max_ms: u64,
    max_attempts: u32,
    failures: u32,
}

impl AcceptBackoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
            max_attempts: config.max_attempts,
            failures: 0,
        }
    }

    /// Record a failure. Returns the delay to wait before retrying, or
    /// `None` once the attempt budget is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.max_attempts != 0 && self.failures > self.max_attempts {
            return None;
        }
        Some(calculate_backoff(self.failures, self.base_ms, self.max_ms))
    }

    /// Reset after a successful accept.
    pub fn on_success(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
