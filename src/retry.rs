//! Retry combinators for external calls.
//!
//! Two distinct policies, applied at the call site of each network
//! operation: bounded exponential backoff for transient failures, and an
//! unbounded wait-and-retry loop reserved for rate limiting.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::BoardError;

/// Errors that may succeed on retry (network hiccups, 5xx, 429). Empty or
/// malformed responses are not transient; the caller degrades instead.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Bounded retry schedule: `base_delay`, doubling per attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            // 2s -> 4s -> 8s
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op`, retrying transient failures up to `backoff.max_attempts` total
/// attempts with exponential backoff between them. Non-transient errors and
/// the final attempt's error are returned as-is.
pub fn with_backoff<T, E, F>(backoff: &Backoff, mut op: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let attempts = backoff.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = backoff.delay_for(attempt);
                warn!(attempt, %err, ?delay, "transient failure, backing off");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run `op`, looping for as long as it reports `BoardError::RateLimited`.
///
/// The loop is deliberately unbounded: a 429 always resolves eventually and
/// the backend hints when. Every other error propagates immediately.
pub fn wait_on_rate_limit<T, F>(mut op: F) -> Result<T, BoardError>
where
    F: FnMut() -> Result<T, BoardError>,
{
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(BoardError::RateLimited { wait }) => {
                warn!(?wait, "rate limited by the job board, waiting");
                thread::sleep(wait);
            }
            Err(err) => return Err(err),
        }
    }
}
