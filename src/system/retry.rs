//! Retry middleware: bounded exponential backoff over a plain closure.
//!
//! The retry loop has no hidden state, so it composes with real and
//! dry-run workers alike: a dry-run worker's optimistic results simply
//! succeed on the first attempt and never sleep.

use crate::system::error::{Error, Result};
use std::time::{Duration, Instant};

/// Exponential backoff policy bounded by total elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Factor applied to the delay after every attempt.
    pub multiplier: u32,
    /// Ceiling on total elapsed time across all attempts.
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    /// The standard policy: one second initial delay, doubling, bounded
    /// by the given maximum duration.
    pub fn with_max_elapsed(max_elapsed: Duration) -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_elapsed,
        }
    }
}

/// Run `op` until it succeeds, retrying transient failures with
/// exponential backoff. Once sleeping again would overrun the policy's
/// deadline, the last error is returned unchanged; terminal errors are
/// returned immediately without further attempts.
pub fn retry_with_backoff<T, F>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let deadline = Instant::now() + policy.max_elapsed;
    let mut delay = policy.initial_delay;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }
                if Instant::now() + delay > deadline {
                    return Err(err);
                }
            }
        }

        std::thread::sleep(delay);
        delay *= policy.multiplier;
    }
}
