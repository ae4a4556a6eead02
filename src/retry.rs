//! Bounded retry and readiness polling.
//!
//! Control planes and freshly scheduled workloads are eventually consistent.
//! Two primitives absorb that lag:
//!
//! - [`retry_with_interval`] re-issues the same operation a fixed number of
//!   times with a fixed pause. Used for `kubectl apply` against an API server
//!   that may still be warming up.
//! - [`poll_until_ready`] keeps invoking a check that itself blocks for a
//!   bounded time (`kubectl wait --timeout=...`) until it succeeds or an
//!   overall deadline passes.
//!
//! # Example
//!
//! ```ignore
//! use kn_quickstart::retry::{retry_with_interval, RetrySpec};
//!
//! retry_with_interval(&RetrySpec::default(), "kourier apply", || async {
//!     runner.run_checked(&apply).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::{Error, Result};

/// Fixed-interval retry configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrySpec {
    /// Total attempts, including the first. Always at least 1.
    max_attempts: u32,
    /// Pause between attempts
    interval: Duration,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(10),
        }
    }
}

impl RetrySpec {
    /// Create a spec; `max_attempts` of 0 is rejected
    pub fn new(max_attempts: u32, interval: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::validation("max attempts must be at least 1"));
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }

    /// Total attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause between attempts
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Readiness polling configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitSpec {
    /// Overall deadline for the wait
    pub timeout: Duration,
    /// Pause between checks
    pub interval: Duration,
    /// How long a single check may block
    pub per_attempt: Duration,
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            interval: Duration::from_secs(5),
            per_attempt: Duration::from_secs(60),
        }
    }
}

/// Execute an async operation up to `spec.max_attempts` times.
///
/// Sleeps `spec.interval` between attempts. Returns the first success, or
/// the error from the final attempt once all attempts are used up.
pub async fn retry_with_interval<F, Fut, T, E>(
    spec: &RetrySpec,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= spec.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = spec.interval.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(spec.interval).await;
            }
        }
    }
}

/// Poll `check` until it succeeds or `spec.timeout` elapses.
///
/// The check is always invoked at least once. On timeout the returned
/// [`Error::Timeout`] carries the last check error.
pub async fn poll_until_ready<F, Fut>(spec: &WaitSpec, description: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let start = Instant::now();

    loop {
        let last_error = match check().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let elapsed = start.elapsed();
        if elapsed + spec.interval > spec.timeout {
            return Err(Error::Timeout {
                what: description.to_string(),
                elapsed,
                last_error: last_error.to_string(),
            });
        }

        debug!(error = %last_error, "Waiting for {}...", description);
        tokio::time::sleep(spec.interval).await;
    }
}
