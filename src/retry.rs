use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Bounded exponential backoff.
///
/// `max_attempts` counts every attempt, including the first one.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Add up to one `base_delay` of random jitter so many workers hitting
    /// the same outage don't retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1,
            max_delay_secs: 60,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    ///
    /// Formula: `min(base_delay * 2^(attempt-1), max_delay)`, plus
    /// `random(0..base_delay)` when jitter is enabled.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let exp_delay = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_secs);
        let jitter_ms = if self.jitter && self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs.saturating_mul(1000))
        } else {
            0
        };
        Duration::from_secs(capped).saturating_add(Duration::from_millis(jitter_ms))
    }
}

/// Run `operation` until it succeeds, the classifier aborts, attempts run
/// out, or `shutdown` is cancelled.
///
/// `operation` receives the 1-indexed attempt number. Cancellation never
/// interrupts a running attempt: it only prevents the next one, including
/// cutting short the backoff sleep in between.
///
/// Returns the first `Ok` result or the last error.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    shutdown: &CancellationToken,
    classifier: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation(attempt).await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };

        if classifier(&err) == RetryAction::Abort {
            tracing::debug!("Non-retryable error on attempt {}: {}", attempt, err);
            return Err(err);
        }
        if attempt >= total_attempts {
            return Err(err);
        }
        if shutdown.is_cancelled() {
            tracing::debug!("Shutdown requested, not retrying: {}", err);
            return Err(err);
        }

        let delay = config.delay_after_attempt(attempt);
        tracing::warn!(
            "Retryable error (attempt {}/{}), retrying in {:.1}s: {}",
            attempt,
            total_attempts,
            delay.as_secs_f64(),
            err
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                tracing::debug!("Shutdown during backoff, giving up: {}", err);
                return Err(err);
            }
        }
        attempt += 1;
    }
}
