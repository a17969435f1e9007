// ABOUTME: Cancellable polling primitive with max attempts and optional backoff.
// ABOUTME: Generalizes fixed-interval re-fetch loops awaiting a terminal state.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::PollError;

/// Repeatedly probes for a terminal state, sleeping between attempts.
///
/// The probe reports `Ok(Some(value))` when the terminal state is reached,
/// `Ok(None)` to keep polling, and `Err` for a terminal failure. The delay
/// between attempts is fixed unless [`Poller::with_backoff`] is applied.
pub struct Poller {
    interval: Duration,
    max_attempts: u32,
    multiplier: f64,
    max_interval: Duration,
}

impl Poller {
    /// Create a poller with a fixed delay between attempts.
    ///
    /// # Arguments
    ///
    /// * `interval` - Delay between attempts.
    /// * `max_attempts` - Probe invocations before giving up.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero or `max_attempts` is zero.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        assert!(!interval.is_zero(), "interval must be positive");
        assert!(max_attempts > 0, "max_attempts must be positive");

        Self {
            interval,
            max_attempts,
            multiplier: 1.0,
            max_interval: interval,
        }
    }

    /// Grow the delay by `multiplier` after each attempt, capped at
    /// `max_interval`.
    ///
    /// # Panics
    ///
    /// Panics if `multiplier` is below 1.0 or `max_interval` is below the
    /// initial interval.
    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        assert!(multiplier >= 1.0, "multiplier must be at least 1.0");
        assert!(
            max_interval >= self.interval,
            "max_interval must not be below the initial interval"
        );

        self.multiplier = multiplier;
        self.max_interval = max_interval;
        self
    }

    /// Poll until the probe reports a terminal state.
    ///
    /// Returns `Ok(value)` on a terminal state, `Err(PollError::Probe)` if
    /// the probe fails, `Err(PollError::AttemptsExhausted)` once the attempt
    /// budget runs out, and `Err(PollError::Cancelled)` if the cancel future
    /// completes during a wait.
    ///
    /// # Arguments
    ///
    /// * `probe` - Called once per attempt.
    /// * `cancel` - Cancellation token. When this future completes, polling
    ///   stops at the next wait.
    pub async fn run<T, F, Fut, C>(&self, mut probe: F, cancel: C) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let mut delay = self.interval;
        for attempt in 1..=self.max_attempts {
            match probe().await.map_err(PollError::Probe)? {
                Some(value) => {
                    debug!(attempt, "terminal state reached");
                    return Ok(value);
                }
                None => debug!(attempt, "not terminal yet"),
            }

            // No point sleeping after the final attempt.
            if attempt == self.max_attempts {
                break;
            }

            tokio::select! {
                biased;
                () = &mut cancel => {
                    return Err(PollError::Cancelled);
                }
                () = tokio::time::sleep(delay) => {}
            }

            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * self.multiplier).min(self.max_interval.as_secs_f64()),
            );
        }

        Err(PollError::AttemptsExhausted {
            attempts: self.max_attempts,
        })
    }
}
