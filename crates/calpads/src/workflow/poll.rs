//! Bounded wall-clock polling.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::Result;

/// Monotonic time source for polling loops.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

/// The real clock: `Instant` plus `thread::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How often and for how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn from_secs(interval: u64, timeout: u64) -> Self {
        Self::new(Duration::from_secs(interval), Duration::from_secs(timeout))
    }

    /// Raise the interval to at least `floor`.
    pub fn clamped(self, floor: Duration) -> Self {
        Self {
            interval: self.interval.max(floor),
            ..self
        }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::from_secs(30, 600)
    }
}

/// Result of one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    Ready(T),
    Pending,
    /// The job reached a terminal failure; stop without waiting out the timeout.
    Abandon,
}

/// Call `check` until it is ready, abandons, or the timeout has passed.
///
/// A check runs whenever elapsed time is still within `timeout`, so a
/// timeout of 12s polled every 5s checks at 0s, 5s and 10s, then gives up
/// at 15s. Timeouts and abandonment yield `Ok(None)`; only errors raised
/// by `check` itself propagate.
pub fn poll_until<T, F>(clock: &dyn Clock, options: PollOptions, mut check: F) -> Result<Option<T>>
where
    F: FnMut(u32) -> Result<PollStep<T>>,
{
    let start = clock.elapsed();
    let mut attempt = 0u32;

    loop {
        let waited = clock.elapsed().saturating_sub(start);
        if waited > options.timeout {
            info!(?waited, attempts = attempt, "polling timed out");
            return Ok(None);
        }

        attempt += 1;
        match check(attempt)? {
            PollStep::Ready(value) => {
                debug!(attempt, ?waited, "poll target ready");
                return Ok(Some(value));
            }
            PollStep::Abandon => {
                info!(attempt, "poll target failed");
                return Ok(None);
            }
            PollStep::Pending => debug!(attempt, ?waited, "still pending"),
        }

        clock.sleep(options.interval);
    }
}
