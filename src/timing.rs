//! Time gates used by the main loop (commit and window intervals) and the
//! backoff sleeper used by the reader loops. Both run on [tokio::time] so
//! tests can drive them under a paused clock.

use std::time::Duration;

use tokio::time::Instant;

/// A gate that becomes due once `period` has elapsed since construction or
/// the last [IntervalTracker::reset]. The commit gate and the window gate are
/// independent instances with their own periods.
#[derive(Debug)]
pub struct IntervalTracker {
    period: Duration,
    since: Instant,
}

impl IntervalTracker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            since: Instant::now(),
        }
    }

    pub fn is_due(&self) -> bool {
        self.since.elapsed() >= self.period
    }

    /// Restarts the clock.
    pub fn reset(&mut self) {
        self.since = Instant::now();
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// A backoff sleeper: each [ExponentialSleep::sleep] blocks for the current
/// delay, then grows it by `factor` up to `max`. [ExponentialSleep::reset]
/// restores the initial delay after a success. Used exclusively by the
/// reader loops to absorb transient broker failures.
#[derive(Debug)]
pub struct ExponentialSleep {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ExponentialSleep {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    /// Sleeps for the current delay, then multiplies it by the factor, capped
    /// at the maximum.
    pub async fn sleep(&mut self) {
        tokio::time::sleep(self.current).await;
        self.current = self.current.mul_f64(self.factor).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// The delay the next [ExponentialSleep::sleep] will block for.
    pub fn current(&self) -> Duration {
        self.current
    }
}
