//! Shared reconnect/backoff policy.
//!
//! A [`ReconnectPolicy`] is plain configuration; each consumer (every sensor
//! service, the vehicle link, the gamepad poller) owns its own [`Backoff`]
//! built from it, asks [`Backoff::try_begin`] before every attempt and
//! reports the outcome with [`Backoff::record_failure`] or
//! [`Backoff::record_success`].
//!
//! ```
//! use std::time::Duration;
//! use rover_kernel::reconnect::ReconnectPolicy;
//!
//! let mut backoff = ReconnectPolicy::fixed(Duration::from_millis(2000)).backoff();
//! assert!(backoff.try_begin(0));
//! backoff.record_failure(0);
//! assert!(!backoff.ready(1999));
//! assert!(!backoff.try_begin(1999));
//! assert!(backoff.try_begin(2000));
//! ```

use std::time::Duration;

/// Retry schedule: the first retry waits `initial`, each further failure
/// multiplies the wait by `multiplier`, capped at `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl ReconnectPolicy {
    /// At most one attempt per `window`.
    pub fn fixed(window: Duration) -> Self {
        Self {
            initial: window,
            max: window,
            multiplier: 1.0,
        }
    }

    /// Doubling backoff from `initial` up to `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: 2.0,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial_ms: duration_ms(self.initial),
            max_ms: duration_ms(self.max).max(duration_ms(self.initial)),
            multiplier: if self.multiplier.is_finite() { self.multiplier.max(1.0) } else { 1.0 },
            delay_ms: duration_ms(self.initial),
            next_attempt_ms: None,
            failures: 0,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Per-consumer backoff state.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    delay_ms: u64,
    next_attempt_ms: Option<u64>,
    failures: u32,
}

impl Backoff {
    /// Whether an attempt may start at `now_ms`.
    pub fn ready(&self, now_ms: u64) -> bool {
        self.next_attempt_ms.is_none_or(|next| now_ms >= next)
    }

    /// Claim the current window. Returns `true` (and closes the window until
    /// `now_ms + delay`) if an attempt may start now.
    pub fn try_begin(&mut self, now_ms: u64) -> bool {
        if !self.ready(now_ms) {
            return false;
        }
        self.next_attempt_ms = Some(now_ms.saturating_add(self.delay_ms));
        true
    }

    /// The attempt at `now_ms` failed: no retry before `now_ms + delay`,
    /// and the window after that one is widened.
    pub fn record_failure(&mut self, now_ms: u64) {
        self.failures = self.failures.saturating_add(1);
        self.next_attempt_ms = Some(now_ms.saturating_add(self.delay_ms));
        let grown = (self.delay_ms as f64 * self.multiplier).round();
        self.delay_ms = if grown >= self.max_ms as f64 {
            self.max_ms
        } else {
            grown as u64
        };
    }

    /// The attempt succeeded: the next outage may retry immediately.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.delay_ms = self.initial_ms;
        self.next_attempt_ms = None;
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Wait applied to the next window.
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
