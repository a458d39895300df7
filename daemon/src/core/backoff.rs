//! Consecutive-error tracking with exponential restart backoff.
//!
//! The daemon never exits on repeated cycle failures. Once the consecutive
//! error count reaches a threshold it sleeps for a growing delay and carries
//! on, so a transient failure storm (say, a briefly unreachable filesystem)
//! resolves itself without external supervision while the cap keeps the
//! daemon from spinning in a tight crash loop.

use std::time::Duration;

/// Immutable restart policy, from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Consecutive errors tolerated before a restart pause.
    pub error_threshold: u32,
    /// First restart delay.
    pub base_delay: Duration,
    /// Upper bound for the doubling delay.
    pub max_delay: Duration,
}

/// Mutable error/backoff state owned by the daemon loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartState {
    consecutive_errors: u32,
    next_delay: Duration,
}

impl RestartState {
    pub fn new(policy: &RestartPolicy) -> Self {
        Self {
            consecutive_errors: 0,
            next_delay: policy.base_delay,
        }
    }

    /// Record one failed cycle.
    ///
    /// Returns `Some(delay)` when the threshold is reached: the caller should
    /// sleep for `delay` and continue. The error count resets and the next
    /// delay doubles (capped at `max_delay`). Below the threshold, returns
    /// `None`.
    pub fn record_error(&mut self, policy: &RestartPolicy) -> Option<Duration> {
        self.consecutive_errors += 1;
        if self.consecutive_errors < policy.error_threshold {
            return None;
        }
        let delay = self.next_delay;
        self.next_delay = (self.next_delay * 2).min(policy.max_delay);
        self.consecutive_errors = 0;
        Some(delay)
    }

    /// Record one successful cycle: resets both the counter and the delay.
    pub fn record_success(&mut self, policy: &RestartPolicy) {
        self.consecutive_errors = 0;
        self.next_delay = policy.base_delay;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}
