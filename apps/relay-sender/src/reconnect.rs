//! Bounded reconnection bookkeeping for the frame stream.
//!
//! Every failure (a send or a reconnect) asks the tracker what to do next.
//! Up to `max_attempts` reconnects are allowed between two successes; the
//! next failure after that is terminal. Any success clears the count.
//! A refused admission is not a failure this policy handles: it ends the
//! stream at once.

use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    /// Pause after a reconnect that failed.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Reconnect { attempt: u32 },
    GiveUp { attempts: u32 },
}

#[derive(Debug)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// True once the next failure would be terminal.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn record_success(&mut self) {
        self.attempts = 0;
    }

    pub fn on_failure(&mut self) -> NextStep {
        if self.attempts >= self.policy.max_attempts {
            return NextStep::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        NextStep::Reconnect {
            attempt: self.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(max_attempts: u32) -> ReconnectTracker {
        ReconnectTracker::new(ReconnectPolicy {
            max_attempts,
            delay: Duration::ZERO,
        })
    }

    #[test_timeout::timeout]
    fn gives_up_on_the_failure_after_the_bound() {
        let mut tracker = tracker(3);
        assert_eq!(tracker.on_failure(), NextStep::Reconnect { attempt: 1 });
        assert_eq!(tracker.on_failure(), NextStep::Reconnect { attempt: 2 });
        assert!(!tracker.is_exhausted());
        assert_eq!(tracker.on_failure(), NextStep::Reconnect { attempt: 3 });
        assert!(tracker.is_exhausted());
        assert_eq!(tracker.on_failure(), NextStep::GiveUp { attempts: 3 });
    }

    #[test_timeout::timeout]
    fn success_resets_the_count() {
        let mut tracker = tracker(3);
        tracker.on_failure();
        tracker.on_failure();
        tracker.record_success();
        assert!(!tracker.is_exhausted());
        assert_eq!(tracker.on_failure(), NextStep::Reconnect { attempt: 1 });
    }

    #[test_timeout::timeout]
    fn zero_bound_gives_up_immediately() {
        let mut tracker = tracker(0);
        assert_eq!(tracker.on_failure(), NextStep::GiveUp { attempts: 0 });
    }

    #[test_timeout::timeout]
    fn default_policy_allows_three_attempts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }
}
