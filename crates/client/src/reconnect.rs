//! Fixed-interval reconnection policy for the event channel.
//!
//! Every abnormal closure (including a connection attempt that never
//! opened) counts as one failed attempt. While the count stays within
//! [`ReconnectPolicy::max_attempts`] the channel waits
//! [`ReconnectPolicy::delay`] and tries again; past it the channel gives
//! up until the caller connects explicitly. A successful connection
//! resets the count.

use std::time::Duration;

/// Tunable parameters for the fixed-interval strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before every reconnection attempt.
    pub delay: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            max_attempts: 5,
        }
    }
}

/// What to do after a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make reconnect attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// The ceiling was exceeded; stop reconnecting.
    Exhausted { attempts: u32 },
}

/// Counts consecutive closures against a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
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

    /// Consecutive closures since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// A connection opened; start counting from zero again.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Register an abnormal closure and decide whether to retry.
    pub fn record_closure(&mut self) -> ReconnectDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts <= self.policy.max_attempts {
            ReconnectDecision::Retry {
                attempt: self.attempts,
                delay: self.policy.delay,
            }
        } else {
            ReconnectDecision::Exhausted {
                attempts: self.attempts - 1,
            }
        }
    }
}
