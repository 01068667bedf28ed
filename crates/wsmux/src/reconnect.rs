//! Fixed-interval, bounded reconnection policy
//!
//! After an unplanned close the policy asks for a periodic timer. Each tick
//! while still disconnected is one attempt. Once the configured number of
//! attempts has been made the timer is stopped, and if the final attempt
//! fails too the policy gives up until the next explicit connect.
//!
//! ```text
//!   Idle --unplanned close--> Scheduled --tick (last)--> FinalAttempt
//!    ^                          |  ^                        |
//!    |<------open / cancel------+  +-- tick (more left)     +--close--> Exhausted
//! ```

use crate::config::ReconnectConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::*;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    state: PolicyState,
    attempts: u32,
    stats: ReconnectStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyState {
    /// No reconnect pending
    Idle,
    /// Timer running, attempts remain
    Scheduled,
    /// Timer stopped, last attempt in flight
    FinalAttempt,
    /// Gave up; only an explicit connect resets this
    Exhausted,
}

/// Counters for reconnect activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectStats {
    /// Reconnect attempts made
    pub total_attempts: u64,
    /// Schedules that ended with an open connection
    pub successful_reconnections: u64,
    /// Schedules that ran out of attempts
    pub exhaustions: u64,
    /// Most attempts any single schedule needed
    pub max_consecutive_failures: u32,
}

/// How to react to an unplanned close
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReaction {
    /// Start the periodic timer
    Schedule { interval: Duration },
    /// An attempt failed and the timer keeps running
    Retry { attempt: u32 },
    /// No attempts left
    GiveUp { reason: GiveUpReason },
    /// Already given up
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Reconnection disabled by configuration
    Disabled,
    /// Every allowed attempt failed
    AttemptsExhausted { attempts: u32 },
}

/// What a timer tick means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Connect again; `last` means the timer must be stopped
    Attempt {
        attempt: u32,
        max_attempts: u32,
        last: bool,
    },
    /// Nothing to do on this tick
    Skip,
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiveUpReason::Disabled => write!(f, "reconnection disabled"),
            GiveUpReason::AttemptsExhausted { attempts } => {
                write!(f, "all {attempts} reconnect attempts failed")
            }
        }
    }
}

impl GiveUpReason {
    pub fn attempts(&self) -> u32 {
        match self {
            GiveUpReason::Disabled => 0,
            GiveUpReason::AttemptsExhausted { attempts } => *attempts,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: PolicyState::Idle,
            attempts: 0,
            stats: ReconnectStats::default(),
        }
    }

    pub fn state(&self) -> PolicyState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn on_unplanned_close(&mut self) -> CloseReaction {
        match self.state {
            PolicyState::Idle if self.config.max_attempts == 0 => {
                self.state = PolicyState::Exhausted;
                CloseReaction::GiveUp {
                    reason: GiveUpReason::Disabled,
                }
            }
            PolicyState::Idle => {
                self.state = PolicyState::Scheduled;
                self.attempts = 0;
                info!(
                    "Reconnecting every {:?}, up to {} attempts",
                    self.config.interval(),
                    self.config.max_attempts
                );
                CloseReaction::Schedule {
                    interval: self.config.interval(),
                }
            }
            PolicyState::Scheduled => CloseReaction::Retry {
                attempt: self.attempts,
            },
            PolicyState::FinalAttempt => {
                self.state = PolicyState::Exhausted;
                self.stats.exhaustions += 1;
                self.record_failures();
                let reason = GiveUpReason::AttemptsExhausted {
                    attempts: self.attempts,
                };
                error!("Giving up on reconnection: {reason}");
                CloseReaction::GiveUp { reason }
            }
            PolicyState::Exhausted => CloseReaction::Ignored,
        }
    }

    pub fn on_tick(&mut self, connected: bool) -> ReconnectDecision {
        if self.state != PolicyState::Scheduled || connected {
            return ReconnectDecision::Skip;
        }

        self.attempts += 1;
        self.stats.total_attempts += 1;
        let last = self.attempts >= self.config.max_attempts;
        if last {
            self.state = PolicyState::FinalAttempt;
        }

        debug!(
            "Reconnect attempt {}/{}",
            self.attempts, self.config.max_attempts
        );
        ReconnectDecision::Attempt {
            attempt: self.attempts,
            max_attempts: self.config.max_attempts,
            last,
        }
    }

    /// Connection opened. Returns whether the timer was running.
    pub fn on_open(&mut self) -> bool {
        if matches!(self.state, PolicyState::Scheduled | PolicyState::FinalAttempt) {
            self.stats.successful_reconnections += 1;
            self.record_failures();
            info!("Reconnected after {} attempts", self.attempts);
        }
        self.reset()
    }

    /// Explicit connect or disconnect. Returns whether the timer was running.
    pub fn cancel(&mut self) -> bool {
        self.reset()
    }

    fn reset(&mut self) -> bool {
        let timer_running = self.state == PolicyState::Scheduled;
        self.state = PolicyState::Idle;
        self.attempts = 0;
        timer_running
    }

    fn record_failures(&mut self) {
        self.stats.max_consecutive_failures = self.stats.max_consecutive_failures.max(self.attempts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig::new(Duration::from_millis(100), max_attempts))
    }

    #[test]
    fn test_runs_exactly_max_attempts_then_gives_up() {
        let mut policy = policy(3);
        assert_eq!(
            policy.on_unplanned_close(),
            CloseReaction::Schedule {
                interval: Duration::from_millis(100)
            }
        );

        for attempt in 1..=3 {
            assert_eq!(
                policy.on_tick(false),
                ReconnectDecision::Attempt {
                    attempt,
                    max_attempts: 3,
                    last: attempt == 3,
                }
            );
            if attempt < 3 {
                assert_eq!(policy.on_unplanned_close(), CloseReaction::Retry { attempt });
            }
        }

        assert_eq!(policy.on_tick(false), ReconnectDecision::Skip);
        assert_eq!(
            policy.on_unplanned_close(),
            CloseReaction::GiveUp {
                reason: GiveUpReason::AttemptsExhausted { attempts: 3 }
            }
        );
        assert_eq!(policy.state(), PolicyState::Exhausted);
        assert_eq!(policy.on_unplanned_close(), CloseReaction::Ignored);
        assert_eq!(policy.on_tick(false), ReconnectDecision::Skip);
        assert_eq!(policy.stats().total_attempts, 3);
        assert_eq!(policy.stats().exhaustions, 1);
    }

    #[test]
    fn test_zero_attempts_disables_reconnection() {
        let mut policy = policy(0);
        assert_eq!(
            policy.on_unplanned_close(),
            CloseReaction::GiveUp {
                reason: GiveUpReason::Disabled
            }
        );
        assert_eq!(policy.on_tick(false), ReconnectDecision::Skip);
    }

    #[test]
    fn test_tick_while_connected_is_skipped() {
        let mut policy = policy(2);
        policy.on_unplanned_close();
        assert_eq!(policy.on_tick(true), ReconnectDecision::Skip);
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn test_open_resets_and_reports_running_timer() {
        let mut policy = policy(5);
        policy.on_unplanned_close();
        policy.on_tick(false);
        policy.on_tick(false);

        assert!(policy.on_open());
        assert_eq!(policy.state(), PolicyState::Idle);
        assert_eq!(policy.stats().successful_reconnections, 1);
        assert_eq!(policy.stats().max_consecutive_failures, 2);

        // a later drop starts a fresh schedule
        assert!(matches!(
            policy.on_unplanned_close(),
            CloseReaction::Schedule { .. }
        ));
    }

    #[test]
    fn test_open_during_final_attempt_needs_no_timer_stop() {
        let mut policy = policy(1);
        policy.on_unplanned_close();
        policy.on_tick(false);
        assert_eq!(policy.state(), PolicyState::FinalAttempt);
        assert!(!policy.on_open());
    }

    #[test]
    fn test_cancel_clears_exhaustion() {
        let mut policy = policy(1);
        policy.on_unplanned_close();
        policy.on_tick(false);
        policy.on_unplanned_close();
        assert_eq!(policy.state(), PolicyState::Exhausted);

        assert!(!policy.cancel());
        assert!(matches!(
            policy.on_unplanned_close(),
            CloseReaction::Schedule { .. }
        ));
    }
}
