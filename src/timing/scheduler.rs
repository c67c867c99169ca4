//! Token scheduler: the single authority on when the next token is due.
//!
//! The scheduler never sleeps. It records a deadline against its [`Clock`];
//! the engine waits on its command queue until that deadline, so a Pause or
//! Stop arriving mid-delay is seen before the next emission.

use std::sync::Arc;
use std::time::Duration;

use super::clock::Clock;
use super::delay::DelayModel;
use crate::playback::PlaybackConfig;
use crate::script::Token;

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    delays: DelayModel,
    next_due: Option<Duration>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, delays: DelayModel) -> Self {
        Self {
            clock,
            delays,
            next_due: None,
        }
    }

    /// Replace the delay model, e.g. after the configured seed changed.
    pub fn set_delays(&mut self, delays: DelayModel) {
        self.delays = delays;
    }

    /// Make the next token due after `delay`.
    pub fn arm_in(&mut self, delay: Duration) {
        self.next_due = Some(self.clock.now() + delay);
    }

    pub fn arm_now(&mut self) {
        self.arm_in(Duration::ZERO);
    }

    /// Arm only if no deadline is pending.
    pub fn ensure_armed(&mut self) {
        if self.next_due.is_none() {
            self.arm_now();
        }
    }

    /// Cancel the pending deadline.
    pub fn disarm(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn is_due(&self) -> bool {
        self.next_due.is_some_and(|due| self.clock.now() >= due)
    }

    /// Time left before the deadline; `None` when disarmed.
    pub fn time_until_due(&self) -> Option<Duration> {
        self.next_due
            .map(|due| due.saturating_sub(self.clock.now()))
    }

    /// Schedule the follow-up of a token that was just emitted, using the
    /// config snapshot taken for this decision. Returns the chosen delay.
    pub fn after_emission(&mut self, token: &Token, config: &PlaybackConfig) -> Option<Duration> {
        let delay = self.delays.delay_after(token, config);
        match delay {
            Some(delay) => self.arm_in(delay),
            None => self.disarm(),
        }
        delay
    }
}
