//! Typing engine: the single worker that owns the playback machine.
//!
//! Commands from the bus, scheduler deadlines and bursts are all handled on
//! one thread, so nothing else ever mutates the session. The worker waits on
//! its command subscription with the scheduler's remaining delay as timeout:
//! a command arriving mid-delay is handled before the next token.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bus::{Bus, Command, Event, Message, RecvError, Subscription, Topic};
use crate::focus::{WindowHandle, WindowLens};
use crate::input::InputSimulator;
use crate::playback::{ConfigStore, Effect, EmitMode, PlaybackConfig, PlaybackMachine};
use crate::timing::{Clock, DelayModel, Scheduler};

/// Whether the worker keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Engine {
    machine: PlaybackMachine,
    scheduler: Scheduler,
    simulator: Box<dyn InputSimulator>,
    lens: Arc<dyn WindowLens>,
    config: ConfigStore,
    bus: Arc<dyn Bus>,
    target: Option<WindowHandle>,
    /// Capture the focused window just before the next scheduled token.
    capture_pending: bool,
}

impl Engine {
    pub fn new(
        bus: Arc<dyn Bus>,
        simulator: Box<dyn InputSimulator>,
        lens: Arc<dyn WindowLens>,
        config: ConfigStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let delays = DelayModel::new(config.snapshot().seed);
        Self {
            machine: PlaybackMachine::new(),
            scheduler: Scheduler::new(clock, delays),
            simulator,
            lens,
            config,
            bus,
            target: None,
            capture_pending: false,
        }
    }

    pub fn machine(&self) -> &PlaybackMachine {
        &self.machine
    }

    /// Window captured at the last session start.
    pub fn target(&self) -> Option<WindowHandle> {
        self.target
    }

    /// Apply one command.
    pub fn handle(&mut self, command: Command) -> Flow {
        debug!(command = command.name(), "command received");
        match &command {
            Command::Shutdown => {
                info!("shutdown requested");
                self.scheduler.disarm();
                return Flow::Exit;
            }
            Command::SetConfig { config } => {
                info!("configuration replaced");
                if config.seed != self.config.snapshot().seed {
                    debug!(seed = ?config.seed, "reseeding delay model");
                    self.scheduler.set_delays(DelayModel::new(config.seed));
                }
                self.config.replace(PlaybackConfig::clone(config));
                return Flow::Continue;
            }
            Command::Load { .. } | Command::LoadText { .. } | Command::Reload => {
                self.target = None;
                self.capture_pending = false;
            }
            _ => {}
        }

        let config = self.config.snapshot();
        match self.machine.apply(&command, &config) {
            Effect::None | Effect::BurstStarted => {}
            Effect::SessionStarted => {
                self.capture_pending = true;
                self.scheduler.arm_in(config.start_delay());
            }
            Effect::Resumed { refocus } => match self.target.filter(|_| refocus) {
                Some(target) => {
                    let focused = self.lens.request_focus(target);
                    debug!(%target, focused, "refocused target before resuming");
                    self.scheduler.arm_in(config.refocus_settle());
                }
                None => self.scheduler.arm_now(),
            },
            Effect::EmitNow => self.emit(EmitMode::Single, &config),
        }

        if !self.machine.is_playing() {
            self.scheduler.disarm();
        }
        self.flush();
        Flow::Continue
    }

    /// Do whatever is due now. Returns how long the worker may wait for
    /// the next command, or `None` to wait indefinitely.
    pub fn poll(&mut self) -> Option<Duration> {
        if self.machine.in_burst() {
            let config = self.config.snapshot();
            self.emit(EmitMode::Burst, &config);
            return Some(Duration::ZERO);
        }

        if !self.machine.is_playing() {
            self.scheduler.disarm();
            return None;
        }
        self.scheduler.ensure_armed();
        if !self.scheduler.is_due() {
            return self.scheduler.time_until_due();
        }

        if self.capture_pending {
            self.capture_target();
        }
        let config = self.config.snapshot();
        self.emit(EmitMode::Scheduled, &config);
        self.scheduler.time_until_due()
    }

    /// Drive the engine from `commands` until Shutdown or the bus closes.
    pub fn run(mut self, commands: Subscription) {
        info!("typing engine running");
        loop {
            for command in commands.drain().into_iter().filter_map(|(_, m)| m.into_command()) {
                if self.handle(command) == Flow::Exit {
                    return;
                }
            }

            let received = match self.poll() {
                Some(wait) if wait.is_zero() => commands.poll().ok_or(RecvError::Timeout),
                Some(wait) => commands.recv_timeout(wait),
                None => commands.recv(),
            };

            match received {
                Ok((_, message)) => {
                    if let Some(command) = message.into_command() {
                        if self.handle(command) == Flow::Exit {
                            return;
                        }
                    }
                }
                Err(RecvError::Timeout) => {}
                Err(RecvError::Closed) => {
                    warn!("command bus closed; engine exiting");
                    return;
                }
            }
        }
    }

    fn emit(&mut self, mode: EmitMode, config: &PlaybackConfig) {
        let emitted = self
            .machine
            .emit_next(self.simulator.as_mut(), config, mode);

        if let (Some(token), EmitMode::Scheduled) = (emitted, mode) {
            if self.machine.is_playing() {
                self.scheduler.after_emission(&token, config);
            }
        }
        if !self.machine.is_playing() {
            self.scheduler.disarm();
        }
        self.flush();
    }

    fn capture_target(&mut self) {
        self.capture_pending = false;
        match self.lens.current_focused_window() {
            Some(handle) => {
                info!(%handle, "target window captured");
                self.target = Some(handle);
                self.bus
                    .publish(Topic::Events, Message::Event(Event::TargetWindow { handle }));
            }
            None => debug!("no focused window to capture"),
        }
    }

    fn flush(&mut self) {
        for event in self.machine.drain_events() {
            self.bus.publish(Topic::Events, Message::Event(event));
        }
    }
}
