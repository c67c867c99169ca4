//! Focus Guard: turns focus changes of the target window into
//! `FocusLost` / `FocusRegained` commands on the bus.
//!
//! The guard never touches the playback session. It watches `events` for
//! the target handle and the run state, polls a [`WindowLens`], and
//! publishes on the `focus` topic like any other operator.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bus::{Bus, Command, Event, Message, RecvError, Topic};
use crate::playback::{ConfigStore, RunState};

/// Opaque OS window identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Window/focus queries against the OS.
pub trait WindowLens: Send + Sync {
    fn current_focused_window(&self) -> Option<WindowHandle>;
    /// Ask the OS to bring `handle` to the foreground.
    fn request_focus(&self, handle: WindowHandle) -> bool;
}

/// Lens for platforms without window queries: nothing is ever focused, so
/// no target is captured and the guard stays idle.
#[derive(Debug, Default)]
pub struct NullLens;

impl WindowLens for NullLens {
    fn current_focused_window(&self) -> Option<WindowHandle> {
        None
    }

    fn request_focus(&self, _handle: WindowHandle) -> bool {
        false
    }
}

/// Lens whose focused window is set by hand.
#[derive(Debug, Default)]
pub struct ManualLens {
    focused: Mutex<Option<WindowHandle>>,
    requests: Mutex<Vec<WindowHandle>>,
}

impl ManualLens {
    pub fn new(focused: Option<WindowHandle>) -> Self {
        Self {
            focused: Mutex::new(focused),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_focused(&self, handle: Option<WindowHandle>) {
        *self.focused.lock().unwrap_or_else(|e| e.into_inner()) = handle;
    }

    /// Handles passed to `request_focus`, oldest first.
    pub fn focus_requests(&self) -> Vec<WindowHandle> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl WindowLens for ManualLens {
    fn current_focused_window(&self) -> Option<WindowHandle> {
        *self.focused.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn request_focus(&self, handle: WindowHandle) -> bool {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
        self.set_focused(Some(handle));
        true
    }
}

/// Edge detector for target focus.
pub struct FocusGuard {
    lens: Arc<dyn WindowLens>,
    config: ConfigStore,
    target: Option<WindowHandle>,
    state: RunState,
    /// A FocusLost is outstanding with no FocusRegained yet.
    lost_sent: bool,
}

impl FocusGuard {
    pub fn new(lens: Arc<dyn WindowLens>, config: ConfigStore) -> Self {
        Self {
            lens,
            config,
            target: None,
            state: RunState::Stopped,
            lost_sent: false,
        }
    }

    pub fn target(&self) -> Option<WindowHandle> {
        self.target
    }

    /// Track target and run state from an engine event.
    pub fn observe(&mut self, event: &Event) {
        match event {
            Event::TargetWindow { handle } => {
                self.target = Some(*handle);
                self.lost_sent = false;
            }
            Event::Loaded { .. } => {
                self.target = None;
                self.lost_sent = false;
            }
            Event::StateChanged { state } => {
                // Back to Playing while still unfocused: allow a fresh FocusLost.
                if *state == RunState::Playing && self.state != RunState::Playing {
                    self.lost_sent = false;
                }
                self.state = *state;
            }
            _ => {}
        }
    }

    /// Poll the lens once; returns the command to publish, if any.
    pub fn check(&mut self) -> Option<Command> {
        let target = self.target?;
        if !self.config.snapshot().pause_on_focus_loss {
            return None;
        }

        let focused = self.lens.current_focused_window() == Some(target);
        match (focused, self.lost_sent) {
            (false, false) if self.state == RunState::Playing => {
                info!(%target, "target window lost focus");
                self.lost_sent = true;
                Some(Command::FocusLost)
            }
            (true, true) => {
                info!(%target, "target window regained focus");
                self.lost_sent = false;
                Some(Command::FocusRegained)
            }
            _ => None,
        }
    }

    /// Run the guard on its own thread against `bus`.
    pub fn spawn(mut self, bus: Arc<dyn Bus>) -> FocusGuardHandle {
        let events = bus.subscribe(&[Topic::Events]);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = thread::spawn(move || {
            while !stop_clone.load(Ordering::Relaxed) {
                let poll = self.config.snapshot().focus_poll();
                match events.recv_timeout(poll) {
                    Ok(first) => {
                        let pending = std::iter::once(first).chain(events.drain());
                        for event in pending.filter_map(|(_, m)| m.into_event()) {
                            self.observe(&event);
                        }
                    }
                    Err(RecvError::Timeout) => {}
                    Err(RecvError::Closed) => break,
                }
                if let Some(command) = self.check() {
                    debug!(command = command.name(), "focus guard publishing");
                    bus.publish(Topic::Focus, Message::Command(command));
                }
            }
        });

        FocusGuardHandle {
            stop_flag,
            thread: Some(thread),
        }
    }
}

/// Running Focus Guard thread.
pub struct FocusGuardHandle {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FocusGuardHandle {
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FocusGuardHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackConfig;

    const TARGET: WindowHandle = WindowHandle(0x2a);
    const OTHER: WindowHandle = WindowHandle(0x99);

    fn guard(lens: Arc<ManualLens>, config: PlaybackConfig) -> FocusGuard {
        let mut guard = FocusGuard::new(lens, ConfigStore::new(config));
        guard.observe(&Event::TargetWindow { handle: TARGET });
        guard.observe(&Event::StateChanged {
            state: RunState::Playing,
        });
        guard
    }

    // --- Edge-triggered loss and regain ---

    #[test]
    fn one_command_per_transition() {
        let lens = Arc::new(ManualLens::new(Some(TARGET)));
        let mut guard = guard(lens.clone(), PlaybackConfig::default());
        assert_eq!(guard.check(), None);

        lens.set_focused(Some(OTHER));
        assert_eq!(guard.check(), Some(Command::FocusLost));
        guard.observe(&Event::StateChanged {
            state: RunState::PausedByFocusLoss,
        });
        assert_eq!(guard.check(), None);
        assert_eq!(guard.check(), None);

        lens.set_focused(Some(TARGET));
        assert_eq!(guard.check(), Some(Command::FocusRegained));
        assert_eq!(guard.check(), None);
    }

    // --- Disabled or untargeted guard is silent ---

    #[test]
    fn disabled_by_config() {
        let lens = Arc::new(ManualLens::new(Some(OTHER)));
        let config = PlaybackConfig {
            pause_on_focus_loss: false,
            ..PlaybackConfig::default()
        };
        let mut guard = guard(lens, config);
        assert_eq!(guard.check(), None);
    }

    #[test]
    fn no_target_no_commands() {
        let lens = Arc::new(ManualLens::new(None));
        let mut guard = FocusGuard::new(lens, ConfigStore::new(PlaybackConfig::default()));
        guard.observe(&Event::StateChanged {
            state: RunState::Playing,
        });
        assert_eq!(guard.check(), None);
        assert_eq!(guard.target(), None);
    }

    // --- Only a Playing session is suspended ---

    #[test]
    fn loss_while_paused_is_not_reported() {
        let lens = Arc::new(ManualLens::new(Some(OTHER)));
        let mut guard = guard(lens, PlaybackConfig::default());
        guard.observe(&Event::StateChanged {
            state: RunState::Paused,
        });
        assert_eq!(guard.check(), None);

        guard.observe(&Event::StateChanged {
            state: RunState::Playing,
        });
        assert_eq!(guard.check(), Some(Command::FocusLost));
    }

    #[test]
    fn replaying_while_unfocused_reports_again() {
        let lens = Arc::new(ManualLens::new(Some(OTHER)));
        let mut guard = guard(lens, PlaybackConfig::default());
        assert_eq!(guard.check(), Some(Command::FocusLost));
        guard.observe(&Event::StateChanged {
            state: RunState::PausedByFocusLoss,
        });
        // Operator forces playback while the target is still in the background.
        guard.observe(&Event::StateChanged {
            state: RunState::Playing,
        });
        assert_eq!(guard.check(), Some(Command::FocusLost));
    }

    #[test]
    fn new_script_clears_target() {
        let lens = Arc::new(ManualLens::new(Some(OTHER)));
        let mut guard = guard(lens, PlaybackConfig::default());
        guard.observe(&Event::Loaded {
            source: "<inline>".to_string(),
            total: 3,
        });
        assert_eq!(guard.target(), None);
        assert_eq!(guard.check(), None);
    }

    #[test]
    fn manual_lens_records_focus_requests() {
        let lens = ManualLens::new(Some(OTHER));
        assert!(lens.request_focus(TARGET));
        assert_eq!(lens.current_focused_window(), Some(TARGET));
        assert_eq!(lens.focus_requests(), vec![TARGET]);
        assert!(!NullLens.request_focus(TARGET));
    }

    #[test]
    fn handle_display_is_hex() {
        assert_eq!(WindowHandle(255).to_string(), "0xff");
    }
}
