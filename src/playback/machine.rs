//! Playback state machine: the only code that mutates a session.
//!
//! Commands go through [`PlaybackMachine::apply`], token emission through
//! [`PlaybackMachine::emit_next`]. Both queue [`Event`]s in an outbox that
//! the engine drains and publishes. Timing is not decided here: `apply`
//! returns an [`Effect`] telling the engine what to do with the scheduler.

use std::path::Path;

use tracing::{info, warn};

use super::config::PlaybackConfig;
use super::render::render;
use super::session::{PlaybackSession, RunState, SessionSource, Suspension};
use crate::bus::{Command, Event};
use crate::input::InputSimulator;
use crate::script::{self, Token};

/// Tokens shown by a `Describe` preview.
const PREVIEW_TOKENS: usize = 200;

/// What the engine must do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// First Play since load/stop/completion: wait the start delay, then
    /// capture the target window.
    SessionStarted,
    /// Back to Playing from a pause.
    Resumed { refocus: bool },
    /// Emit one token right now.
    EmitNow,
    /// An advance-to-newline burst is running.
    BurstStarted,
}

/// Why a token is being emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitMode {
    /// Paced emission while Playing.
    Scheduled,
    /// `AdvanceToken`.
    Single,
    /// One step of `AdvanceToNewline`.
    Burst,
}

#[derive(Debug, Default)]
pub struct PlaybackMachine {
    session: Option<PlaybackSession>,
    burst: bool,
    outbox: Vec<Event>,
}

impl PlaybackMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn run_state(&self) -> Option<RunState> {
        self.session.as_ref().map(PlaybackSession::run_state)
    }

    pub fn is_playing(&self) -> bool {
        self.run_state() == Some(RunState::Playing)
    }

    pub fn in_burst(&self) -> bool {
        self.burst
    }

    /// Take every event queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox)
    }

    /// Replace the session with a freshly parsed script.
    pub fn load(&mut self, tokens: Vec<Token>, source: SessionSource, config: &PlaybackConfig) {
        let session = PlaybackSession::new(tokens, source, config.start_paused);
        info!(source = %session.source(), total = session.total(), "script loaded");
        self.outbox.push(Event::Loaded {
            source: session.source().to_string(),
            total: session.total(),
        });
        self.outbox.push(Event::StateChanged {
            state: session.run_state(),
        });
        self.outbox.push(Event::ProgressChanged {
            cursor: 0,
            total: session.total(),
        });
        self.session = Some(session);
        self.burst = false;
    }

    /// Read and load a script file.
    pub fn load_file(&mut self, path: &Path, config: &PlaybackConfig) -> bool {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                self.load(script::parse(&text), SessionSource::File(path.to_path_buf()), config);
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load script");
                self.outbox.push(Event::LoadFailed {
                    reason: format!("{}: {e}", path.display()),
                });
                false
            }
        }
    }

    /// Apply one operator command.
    ///
    /// `SetConfig` and `Shutdown` belong to the engine and are no-ops here.
    pub fn apply(&mut self, command: &Command, config: &PlaybackConfig) -> Effect {
        match command {
            Command::Load { path } => {
                self.load_file(path, config);
                return Effect::None;
            }
            Command::LoadText { text } => {
                self.load(script::parse(text), SessionSource::Inline, config);
                return Effect::None;
            }
            Command::SetConfig { .. } | Command::Shutdown => return Effect::None,
            _ => {}
        }

        let Some(state) = self.run_state() else {
            self.ignore(command, "no script loaded");
            return Effect::None;
        };

        match command {
            Command::Play => self.play(command, state, config),
            Command::Resume if state == RunState::Stopped => {
                self.ignore(command, "playback is stopped");
                Effect::None
            }
            Command::Resume => self.play(command, state, config),
            Command::TogglePause => match state {
                RunState::Playing => self.pause(),
                RunState::Stopped => {
                    self.ignore(command, "playback is stopped");
                    Effect::None
                }
                _ => self.play(command, state, config),
            },
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::AdvanceToken | Command::AdvanceToNewline if state == RunState::Stopped => {
                self.ignore(command, "playback is stopped");
                Effect::None
            }
            Command::AdvanceToken => Effect::EmitNow,
            Command::AdvanceToNewline => {
                self.burst = true;
                Effect::BurstStarted
            }
            Command::Reload => self.reload(config),
            Command::FocusLost if !config.pause_on_focus_loss => Effect::None,
            Command::FocusLost => self.suspend(Suspension::Focus),
            Command::TransportLost => self.suspend(Suspension::Transport),
            Command::FocusRegained => self.unsuspend(Suspension::Focus),
            Command::TransportRestored => self.unsuspend(Suspension::Transport),
            Command::Describe => {
                self.describe();
                Effect::None
            }
            Command::Load { .. }
            | Command::LoadText { .. }
            | Command::SetConfig { .. }
            | Command::Shutdown => Effect::None,
        }
    }

    /// Emit the token under the cursor through `simulator`.
    ///
    /// Returns the emitted token, or `None` if nothing was emitted (wrong
    /// state, end of script, or injection failure).
    pub fn emit_next(
        &mut self,
        simulator: &mut dyn InputSimulator,
        config: &PlaybackConfig,
        mode: EmitMode,
    ) -> Option<Token> {
        let Some(session) = self.session.as_mut() else {
            self.burst = false;
            return None;
        };
        let state = session.run_state();
        let allowed = match mode {
            EmitMode::Scheduled => state == RunState::Playing,
            EmitMode::Single | EmitMode::Burst => state != RunState::Stopped,
        };
        let Some(token) = session.current().filter(|_| allowed) else {
            if mode == EmitMode::Burst {
                self.burst = false;
            }
            return None;
        };

        for action in render(session.tokens(), session.cursor(), config) {
            if let Err(err) = simulator.simulate(&action) {
                warn!(error = %err, cursor = session.cursor(), "injection failed; pausing");
                self.outbox.push(Event::InjectionFailed {
                    reason: err.to_string(),
                });
                transition(session, &mut self.outbox, RunState::Paused);
                self.burst = false;
                return None;
            }
        }

        session.advance_cursor();
        self.outbox.push(Event::ProgressChanged {
            cursor: session.cursor(),
            total: session.total(),
        });

        if session.is_at_end() {
            transition(session, &mut self.outbox, RunState::Stopped);
            session.mark_fresh();
            self.burst = false;
            info!(total = session.total(), "playback completed");
            self.outbox.push(Event::PlaybackCompleted);
            return Some(token);
        }

        match token {
            Token::Pause => {
                self.burst = false;
                if state == RunState::Playing {
                    transition(session, &mut self.outbox, RunState::Paused);
                }
            }
            Token::Newline => {
                if mode == EmitMode::Burst {
                    self.burst = false;
                }
                if mode == EmitMode::Scheduled && config.pause_on_newline {
                    transition(session, &mut self.outbox, RunState::PausedAtNewline);
                }
            }
            _ => {}
        }

        Some(token)
    }

    fn play(&mut self, command: &Command, state: RunState, config: &PlaybackConfig) -> Effect {
        if state == RunState::Playing {
            return Effect::None;
        }
        let Some((total, suspension)) = self
            .session
            .as_ref()
            .map(|s| (s.total(), s.suspension()))
        else {
            return Effect::None;
        };
        if total == 0 {
            self.ignore(command, "script is empty");
            return Effect::None;
        }
        if suspension == Some(Suspension::Transport) {
            self.ignore(command, "bus link is down");
            return Effect::None;
        }

        let Some(session) = self.session.as_mut() else {
            return Effect::None;
        };
        match state {
            RunState::Stopped => {
                if session.is_at_end() {
                    session.rewind();
                    self.outbox.push(Event::ProgressChanged {
                        cursor: 0,
                        total: session.total(),
                    });
                }
                session.mark_started();
                transition(session, &mut self.outbox, RunState::Playing);
                Effect::SessionStarted
            }
            _ => {
                transition(session, &mut self.outbox, RunState::Playing);
                if session.is_fresh() {
                    session.mark_started();
                    Effect::SessionStarted
                } else {
                    Effect::Resumed {
                        refocus: config.refocus_on_resume,
                    }
                }
            }
        }
    }

    fn pause(&mut self) -> Effect {
        self.burst = false;
        if let Some(session) = self.session.as_mut() {
            if session.run_state() == RunState::Playing {
                transition(session, &mut self.outbox, RunState::Paused);
            }
        }
        Effect::None
    }

    fn stop(&mut self) -> Effect {
        self.burst = false;
        let Some(session) = self.session.as_mut() else {
            return Effect::None;
        };
        if session.run_state() == RunState::Stopped {
            return Effect::None;
        }
        session.rewind();
        transition(session, &mut self.outbox, RunState::Stopped);
        self.outbox.push(Event::ProgressChanged {
            cursor: 0,
            total: session.total(),
        });
        Effect::None
    }

    fn reload(&mut self, config: &PlaybackConfig) -> Effect {
        let Some(session) = self.session.as_ref() else {
            return Effect::None;
        };
        match session.source().clone() {
            SessionSource::File(path) => {
                self.load_file(&path, config);
            }
            SessionSource::Inline => {
                let tokens = session.tokens().to_vec();
                self.load(tokens, SessionSource::Inline, config);
            }
        }
        Effect::None
    }

    fn suspend(&mut self, reason: Suspension) -> Effect {
        let Some(session) = self.session.as_mut() else {
            return Effect::None;
        };
        match session.run_state() {
            RunState::Playing => {
                self.burst = false;
                session.suspend(reason);
                info!(?reason, "playback suspended");
                self.outbox.push(Event::StateChanged {
                    state: RunState::PausedByFocusLoss,
                });
            }
            // A dead link outranks focus: only its restoration may resume.
            RunState::PausedByFocusLoss if reason == Suspension::Transport => {
                session.suspend(reason);
            }
            _ => {}
        }
        Effect::None
    }

    fn unsuspend(&mut self, reason: Suspension) -> Effect {
        let Some(session) = self.session.as_mut() else {
            return Effect::None;
        };
        if session.run_state() != RunState::PausedByFocusLoss
            || session.suspension() != Some(reason)
        {
            return Effect::None;
        }
        transition(session, &mut self.outbox, RunState::Playing);
        Effect::Resumed { refocus: false }
    }

    fn describe(&mut self) {
        if let Some(session) = self.session.as_ref() {
            let remaining = session.remaining();
            let shown = &remaining[..remaining.len().min(PREVIEW_TOKENS)];
            self.outbox.push(Event::Preview {
                remaining: script::reconstruct(shown),
            });
        }
    }

    fn ignore(&mut self, command: &Command, reason: &str) {
        warn!(command = command.name(), reason, "command ignored");
        self.outbox.push(Event::CommandIgnored {
            command: command.name().to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Move `session` to `state`, publishing StateChanged only on a real change.
fn transition(session: &mut PlaybackSession, outbox: &mut Vec<Event>, state: RunState) {
    if session.run_state() == state {
        return;
    }
    info!(from = %session.run_state(), to = %state, "state changed");
    session.set_run_state(state);
    outbox.push(Event::StateChanged { state });
}
