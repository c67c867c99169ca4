//! Playback session: one loaded script, its cursor and run state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::script::Token;

/// Run state of the playback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped,
    Playing,
    /// Paused by the operator or by a `<<PAUSE>>` directive.
    Paused,
    PausedAtNewline,
    /// Suspended because the target lost focus or the bus link dropped.
    PausedByFocusLoss,
}

impl RunState {
    pub fn is_paused(self) -> bool {
        matches!(
            self,
            RunState::Paused | RunState::PausedAtNewline | RunState::PausedByFocusLoss
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Stopped => "stopped",
            RunState::Playing => "playing",
            RunState::Paused => "paused",
            RunState::PausedAtNewline => "paused_at_newline",
            RunState::PausedByFocusLoss => "paused_by_focus_loss",
        };
        f.write_str(name)
    }
}

/// What put a session into `PausedByFocusLoss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspension {
    Focus,
    Transport,
}

/// Where a session's text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSource {
    File(std::path::PathBuf),
    Inline,
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionSource::File(path) => write!(f, "{}", path.display()),
            SessionSource::Inline => f.write_str("<inline>"),
        }
    }
}

/// Mutable state of one loaded script.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    tokens: Vec<Token>,
    cursor: usize,
    run_state: RunState,
    source: SessionSource,
    suspension: Option<Suspension>,
    /// Set on load, stop and completion; cleared when playback next starts.
    fresh: bool,
}

impl PlaybackSession {
    pub fn new(tokens: Vec<Token>, source: SessionSource, start_paused: bool) -> Self {
        Self {
            tokens,
            cursor: 0,
            run_state: if start_paused {
                RunState::Paused
            } else {
                RunState::Stopped
            },
            source,
            suspension: None,
            fresh: true,
        }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total(&self) -> usize {
        self.tokens.len()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn source(&self) -> &SessionSource {
        &self.source
    }

    pub fn suspension(&self) -> Option<Suspension> {
        self.suspension
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn is_at_end(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    /// Token under the cursor.
    pub fn current(&self) -> Option<Token> {
        self.tokens.get(self.cursor).copied()
    }

    /// Tokens not yet emitted.
    pub fn remaining(&self) -> &[Token] {
        &self.tokens[self.cursor.min(self.tokens.len())..]
    }

    pub(crate) fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
        if state != RunState::PausedByFocusLoss {
            self.suspension = None;
        }
    }

    pub(crate) fn suspend(&mut self, reason: Suspension) {
        self.run_state = RunState::PausedByFocusLoss;
        self.suspension = Some(reason);
    }

    pub(crate) fn advance_cursor(&mut self) {
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
        }
    }

    pub(crate) fn rewind(&mut self) {
        self.cursor = 0;
        self.fresh = true;
    }

    pub(crate) fn mark_started(&mut self) {
        self.fresh = false;
    }

    pub(crate) fn mark_fresh(&mut self) {
        self.fresh = true;
    }
}
