//! Topics and message shapes carried by the bus.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::focus::WindowHandle;
use crate::playback::{PlaybackConfig, RunState};

/// Logical channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Operator → engine.
    Commands,
    /// Engine → observers.
    Events,
    /// Focus Guard → engine.
    Focus,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Commands, Topic::Events, Topic::Focus];

    pub fn name(self) -> &'static str {
        match self {
            Topic::Commands => "commands",
            Topic::Events => "events",
            Topic::Focus => "focus",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Topic::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Whether this topic carries commands (as opposed to events).
    pub fn carries_commands(self) -> bool {
        !matches!(self, Topic::Events)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Play,
    Pause,
    /// Play, but only from a paused state.
    Resume,
    TogglePause,
    Stop,
    AdvanceToNewline,
    AdvanceToken,
    Reload,
    FocusLost,
    FocusRegained,
    Load { path: PathBuf },
    LoadText { text: String },
    SetConfig { config: Box<PlaybackConfig> },
    /// Publish a preview of the remaining tokens.
    Describe,
    TransportLost,
    TransportRestored,
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::TogglePause => "toggle_pause",
            Command::Stop => "stop",
            Command::AdvanceToNewline => "advance_to_newline",
            Command::AdvanceToken => "advance_token",
            Command::Reload => "reload",
            Command::FocusLost => "focus_lost",
            Command::FocusRegained => "focus_regained",
            Command::Load { .. } => "load",
            Command::LoadText { .. } => "load_text",
            Command::SetConfig { .. } => "set_config",
            Command::Describe => "describe",
            Command::TransportLost => "transport_lost",
            Command::TransportRestored => "transport_restored",
            Command::Shutdown => "shutdown",
        }
    }

    /// Build a command from its name and optional argument, as typed on a
    /// command line. `load` takes a path, `load_text` takes the text and
    /// `set_config` takes a YAML config file path.
    pub fn from_cli(name: &str, arg: Option<&str>) -> Result<Self, String> {
        let name = name.replace('-', "_").to_ascii_lowercase();
        let command = match (name.as_str(), arg) {
            ("play", None) => Command::Play,
            ("pause", None) => Command::Pause,
            ("resume", None) => Command::Resume,
            ("toggle_pause", None) => Command::TogglePause,
            ("stop", None) => Command::Stop,
            ("advance_to_newline" | "line", None) => Command::AdvanceToNewline,
            ("advance_token" | "token", None) => Command::AdvanceToken,
            ("reload", None) => Command::Reload,
            ("focus_lost", None) => Command::FocusLost,
            ("focus_regained", None) => Command::FocusRegained,
            ("describe", None) => Command::Describe,
            ("shutdown", None) => Command::Shutdown,
            ("load", Some(path)) => Command::Load {
                path: PathBuf::from(path),
            },
            ("load_text", Some(text)) => Command::LoadText {
                text: text.to_string(),
            },
            ("set_config", Some(path)) => {
                let config = PlaybackConfig::load_from(path.as_ref()).map_err(|e| e.to_string())?;
                Command::SetConfig {
                    config: Box::new(config),
                }
            }
            ("load" | "load_text" | "set_config", None) => {
                return Err(format!("`{name}` needs an argument"))
            }
            (_, Some(_)) if Self::is_known(&name) => {
                return Err(format!("`{name}` takes no argument"))
            }
            _ => return Err(format!("unknown command `{name}`")),
        };
        Ok(command)
    }

    fn is_known(name: &str) -> bool {
        matches!(
            name,
            "play"
                | "pause"
                | "resume"
                | "toggle_pause"
                | "stop"
                | "advance_to_newline"
                | "line"
                | "advance_token"
                | "token"
                | "reload"
                | "focus_lost"
                | "focus_regained"
                | "describe"
                | "shutdown"
        )
    }
}

/// Status notification published by the engine.
///
/// Events are level-triggered snapshots; receiving one twice is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    StateChanged { state: RunState },
    ProgressChanged { cursor: usize, total: usize },
    PlaybackCompleted,
    Loaded { source: String, total: usize },
    LoadFailed { reason: String },
    InjectionFailed { reason: String },
    CommandIgnored { command: String, reason: String },
    TargetWindow { handle: WindowHandle },
    Preview { remaining: String },
}

/// Anything that travels on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Event(Event),
}

impl Message {
    pub fn into_command(self) -> Option<Command> {
        match self {
            Message::Command(c) => Some(c),
            Message::Event(_) => None,
        }
    }

    pub fn into_event(self) -> Option<Event> {
        match self {
            Message::Event(e) => Some(e),
            Message::Command(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a payload received on `topic`.
    pub fn from_json(topic: Topic, json: &str) -> Result<Self, serde_json::Error> {
        if topic.carries_commands() {
            serde_json::from_str(json).map(Message::Command)
        } else {
            serde_json::from_str(json).map(Message::Event)
        }
    }
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        Message::Command(command)
    }
}

impl From<Event> for Message {
    fn from(event: Event) -> Self {
        Message::Event(event)
    }
}
