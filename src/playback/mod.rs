//! Playback: session state, the state machine that owns it, emission-time
//! rendering and the live configuration snapshot.

pub mod config;
pub mod machine;
pub mod render;
pub mod session;

pub use config::{ConfigError, ConfigStore, PlaybackConfig};
pub use machine::{Effect, EmitMode, PlaybackMachine};
pub use session::{PlaybackSession, RunState, SessionSource, Suspension};
