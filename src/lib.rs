//! Typecast: replays a source file into the focused application, keystroke
//! by keystroke, under hotkey control from other processes.

pub mod bus;
pub mod engine;
pub mod focus;
pub mod input;
pub mod logging;
pub mod playback;
pub mod script;
pub mod timing;
