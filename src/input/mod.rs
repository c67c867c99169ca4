//! Input simulator abstraction.
//!
//! The engine never talks to the OS directly: it hands [`InputAction`]s to
//! an [`InputSimulator`]. The `enigo` feature provides a native backend;
//! without it the binary runs in dry-run mode and only logs.

#[cfg(feature = "enigo")]
pub mod native;

use std::sync::{Arc, Mutex};

use crate::script::{Key, Modifiers, ScrollDirection};

/// One primitive request to the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    TypeChar(char),
    /// Press and release `key`, `repeat` times with no delay in between.
    Press { key: Key, repeat: u32 },
    /// Hold `modifiers` while clicking `key`.
    Chord { modifiers: Modifiers, key: Key },
    Scroll { direction: ScrollDirection, count: u32 },
}

impl InputAction {
    pub fn press(key: Key) -> Self {
        InputAction::Press { key, repeat: 1 }
    }
}

/// The OS refused or failed to perform an action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("input injection failed for {action:?}: {message}")]
pub struct InjectionError {
    pub action: InputAction,
    pub message: String,
}

impl InjectionError {
    pub fn new(action: InputAction, message: impl Into<String>) -> Self {
        Self {
            action,
            message: message.into(),
        }
    }
}

/// Performs keystrokes on behalf of the engine.
pub trait InputSimulator: Send {
    fn simulate(&mut self, action: &InputAction) -> Result<(), InjectionError>;
}

/// Logs every action instead of performing it.
#[derive(Debug, Default)]
pub struct DryRunSimulator;

impl InputSimulator for DryRunSimulator {
    fn simulate(&mut self, action: &InputAction) -> Result<(), InjectionError> {
        tracing::debug!(?action, "dry-run input");
        Ok(())
    }
}

/// Records actions into a shared log instead of performing them.
///
/// Clones share the same log, so a test can keep one handle while the
/// engine owns the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingSimulator {
    actions: Arc<Mutex<Vec<InputAction>>>,
    failing: Arc<Mutex<Option<String>>>,
}

impl RecordingSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything performed so far.
    pub fn actions(&self) -> Vec<InputAction> {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.actions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every following action fail with `message` (None to recover).
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = message.map(str::to_string);
    }
}

impl InputSimulator for RecordingSimulator {
    fn simulate(&mut self, action: &InputAction) -> Result<(), InjectionError> {
        if let Some(message) = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
        {
            return Err(InjectionError::new(*action, message));
        }
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(*action);
        Ok(())
    }
}

/// Default simulator for this build.
pub fn default_simulator() -> Result<Box<dyn InputSimulator>, InjectionError> {
    #[cfg(feature = "enigo")]
    {
        Ok(Box::new(native::EnigoSimulator::new()?))
    }
    #[cfg(not(feature = "enigo"))]
    {
        tracing::info!("built without the enigo feature; keystrokes are logged, not typed");
        Ok(Box::new(DryRunSimulator))
    }
}
