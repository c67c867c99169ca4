//! Playback configuration: delay bounds and behaviour toggles, loaded from
//! ~/.typecast/config.yaml and replaced live through `SetConfig` commands.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while reading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Playback configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Base delay between tokens.
    pub speed_ms: u64,
    /// Perturb every delay by a random offset in the jitter range.
    pub variable_speed: bool,
    pub jitter_min_ms: i64,
    pub jitter_max_ms: i64,
    /// Fixed RNG seed for the jitter; fresh entropy when unset.
    pub seed: Option<u64>,
    /// Pause after every newline the scheduler emits.
    pub pause_on_newline: bool,
    /// Press Home after every newline.
    pub auto_home_on_newline: bool,
    /// Send Ctrl+Enter instead of Enter.
    pub ctrl_on_newline: bool,
    /// Type runs of four spaces as a single Tab.
    pub quad_spaces_to_tab: bool,
    pub pause_on_focus_loss: bool,
    pub refocus_on_resume: bool,
    /// Wait after a refocus request before typing resumes.
    pub refocus_settle_ms: u64,
    /// Newly loaded sessions start Paused instead of Stopped.
    pub start_paused: bool,
    /// Wait between session start and the first token.
    pub start_delay_ms: u64,
    pub focus_poll_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed_ms: 50,
            variable_speed: false,
            jitter_min_ms: -50,
            jitter_max_ms: 150,
            seed: None,
            pause_on_newline: true,
            auto_home_on_newline: false,
            ctrl_on_newline: false,
            quad_spaces_to_tab: true,
            pause_on_focus_loss: true,
            refocus_on_resume: true,
            refocus_settle_ms: 2000,
            start_paused: false,
            start_delay_ms: 5000,
            focus_poll_ms: 100,
        }
    }
}

impl PlaybackConfig {
    /// Load config from the standard path (~/.typecast/config.yaml).
    /// Returns None if the file doesn't exist or doesn't parse.
    pub fn load() -> Option<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path).ok()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::home_dir()?.join(".typecast").join("config.yaml"))
    }

    pub fn speed(&self) -> Duration {
        Duration::from_millis(self.speed_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn refocus_settle(&self) -> Duration {
        Duration::from_millis(self.refocus_settle_ms)
    }

    pub fn focus_poll(&self) -> Duration {
        Duration::from_millis(self.focus_poll_ms.max(1))
    }
}

/// Shared holder for the live configuration.
///
/// Readers take an `Arc` snapshot and keep it for the whole decision; a
/// replacement never mutates a snapshot already handed out.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<Arc<PlaybackConfig>>>,
}

impl ConfigStore {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current configuration snapshot.
    pub fn snapshot(&self) -> Arc<PlaybackConfig> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a new configuration.
    pub fn replace(&self, config: PlaybackConfig) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
    }
}
