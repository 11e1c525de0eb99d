//! Runtime configuration for store locations and sync timing.
//!
//! # Responsibility
//! - Describe where the shared and process-private directories live.
//! - Carry sync timing knobs (periodic tick, external-change debounce).
//! - Load overrides from a TOML file, falling back to defaults.
//!
//! # Invariants
//! - `tick_interval_ms` and `average_window_days` are never zero after
//!   `validate()`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR_NAME: &str = "tally";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_AVERAGE_WINDOW_DAYS: u32 = 30;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, message: String },
    Invalid(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "invalid config `{}`: {message}", path.display())
            }
            Self::Invalid(details) => write!(f, "invalid config: {details}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Process configuration shared by host, extension and tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    /// Directory shared by every process of the application family.
    /// `None` means the shared location cannot be resolved on this install.
    pub shared_dir: Option<PathBuf>,
    /// Process-private directory used when the shared one is unusable.
    pub local_dir: PathBuf,
    /// Periodic reconciliation interval while the host is foregrounded.
    pub tick_interval_ms: u64,
    /// Coalescing window for externally observed watermark changes.
    pub debounce_ms: u64,
    /// Trailing window (calendar days) for the rolling daily average.
    pub average_window_days: u32,
    /// How many times a `locked` integrity probe is retried.
    pub probe_retry_limit: u32,
    pub probe_retry_backoff_ms: u64,
    /// Optional log level override (`trace|debug|info|warn|error`).
    pub log_level: Option<String>,
}

impl Default for TallyConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            shared_dir: None,
            local_dir: data_dir.join(APP_DIR_NAME),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            average_window_days: DEFAULT_AVERAGE_WINDOW_DAYS,
            probe_retry_limit: 3,
            probe_retry_backoff_ms: 50,
            log_level: None,
        }
    }
}

impl TallyConfig {
    /// Builds a config rooted at explicit directories with default timing.
    pub fn with_dirs(shared_dir: Option<PathBuf>, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            shared_dir,
            local_dir: local_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a TOML config file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = toml::from_str(&text).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0"));
        }
        if self.average_window_days == 0 {
            return Err(ConfigError::Invalid("average_window_days must be > 0"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Shared directory if configured and usable (exists or can be created).
    pub fn resolve_shared_dir(&self) -> Option<PathBuf> {
        let dir = self.shared_dir.as_ref()?;
        std::fs::create_dir_all(dir).ok()?;
        Some(dir.clone())
    }
}
