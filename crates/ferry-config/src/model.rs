//! Typed configuration models.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_DATA_DIR, DEFAULT_EVENT_REPLAY_CAPACITY, DEFAULT_LARGE_OPERATION_THRESHOLD_BYTES,
    DEFAULT_LOG_LEVEL, DEFAULT_RATING_SAMPLE_INTERVAL_MS, DEFAULT_SAMPLING_INTERVAL_MS,
};

/// Complete configuration of the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Supervisor and guard tuning.
    pub transfers: TransferSettings,
    /// Directories used for destinations and persisted state.
    pub storage: StorageSettings,
    /// Logging output.
    pub telemetry: TelemetrySettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::under_root(DEFAULT_DATA_DIR)
    }
}

impl OrchestratorConfig {
    /// Defaults with every storage directory placed below `root`.
    #[must_use]
    pub fn under_root(root: impl AsRef<Path>) -> Self {
        Self {
            transfers: TransferSettings::default(),
            storage: StorageSettings::under_root(root.as_ref()),
            telemetry: TelemetrySettings::default(),
        }
    }

    /// Sampling interval of supervisor runs.
    #[must_use]
    pub const fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.transfers.sampling_interval_ms)
    }

    /// Sampling interval of the rating heuristic.
    #[must_use]
    pub const fn rating_sample_interval(&self) -> Duration {
        Duration::from_millis(self.transfers.rating_sample_interval_ms)
    }

    /// Rewrite relative storage paths as paths below `base`.
    pub fn absolutize(&mut self, base: &Path) {
        for path in self.storage.paths_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Supervisor and guard tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferSettings {
    /// Payload size above which node downloads ask for confirmation.
    pub large_operation_threshold_bytes: u64,
    /// Interval between folded samples, in milliseconds.
    pub sampling_interval_ms: u64,
    /// Interval between rating-heuristic samples, in milliseconds.
    pub rating_sample_interval_ms: u64,
    /// Re-dispatch runs interrupted by a previous process on start-up.
    pub resume_interrupted_runs: bool,
    /// Replay ring size of the event bus.
    pub event_replay_capacity: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            large_operation_threshold_bytes: DEFAULT_LARGE_OPERATION_THRESHOLD_BYTES,
            sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            rating_sample_interval_ms: DEFAULT_RATING_SAMPLE_INTERVAL_MS,
            resume_interrupted_runs: true,
            event_replay_capacity: DEFAULT_EVENT_REPLAY_CAPACITY,
        }
    }
}

/// Directories used for destinations and persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// Ephemeral cache receiving preview downloads.
    pub preview_cache_dir: PathBuf,
    /// Root of offline copies; nodes land below their remote parent path.
    pub offline_root: PathBuf,
    /// Download location used when none is remembered.
    pub default_download_dir: PathBuf,
    /// Directory holding persisted run records.
    pub state_dir: PathBuf,
    /// JSON document holding user preferences.
    pub preferences_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self::under_root(Path::new(DEFAULT_DATA_DIR))
    }
}

impl StorageSettings {
    /// Default layout below `root`.
    #[must_use]
    pub fn under_root(root: &Path) -> Self {
        Self {
            preview_cache_dir: root.join("cache").join("preview"),
            offline_root: root.join("offline"),
            default_download_dir: root.join("downloads"),
            state_dir: root.join("state"),
            preferences_path: root.join("preferences.json"),
        }
    }

    fn paths_mut(&mut self) -> [&mut PathBuf; 5] {
        [
            &mut self.preview_cache_dir,
            &mut self.offline_root,
            &mut self.default_download_dir,
            &mut self.state_dir,
            &mut self.preferences_path,
        ]
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormatSetting {
    /// Pretty in debug builds, JSON in release builds.
    #[default]
    Auto,
    /// Structured JSON lines.
    Json,
    /// Human-readable output.
    Pretty,
}

impl LogFormatSetting {
    /// Parse a format name; unknown names yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetrySettings {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub log_level: String,
    /// Output format.
    pub log_format: LogFormatSetting,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormatSetting::Auto,
        }
    }
}
