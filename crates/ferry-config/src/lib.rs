#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, unused_must_use)]
#![allow(clippy::module_name_repetitions)]

//! File and environment backed configuration for the orchestration layer.
//!
//! Layout: `model.rs` (typed settings), `defaults.rs` (reference values),
//! `loader.rs` (JSON file + `FERRY_*` overrides), `validate.rs` (field checks),
//! `preferences.rs` (JSON-file preference store).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod preferences;
pub mod validate;

pub use defaults::{
    DEFAULT_LARGE_OPERATION_THRESHOLD_BYTES, DEFAULT_RATING_SAMPLE_INTERVAL_MS,
    DEFAULT_SAMPLING_INTERVAL_MS,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_PATH_ENV, load, load_with};
pub use model::{
    LogFormatSetting, OrchestratorConfig, StorageSettings, TelemetrySettings, TransferSettings,
};
pub use preferences::{FilePreferenceStore, TransferPreferences};
