//! Validation helpers and parsing utilities for configuration values.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::model::OrchestratorConfig;

const MIN_SAMPLING_INTERVAL_MS: u64 = 50;
const MAX_SAMPLING_INTERVAL_MS: u64 = 60_000;
const MIN_RATING_SAMPLE_INTERVAL_MS: u64 = 100;

/// Check every field of a loaded configuration.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails.
pub fn validate(config: &OrchestratorConfig) -> ConfigResult<()> {
    let transfers = &config.transfers;
    if transfers.large_operation_threshold_bytes == 0 {
        return Err(ConfigError::invalid(
            "transfers",
            "large_operation_threshold_bytes",
            Some("0".to_string()),
            "must be positive",
        ));
    }
    if !(MIN_SAMPLING_INTERVAL_MS..=MAX_SAMPLING_INTERVAL_MS)
        .contains(&transfers.sampling_interval_ms)
    {
        return Err(ConfigError::invalid(
            "transfers",
            "sampling_interval_ms",
            Some(transfers.sampling_interval_ms.to_string()),
            "must be between 50 and 60000",
        ));
    }
    if transfers.rating_sample_interval_ms < MIN_RATING_SAMPLE_INTERVAL_MS {
        return Err(ConfigError::invalid(
            "transfers",
            "rating_sample_interval_ms",
            Some(transfers.rating_sample_interval_ms.to_string()),
            "must be at least 100",
        ));
    }
    if transfers.event_replay_capacity == 0 {
        return Err(ConfigError::invalid(
            "transfers",
            "event_replay_capacity",
            Some("0".to_string()),
            "must be positive",
        ));
    }

    let storage = &config.storage;
    ensure_path("preview_cache_dir", &storage.preview_cache_dir)?;
    ensure_path("offline_root", &storage.offline_root)?;
    ensure_path("default_download_dir", &storage.default_download_dir)?;
    ensure_path("state_dir", &storage.state_dir)?;
    ensure_path("preferences_path", &storage.preferences_path)?;

    if config.telemetry.log_level.trim().is_empty() {
        return Err(ConfigError::invalid(
            "telemetry",
            "log_level",
            None,
            "must not be empty",
        ));
    }
    Ok(())
}

fn ensure_path(field: &str, path: &Path) -> ConfigResult<()> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::invalid(
            "storage",
            field,
            None,
            "must not be empty",
        ));
    }
    Ok(())
}

pub(crate) fn parse_u64(section: &str, field: &str, raw: &str) -> ConfigResult<u64> {
    raw.trim().parse::<u64>().map_err(|_| {
        ConfigError::invalid(
            section,
            field,
            Some(raw.to_string()),
            "must be an unsigned integer",
        )
    })
}

pub(crate) fn parse_usize(section: &str, field: &str, raw: &str) -> ConfigResult<usize> {
    raw.trim().parse::<usize>().map_err(|_| {
        ConfigError::invalid(
            section,
            field,
            Some(raw.to_string()),
            "must be an unsigned integer",
        )
    })
}

pub(crate) fn parse_flag(section: &str, field: &str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            section,
            field,
            Some(raw.to_string()),
            "must be a boolean flag",
        )),
    }
}
