//! Configuration loading: optional JSON document, then `FERRY_*` overrides.
//!
//! Relative storage paths are anchored at the document's directory, or at the
//! working directory when no document is used.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{LogFormatSetting, OrchestratorConfig};
use crate::validate::{parse_flag, parse_u64, parse_usize, validate};

/// Environment variable naming the configuration document.
pub const CONFIG_PATH_ENV: &str = "FERRY_CONFIG";

/// Load configuration using the process environment.
///
/// When `path` is `None`, the document named by `FERRY_CONFIG` is used if set.
///
/// # Errors
///
/// Returns an error if the document cannot be read or decoded, or a value
/// fails validation.
pub async fn load(path: Option<&Path>) -> ConfigResult<OrchestratorConfig> {
    let from_env = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    let path = path.map(Path::to_path_buf).or(from_env);
    load_with(path.as_deref(), |key| std::env::var(key).ok()).await
}

/// Load configuration with an explicit environment lookup.
///
/// # Errors
///
/// Returns an error if the document cannot be read or decoded, or a value
/// fails validation.
pub async fn load_with<F>(path: Option<&Path>, lookup: F) -> ConfigResult<OrchestratorConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let (mut config, base) = match path {
        Some(path) => {
            let config = read_document(path).await?;
            let base = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map_or_else(current_dir, |parent| Ok(parent.to_path_buf()))?;
            (config, base)
        }
        None => (OrchestratorConfig::default(), current_dir()?),
    };

    apply_env_overrides(&mut config, &lookup)?;
    config.absolutize(&base);
    validate(&config)?;

    info!(
        threshold_bytes = config.transfers.large_operation_threshold_bytes,
        sampling_interval_ms = config.transfers.sampling_interval_ms,
        state_dir = %config.storage.state_dir.display(),
        "configuration loaded"
    );
    Ok(config)
}

async fn read_document(path: &Path) -> ConfigResult<OrchestratorConfig> {
    let raw = tokio::fs::read(path).await.map_err(|source| ConfigError::Io {
        operation: "config.read_document",
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn current_dir() -> ConfigResult<PathBuf> {
    std::env::current_dir().map_err(|source| ConfigError::Io {
        operation: "config.current_dir",
        path: PathBuf::from("."),
        source,
    })
}

/// Apply `FERRY_*` overrides on top of the document values.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when an override cannot be parsed.
pub fn apply_env_overrides<F>(config: &mut OrchestratorConfig, lookup: &F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |key: &str| {
        let value = lookup(key).filter(|value| !value.trim().is_empty());
        if value.is_some() {
            debug!(variable = key, "configuration override applied");
        }
        value
    };

    let transfers = &mut config.transfers;
    if let Some(raw) = read("FERRY_LARGE_OPERATION_THRESHOLD_BYTES") {
        transfers.large_operation_threshold_bytes =
            parse_u64("transfers", "large_operation_threshold_bytes", &raw)?;
    }
    if let Some(raw) = read("FERRY_SAMPLING_INTERVAL_MS") {
        transfers.sampling_interval_ms = parse_u64("transfers", "sampling_interval_ms", &raw)?;
    }
    if let Some(raw) = read("FERRY_RATING_SAMPLE_INTERVAL_MS") {
        transfers.rating_sample_interval_ms =
            parse_u64("transfers", "rating_sample_interval_ms", &raw)?;
    }
    if let Some(raw) = read("FERRY_RESUME_INTERRUPTED_RUNS") {
        transfers.resume_interrupted_runs =
            parse_flag("transfers", "resume_interrupted_runs", &raw)?;
    }
    if let Some(raw) = read("FERRY_EVENT_REPLAY_CAPACITY") {
        transfers.event_replay_capacity = parse_usize("transfers", "event_replay_capacity", &raw)?;
    }

    let storage = &mut config.storage;
    for (key, target) in [
        ("FERRY_PREVIEW_CACHE_DIR", &mut storage.preview_cache_dir),
        ("FERRY_OFFLINE_ROOT", &mut storage.offline_root),
        ("FERRY_DOWNLOAD_DIR", &mut storage.default_download_dir),
        ("FERRY_STATE_DIR", &mut storage.state_dir),
        ("FERRY_PREFERENCES_PATH", &mut storage.preferences_path),
    ] {
        if let Some(raw) = read(key) {
            *target = PathBuf::from(raw.trim());
        }
    }

    if let Some(raw) = read("FERRY_LOG_LEVEL") {
        config.telemetry.log_level = raw.trim().to_string();
    }
    if let Some(raw) = read("FERRY_LOG_FORMAT") {
        config.telemetry.log_format = LogFormatSetting::parse(&raw).ok_or_else(|| {
            ConfigError::invalid(
                "telemetry",
                "log_format",
                Some(raw.clone()),
                "must be one of auto, json, pretty",
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_replace_document_values() {
        let mut config = OrchestratorConfig::default();
        apply_env_overrides(
            &mut config,
            &env(&[
                ("FERRY_LARGE_OPERATION_THRESHOLD_BYTES", "2048"),
                ("FERRY_RESUME_INTERRUPTED_RUNS", "false"),
                ("FERRY_DOWNLOAD_DIR", "/srv/downloads"),
                ("FERRY_LOG_FORMAT", "json"),
            ]),
        )
        .expect("overrides apply");
        assert_eq!(config.transfers.large_operation_threshold_bytes, 2048);
        assert!(!config.transfers.resume_interrupted_runs);
        assert_eq!(
            config.storage.default_download_dir,
            PathBuf::from("/srv/downloads")
        );
        assert_eq!(config.telemetry.log_format, LogFormatSetting::Json);
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut config = OrchestratorConfig::default();
        apply_env_overrides(&mut config, &env(&[("FERRY_SAMPLING_INTERVAL_MS", "  ")]))
            .expect("blank ignored");
        assert_eq!(config.transfers.sampling_interval_ms, 1_000);
    }

    #[test]
    fn malformed_override_names_the_field() {
        let mut config = OrchestratorConfig::default();
        let err = apply_env_overrides(&mut config, &env(&[("FERRY_LOG_FORMAT", "xml")]))
            .expect_err("bad format");
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, .. } if field == "log_format"
        ));
    }
}
