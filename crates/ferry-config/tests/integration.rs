use std::collections::HashMap;
use std::path::PathBuf;

use ferry_config::{ConfigError, LogFormatSetting, load_with};
use tempfile::TempDir;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[tokio::test]
async fn document_and_environment_are_layered() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("ferry.json");
    tokio::fs::write(
        &path,
        br#"{
            "transfers": { "large_operation_threshold_bytes": 1048576, "sampling_interval_ms": 250 },
            "storage": { "state_dir": "run-state", "offline_root": "/mnt/offline" },
            "telemetry": { "log_format": "pretty" }
        }"#,
    )
    .await?;

    let config = load_with(
        Some(&path),
        lookup(&[("FERRY_SAMPLING_INTERVAL_MS", "500")]),
    )
    .await?;

    assert_eq!(config.transfers.large_operation_threshold_bytes, 1_048_576);
    assert_eq!(config.transfers.sampling_interval_ms, 500);
    assert_eq!(config.storage.state_dir, dir.path().join("run-state"));
    assert_eq!(config.storage.offline_root, PathBuf::from("/mnt/offline"));
    assert_eq!(
        config.storage.preview_cache_dir,
        dir.path().join(".ferry").join("cache").join("preview")
    );
    assert_eq!(config.telemetry.log_format, LogFormatSetting::Pretty);
    Ok(())
}

#[tokio::test]
async fn invalid_override_fails_validation() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("ferry.json");
    tokio::fs::write(&path, b"{}").await?;

    let err = load_with(
        Some(&path),
        lookup(&[("FERRY_LARGE_OPERATION_THRESHOLD_BYTES", "0")]),
    )
    .await
    .expect_err("zero threshold rejected");
    assert!(matches!(
        err,
        ConfigError::InvalidField { ref field, .. } if field == "large_operation_threshold_bytes"
    ));
    Ok(())
}

#[tokio::test]
async fn missing_document_is_an_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let err = load_with(Some(&dir.path().join("absent.json")), lookup(&[]))
        .await
        .expect_err("missing document");
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[tokio::test]
async fn malformed_document_is_a_parse_error() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("ferry.json");
    tokio::fs::write(&path, b"[1, 2").await?;
    let err = load_with(Some(&path), lookup(&[]))
        .await
        .expect_err("malformed document");
    assert!(matches!(err, ConfigError::Parse { .. }));
    Ok(())
}
