//! User preferences persisted as a JSON document.
//!
//! Reads are served from memory; every write replaces the document with a
//! temp-file rename so a crash never leaves a truncated file behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ferry_transfer_core::PreferenceStore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};

/// Preference values read by the resolver and the guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferPreferences {
    /// Remembered download location: absolute path or content URI.
    pub download_location: Option<String>,
    /// Pick a destination for every download.
    pub ask_every_time: bool,
    /// Confirm downloads above the size threshold.
    pub ask_before_large_downloads: bool,
    /// Never offer to remember a picked destination.
    pub skip_save_destination_prompt: bool,
}

impl Default for TransferPreferences {
    fn default() -> Self {
        Self {
            download_location: None,
            ask_every_time: false,
            ask_before_large_downloads: true,
            skip_save_destination_prompt: false,
        }
    }
}

/// [`PreferenceStore`] backed by a JSON file.
pub struct FilePreferenceStore {
    path: PathBuf,
    state: Mutex<TransferPreferences>,
}

impl FilePreferenceStore {
    /// Open the store, starting from defaults when the document does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing document cannot be read or decoded.
    pub async fn open(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "preference document missing; using defaults");
                TransferPreferences::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    operation: "preferences.open",
                    path,
                    source,
                });
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current preference values.
    pub async fn snapshot(&self) -> TransferPreferences {
        self.state.lock().await.clone()
    }

    /// Apply `change` and persist the result.
    ///
    /// The in-memory value is only replaced once the document was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be encoded or written.
    pub async fn update<F>(&self, change: F) -> ConfigResult<TransferPreferences>
    where
        F: FnOnce(&mut TransferPreferences),
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        change(&mut next);
        if next == *state {
            return Ok(next);
        }
        write_document(&self.path, &next).await?;
        *state = next.clone();
        Ok(next)
    }
}

async fn write_document(path: &Path, preferences: &TransferPreferences) -> ConfigResult<()> {
    let encoded =
        serde_json::to_vec_pretty(preferences).map_err(|source| ConfigError::Encode {
            operation: "preferences.encode",
            source,
        })?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ConfigError::Io {
                operation: "preferences.create_dir",
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, &encoded)
        .await
        .map_err(|source| ConfigError::Io {
            operation: "preferences.write",
            path: temp.clone(),
            source,
        })?;
    if let Err(source) = tokio::fs::rename(&temp, path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
            warn!(error = %cleanup, path = %temp.display(), "failed to remove temp preference file");
        }
        return Err(ConfigError::Io {
            operation: "preferences.rename",
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn download_location(&self) -> anyhow::Result<Option<String>> {
        Ok(self.state.lock().await.download_location.clone())
    }

    async fn set_download_location(&self, location: Option<String>) -> anyhow::Result<()> {
        self.update(|prefs| prefs.download_location = location)
            .await?;
        Ok(())
    }

    async fn ask_every_time(&self) -> anyhow::Result<bool> {
        Ok(self.state.lock().await.ask_every_time)
    }

    async fn set_ask_every_time(&self, value: bool) -> anyhow::Result<()> {
        self.update(|prefs| prefs.ask_every_time = value).await?;
        Ok(())
    }

    async fn ask_before_large_downloads(&self) -> anyhow::Result<bool> {
        Ok(self.state.lock().await.ask_before_large_downloads)
    }

    async fn set_ask_before_large_downloads(&self, value: bool) -> anyhow::Result<()> {
        self.update(|prefs| prefs.ask_before_large_downloads = value)
            .await?;
        Ok(())
    }

    async fn skip_save_destination_prompt(&self) -> anyhow::Result<bool> {
        Ok(self.state.lock().await.skip_save_destination_prompt)
    }

    async fn set_skip_save_destination_prompt(&self, value: bool) -> anyhow::Result<()> {
        self.update(|prefs| prefs.skip_save_destination_prompt = value)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_document_yields_defaults() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = FilePreferenceStore::open(dir.path().join("prefs.json")).await?;
        let prefs = store.snapshot().await;
        assert_eq!(prefs, TransferPreferences::default());
        assert!(prefs.ask_before_large_downloads);
        Ok(())
    }

    #[tokio::test]
    async fn writes_survive_reopen() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("prefs.json");
        let store = FilePreferenceStore::open(&path).await?;
        store
            .set_download_location(Some("/storage/Download".to_string()))
            .await?;
        store.set_ask_before_large_downloads(false).await?;

        let reopened = FilePreferenceStore::open(&path).await?;
        assert_eq!(
            reopened.download_location().await?.as_deref(),
            Some("/storage/Download")
        );
        assert!(!reopened.ask_before_large_downloads().await?);
        assert!(!path.with_extension("json.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn unchanged_update_does_not_write() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("prefs.json");
        let store = FilePreferenceStore::open(&path).await?;
        store.set_ask_every_time(false).await?;
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_document_is_reported() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("prefs.json");
        tokio::fs::write(&path, b"{ not json").await?;
        let result = FilePreferenceStore::open(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
        Ok(())
    }
}
