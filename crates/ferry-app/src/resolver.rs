//! Destination resolution for transfer triggers.
//!
//! # Design
//! - Previews never read preferences; offline saves derive their folder from
//!   the node's remote location.
//! - Ordinary downloads either ask through the picker or reuse the remembered
//!   location, falling back to the configured default directory.
//! - Directories are created before the engine sees them; content URIs are
//!   tagged instead of created.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferry_config::StorageSettings;
use ferry_transfer_core::{
    DestinationPicker, NodeRef, PreferenceStore, ResolvedDestination, TransferError,
    TransferResult, TransferTrigger,
};
use tracing::{debug, info};

/// Outcome of resolving a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Where the engine writes.
    pub destination: ResolvedDestination,
    /// Raw location chosen in the picker, when the user picked one.
    pub picked: Option<String>,
}

impl Resolution {
    const fn fixed(destination: ResolvedDestination) -> Self {
        Self {
            destination,
            picked: None,
        }
    }
}

/// Maps triggers to concrete destinations.
pub struct DestinationResolver {
    storage: StorageSettings,
    preferences: Arc<dyn PreferenceStore>,
    picker: Arc<dyn DestinationPicker>,
}

impl DestinationResolver {
    /// Build a resolver over the configured storage roots.
    #[must_use]
    pub fn new(
        storage: StorageSettings,
        preferences: Arc<dyn PreferenceStore>,
        picker: Arc<dyn DestinationPicker>,
    ) -> Self {
        Self {
            storage,
            preferences,
            picker,
        }
    }

    /// Resolve where `trigger` should be written.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::DestinationUnresolved`] when the picker is
    /// cancelled, the location cannot be parsed, or a directory cannot be
    /// created, and [`TransferError::Engine`] when preferences are unreadable.
    pub async fn resolve(&self, trigger: &TransferTrigger) -> TransferResult<Resolution> {
        let resolution = match trigger {
            TransferTrigger::DownloadForPreview { .. } => {
                let dir = ensure_dir(&self.storage.preview_cache_dir).await?;
                Resolution::fixed(ResolvedDestination::path(dir))
            }
            TransferTrigger::DownloadForOffline { node, .. } => {
                let dir = ensure_dir(&offline_dir(&self.storage.offline_root, node)).await?;
                Resolution::fixed(ResolvedDestination::path(dir))
            }
            TransferTrigger::UploadChatAttachment { chat_id, .. } => {
                Resolution::fixed(ResolvedDestination::Chat { chat_id: *chat_id })
            }
            TransferTrigger::DownloadNodes { .. } => self.resolve_download(trigger).await?,
        };
        info!(
            trigger = %trigger.kind(),
            destination = %resolution.destination,
            picked = resolution.picked.is_some(),
            "destination resolved"
        );
        Ok(resolution)
    }

    async fn resolve_download(&self, trigger: &TransferTrigger) -> TransferResult<Resolution> {
        let ask = self
            .preferences
            .ask_every_time()
            .await
            .map_err(|err| TransferError::engine("preferences.ask_every_time", err))?;

        if ask {
            debug!("asking for a download destination");
            let Some(raw) = self.picker.pick(trigger).await else {
                return Err(TransferError::DestinationUnresolved {
                    reason: "picker_cancelled",
                    value: None,
                });
            };
            let destination = materialize(&raw).await?;
            return Ok(Resolution {
                destination,
                picked: Some(raw),
            });
        }

        let remembered = self
            .preferences
            .download_location()
            .await
            .map_err(|err| TransferError::engine("preferences.download_location", err))?;
        let destination = match remembered {
            Some(raw) if !raw.trim().is_empty() => materialize(&raw).await?,
            _ => ResolvedDestination::path(ensure_dir(&self.storage.default_download_dir).await?),
        };
        Ok(Resolution::fixed(destination))
    }
}

/// Offline folder of a node: the offline root plus the node's remote parents.
#[must_use]
pub fn offline_dir(offline_root: &Path, node: &NodeRef) -> PathBuf {
    let mut dir = offline_root.to_path_buf();
    dir.extend(node.parent_components());
    dir
}

async fn materialize(raw: &str) -> TransferResult<ResolvedDestination> {
    let destination =
        ResolvedDestination::parse_location(raw).ok_or_else(|| {
            TransferError::DestinationUnresolved {
                reason: "unparseable_location",
                value: Some(raw.to_string()),
            }
        })?;
    if let Some(path) = destination.as_path() {
        ensure_dir(path).await?;
    }
    Ok(destination)
}

async fn ensure_dir(path: &Path) -> TransferResult<PathBuf> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|_| TransferError::DestinationUnresolved {
            reason: "storage_unavailable",
            value: Some(path.display().to_string()),
        })?;
    Ok(path.to_path_buf())
}
