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

//! Persistence of per-class supervisor run state.
//!
//! Each transfer class owns one JSON document under the state directory. A
//! document that survives a process restart describes a run that was
//! interrupted mid-flight.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ferry_events::{ActiveTransferTotals, TransferClass, TriggerKind};
use ferry_transfer_core::{ResolvedDestination, TransferTrigger};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Current layout version of persisted records.
pub const RECORD_VERSION: u32 = 1;

const RECORD_SUFFIX: &str = ".run.json";

/// Error type for run-state persistence.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// File system operation failed.
    #[error("run state io failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the operation.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// Persisted record could not be decoded.
    #[error("run state record is corrupt")]
    Decode {
        /// Record path.
        path: PathBuf,
        /// Source decoding error.
        source: serde_json::Error,
    },
    /// Record could not be encoded.
    #[error("run state record could not be encoded")]
    Encode {
        /// Class of the record.
        class: TransferClass,
        /// Source encoding error.
        source: serde_json::Error,
    },
}

/// Convenience alias for run-state results.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Request accepted by a run, kept so an interrupted run can be re-dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRequest {
    /// Trigger of the request.
    pub trigger: TransferTrigger,
    /// Destination the request was resolved to.
    pub destination: ResolvedDestination,
}

/// Persisted bookkeeping of an active supervisor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Layout version.
    pub version: u32,
    /// Identifier of the run.
    pub run_id: Uuid,
    /// Class served by the run.
    pub class: TransferClass,
    /// Requests accepted by the run, in arrival order.
    pub requests: Vec<PersistedRequest>,
    /// Trigger kind of the most recent request.
    pub last_trigger: Option<TriggerKind>,
    /// Last sampled totals.
    pub totals: ActiveTransferTotals,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Fresh record for a run that just accepted its first request.
    #[must_use]
    pub fn new(run_id: Uuid, class: TransferClass, request: PersistedRequest) -> Self {
        let now = Utc::now();
        let last_trigger = Some(request.trigger.kind());
        Self {
            version: RECORD_VERSION,
            run_id,
            class,
            requests: vec![request],
            last_trigger,
            totals: ActiveTransferTotals::new(class),
            started_at: now,
            updated_at: now,
        }
    }

    /// Append a joined request.
    pub fn push_request(&mut self, request: PersistedRequest) {
        self.last_trigger = Some(request.trigger.kind());
        self.requests.push(request);
        self.updated_at = Utc::now();
    }

    /// Replace the totals snapshot.
    pub fn record_totals(&mut self, totals: &ActiveTransferTotals) {
        self.totals = totals.clone();
        self.updated_at = Utc::now();
    }
}

/// File-backed store holding one record per transfer class.
#[derive(Debug, Clone)]
pub struct RunStateStore {
    dir: PathBuf,
}

impl RunStateStore {
    /// Store rooted at `dir`; the directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `class`.
    #[must_use]
    pub fn path_for(&self, class: TransferClass) -> PathBuf {
        self.dir.join(format!("{}{RECORD_SUFFIX}", class.as_str()))
    }

    /// Load the record for `class`, if one exists.
    ///
    /// Records written with another layout version are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or decoded.
    pub async fn load(&self, class: TransferClass) -> RuntimeResult<Option<RunRecord>> {
        let path = self.path_for(class);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RuntimeError::Io {
                    operation: "run_state.load",
                    path,
                    source,
                });
            }
        };
        let record: RunRecord =
            serde_json::from_slice(&raw).map_err(|source| RuntimeError::Decode {
                path: path.clone(),
                source,
            })?;
        if record.version != RECORD_VERSION {
            warn!(
                class = %class,
                version = record.version,
                "ignoring run record with unsupported layout version"
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Load the records of every class. Unreadable records are skipped.
    pub async fn load_all(&self) -> Vec<RunRecord> {
        let mut records = Vec::new();
        for class in TransferClass::ALL {
            match self.load(class).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, class = %class, "skipping unreadable run record");
                }
            }
        }
        records
    }

    /// Persist `record`, replacing any previous record of its class.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    pub async fn save(&self, record: &RunRecord) -> RuntimeResult<()> {
        let encoded = serde_json::to_vec(record).map_err(|source| RuntimeError::Encode {
            class: record.class,
            source,
        })?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| RuntimeError::Io {
                operation: "run_state.create_dir",
                path: self.dir.clone(),
                source,
            })?;

        let path = self.path_for(record.class);
        let temp = path.with_extension("tmp");
        tokio::fs::write(&temp, &encoded)
            .await
            .map_err(|source| RuntimeError::Io {
                operation: "run_state.write",
                path: temp.clone(),
                source,
            })?;
        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|source| RuntimeError::Io {
                operation: "run_state.rename",
                path: path.clone(),
                source,
            })?;
        debug!(class = %record.class, run_id = %record.run_id, "run record saved");
        Ok(())
    }

    /// Remove the record for `class`; a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    pub async fn clear(&self, class: TransferClass) -> RuntimeResult<()> {
        let path = self.path_for(class);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(class = %class, "run record cleared");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RuntimeError::Io {
                operation: "run_state.clear",
                path,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_transfer_core::NodeRef;
    use tempfile::TempDir;

    fn request() -> PersistedRequest {
        PersistedRequest {
            trigger: TransferTrigger::DownloadNodes {
                nodes: vec![NodeRef::file(1, "a.txt", "/docs")],
                high_priority: false,
            },
            destination: ResolvedDestination::path("/tmp/downloads"),
        }
    }

    #[tokio::test]
    async fn save_load_and_clear() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = RunStateStore::new(dir.path().join("state"));
        let class = TransferClass::GeneralDownload;
        assert!(store.load(class).await?.is_none());

        let mut record = RunRecord::new(Uuid::new_v4(), class, request());
        record.totals.total_transfers = 3;
        store.save(&record).await?;

        let loaded = store.load(class).await?.expect("record present");
        assert_eq!(loaded, record);
        assert!(!store.path_for(class).with_extension("tmp").exists());

        store.clear(class).await?;
        assert!(store.load(class).await?.is_none());
        store.clear(class).await?;
        Ok(())
    }

    #[tokio::test]
    async fn load_all_skips_corrupt_records() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = RunStateStore::new(dir.path());
        let record = RunRecord::new(Uuid::new_v4(), TransferClass::GeneralDownload, request());
        store.save(&record).await?;
        tokio::fs::write(store.path_for(TransferClass::ChatUpload), b"{ broken").await?;

        let records = store.load_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_id, record.run_id);
        assert!(matches!(
            store.load(TransferClass::ChatUpload).await,
            Err(RuntimeError::Decode { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn foreign_versions_are_ignored() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = RunStateStore::new(dir.path());
        let mut record = RunRecord::new(Uuid::new_v4(), TransferClass::GeneralDownload, request());
        record.version = RECORD_VERSION + 1;
        store.save(&record).await?;
        assert!(store.load(TransferClass::GeneralDownload).await?.is_none());
        Ok(())
    }

    #[test]
    fn joined_requests_update_last_trigger() {
        let mut record = RunRecord::new(Uuid::new_v4(), TransferClass::GeneralDownload, request());
        record.push_request(PersistedRequest {
            trigger: TransferTrigger::DownloadForOffline {
                node: NodeRef::file(2, "b.txt", "/docs"),
                high_priority: false,
            },
            destination: ResolvedDestination::path("/tmp/offline/docs"),
        });
        assert_eq!(record.requests.len(), 2);
        assert_eq!(record.last_trigger, Some(TriggerKind::DownloadForOffline));
    }
}
