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

//! Filesystem-backed transfer engine.
//!
//! Nodes are files and folders below a source root; downloads copy them into
//! the resolved destination and chat uploads land in a per-chat folder.
//!
//! Layout: `plan.rs` (trigger expansion), `worker.rs` (copy task),
//! `ledger.rs` (finished transfers and speed), `size.rs` (size calculator),
//! `error.rs` (engine errors).

pub mod error;
pub mod ledger;
pub mod plan;
pub mod size;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use anyhow::Result;
use async_trait::async_trait;
use ferry_events::TransferClass;
use ferry_transfer_core::{
    ChatId, ResolvedDestination, TransferEngine, TransferEventStream, TransferTrigger,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

pub use error::LocalEngineError;
pub use ledger::Ledger;
pub use size::LocalSizeCalculator;
pub use worker::PROGRESS_COALESCE_INTERVAL;

use worker::{Job, Shared};

/// Bytes read per chunk when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const EVENT_BUFFER: usize = 128;

/// Where the engine reads from and writes chat uploads to.
#[derive(Debug, Clone)]
pub struct LocalEngineConfig {
    /// Root that node paths are resolved against.
    pub source_root: PathBuf,
    /// Root of the per-chat upload folders.
    pub upload_root: PathBuf,
    /// Bytes read per chunk.
    pub chunk_size: usize,
}

impl LocalEngineConfig {
    /// Configuration with the default chunk size.
    #[must_use]
    pub fn new(source_root: impl Into<PathBuf>, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            upload_root: upload_root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Transfer engine that copies between local directories.
#[derive(Clone)]
pub struct LocalEngine {
    config: Arc<LocalEngineConfig>,
    shared: Arc<Shared>,
}

impl LocalEngine {
    /// Build an engine over `config`.
    #[must_use]
    pub fn new(config: LocalEngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            shared: Arc::new(Shared {
                ledger: Ledger::default(),
                next_tag: AtomicU64::new(1),
            }),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &LocalEngineConfig {
        &self.config
    }

    /// Folder receiving uploads for a chat.
    #[must_use]
    pub fn chat_dir(&self, chat_id: ChatId) -> PathBuf {
        self.config.upload_root.join(format!("chat-{}", chat_id.0))
    }

    /// Finished transfers the engine still tracks for a class.
    #[must_use]
    pub fn finished_count(&self, class: TransferClass) -> usize {
        self.shared.ledger.finished_count(class)
    }

    fn target_dir(&self, destination: &ResolvedDestination) -> Result<PathBuf> {
        match destination {
            ResolvedDestination::Path { path } => Ok(path.clone()),
            ResolvedDestination::Chat { chat_id } => Ok(self.chat_dir(*chat_id)),
            ResolvedDestination::Uri { .. } => Err(LocalEngineError::UnsupportedDestination {
                destination: destination.to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl TransferEngine for LocalEngine {
    async fn start_transfers(
        &self,
        destination: &ResolvedDestination,
        trigger: &TransferTrigger,
    ) -> Result<TransferEventStream> {
        let target_dir = self.target_dir(destination)?;
        let class = trigger.class();
        info!(
            class = %class,
            destination = %target_dir.display(),
            items = trigger.item_count(),
            "starting local transfers"
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let job = Job {
            class,
            trigger: trigger.clone(),
            target_dir,
            source_root: self.config.source_root.clone(),
            chunk_size: self.config.chunk_size,
        };
        worker::spawn(job, Arc::clone(&self.shared), tx);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn clear_finished_transfers(&self, class: TransferClass) -> Result<()> {
        self.shared.ledger.clear_finished(class);
        Ok(())
    }

    async fn current_speed(&self, class: TransferClass) -> Result<u64> {
        Ok(self.shared.ledger.speed(class))
    }
}
