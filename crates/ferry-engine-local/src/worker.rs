//! Copy worker driving one request.
//!
//! # Design
//! - Each request gets its own task that owns the event sender; the stream
//!   ends when the task returns.
//! - Progress is coalesced so slow consumers are not flooded.
//! - A dropped receiver stops the task at the next send.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use ferry_events::{TransferClass, TransferTag};
use ferry_transfer_core::{TransferEvent, TransferTrigger};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::LocalEngineError;
use crate::ledger::Ledger;
use crate::plan::{self, PlannedCopy};

/// Minimum spacing between progress events of one transfer.
pub const PROGRESS_COALESCE_INTERVAL: Duration = Duration::from_millis(100);

const PARTIAL_SUFFIX: &str = "part";

/// Everything a worker needs to run one request.
pub(crate) struct Job {
    /// Class the request belongs to.
    pub(crate) class: TransferClass,
    /// Request being executed.
    pub(crate) trigger: TransferTrigger,
    /// Directory the request writes into.
    pub(crate) target_dir: PathBuf,
    /// Root that node paths are resolved against.
    pub(crate) source_root: PathBuf,
    /// Bytes read per chunk.
    pub(crate) chunk_size: usize,
}

/// Shared engine state handed to each worker.
pub(crate) struct Shared {
    /// Finished transfers and throughput per class.
    pub(crate) ledger: Ledger,
    /// Source of transfer tags.
    pub(crate) next_tag: AtomicU64,
}

/// Why a worker stopped before copying everything.
enum Halt {
    ReceiverGone,
    StorageFull,
}

/// Spawn the worker for `job`, reporting on `events`.
pub(crate) fn spawn(job: Job, shared: Arc<Shared>, events: mpsc::Sender<TransferEvent>) {
    tokio::spawn(async move {
        match run(&job, &shared, &events).await {
            Ok(()) => debug!(class = %job.class, "local transfer request finished"),
            Err(Halt::ReceiverGone) => {
                debug!(class = %job.class, "event receiver dropped; stopping request");
            }
            Err(Halt::StorageFull) => {
                warn!(class = %job.class, "destination is out of space");
                let _ = events.send(TransferEvent::InsufficientSpace).await;
            }
        }
    });
}

async fn run(
    job: &Job,
    shared: &Shared,
    events: &mpsc::Sender<TransferEvent>,
) -> Result<(), Halt> {
    let copies = enumerate(job).await;

    let mut tagged = Vec::with_capacity(copies.len());
    for copy in copies {
        let tag = shared.next_tag.fetch_add(1, Ordering::Relaxed);
        send(
            events,
            TransferEvent::Queued {
                tag,
                expected_bytes: copy.expected_bytes,
            },
        )
        .await?;
        tagged.push((tag, copy));
    }
    send(events, TransferEvent::AllUpdated).await?;

    for (tag, copy) in tagged {
        let result = transfer_one(job, shared, events, tag, &copy).await;
        shared.ledger.mark_finished(job.class, tag);
        result?;
    }
    Ok(())
}

async fn enumerate(job: &Job) -> Vec<PlannedCopy> {
    let source_root = job.source_root.clone();
    let target_dir = job.target_dir.clone();
    let trigger = job.trigger.clone();
    match tokio::task::spawn_blocking(move || plan::plan(&source_root, &target_dir, &trigger))
        .await
    {
        Ok(copies) => copies,
        Err(err) => {
            warn!(error = %err, class = %job.class, "enumeration task failed");
            Vec::new()
        }
    }
}

async fn transfer_one(
    job: &Job,
    shared: &Shared,
    events: &mpsc::Sender<TransferEvent>,
    tag: TransferTag,
    copy: &PlannedCopy,
) -> Result<(), Halt> {
    if let Some(problem) = &copy.problem {
        return finish(events, tag, Some(problem)).await;
    }
    if let Ok(existing) = fs::metadata(&copy.target).await
        && existing.is_file()
        && existing.len() == copy.expected_bytes
    {
        return send(
            events,
            TransferEvent::AlreadyTransferred {
                tag,
                bytes: existing.len(),
            },
        )
        .await;
    }

    send(
        events,
        TransferEvent::Started {
            tag,
            expected_bytes: copy.expected_bytes,
        },
    )
    .await?;

    match copy_file(job, shared, events, tag, copy).await {
        Ok(()) => finish(events, tag, None).await,
        Err(CopyError::Halt(halt)) => Err(halt),
        Err(CopyError::Io(err)) if err.is_storage_full() => {
            finish(events, tag, Some(&err)).await?;
            Err(Halt::StorageFull)
        }
        Err(CopyError::Io(err)) => {
            warn!(
                error = %err,
                class = %job.class,
                tag,
                path = %copy.target.display(),
                "local copy failed"
            );
            finish(events, tag, Some(&err)).await
        }
    }
}

enum CopyError {
    Halt(Halt),
    Io(LocalEngineError),
}

impl From<Halt> for CopyError {
    fn from(halt: Halt) -> Self {
        Self::Halt(halt)
    }
}

async fn copy_file(
    job: &Job,
    shared: &Shared,
    events: &mpsc::Sender<TransferEvent>,
    tag: TransferTag,
    copy: &PlannedCopy,
) -> Result<(), CopyError> {
    if let Some(parent) = copy.target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| io_error("copy.create_dir", parent, source))?;
    }
    let partial = copy.target.with_extension(partial_extension(&copy.target));
    let mut reader = fs::File::open(&copy.source)
        .await
        .map_err(|source| io_error("copy.open", &copy.source, source))?;
    let mut writer = fs::File::create(&partial)
        .await
        .map_err(|source| io_error("copy.create", &partial, source))?;

    let mut buffer = vec![0_u8; job.chunk_size.max(1)];
    let mut transferred = 0_u64;
    let mut last_report = Instant::now();
    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .map_err(|source| io_error("copy.read", &copy.source, source))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .await
            .map_err(|source| io_error("copy.write", &partial, source))?;
        let delta = u64::try_from(read).unwrap_or(u64::MAX);
        transferred += delta;
        shared.ledger.record_bytes(job.class, delta);

        if last_report.elapsed() >= PROGRESS_COALESCE_INTERVAL {
            last_report = Instant::now();
            send(
                events,
                TransferEvent::Progress {
                    tag,
                    transferred_bytes: transferred,
                    at: Utc::now(),
                },
            )
            .await?;
        }
    }
    writer
        .flush()
        .await
        .map_err(|source| io_error("copy.flush", &partial, source))?;
    drop(writer);
    fs::rename(&partial, &copy.target)
        .await
        .map_err(|source| io_error("copy.rename", &copy.target, source))?;

    send(
        events,
        TransferEvent::Progress {
            tag,
            transferred_bytes: transferred,
            at: Utc::now(),
        },
    )
    .await?;
    Ok(())
}

fn partial_extension(target: &Path) -> String {
    target.extension().map_or_else(
        || PARTIAL_SUFFIX.to_string(),
        |ext| format!("{}.{PARTIAL_SUFFIX}", ext.to_string_lossy()),
    )
}

fn io_error(operation: &'static str, path: &Path, source: std::io::Error) -> CopyError {
    CopyError::Io(LocalEngineError::Io {
        operation,
        path: path.to_path_buf(),
        source,
    })
}

async fn finish(
    events: &mpsc::Sender<TransferEvent>,
    tag: TransferTag,
    problem: Option<&LocalEngineError>,
) -> Result<(), Halt> {
    send(
        events,
        TransferEvent::Finished {
            tag,
            error: problem.map(LocalEngineError::to_failure),
            at: Utc::now(),
        },
    )
    .await
}

async fn send(events: &mpsc::Sender<TransferEvent>, event: TransferEvent) -> Result<(), Halt> {
    events.send(event).await.map_err(|_| Halt::ReceiverGone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_the_original_extension() {
        assert_eq!(partial_extension(Path::new("/a/b.txt")), "txt.part");
        assert_eq!(partial_extension(Path::new("/a/README")), "part");
    }
}
