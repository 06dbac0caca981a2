//! Event payload types carried across the orchestration layer.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::totals::ActiveTransferTotals;

/// Identifier assigned to each event emitted on the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Logical grouping of transfers that share one aggregate totals stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferClass {
    /// Node downloads (ordinary, offline and preview).
    GeneralDownload,
    /// Uploads of local files into the remote tree.
    GeneralUpload,
    /// Attachments uploaded into a chat conversation.
    ChatUpload,
}

impl TransferClass {
    /// Every class, in a stable order.
    pub const ALL: [Self; 3] = [Self::GeneralDownload, Self::GeneralUpload, Self::ChatUpload];

    /// Stable snake-case identifier used in logs, metrics and file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GeneralDownload => "general_download",
            Self::GeneralUpload => "general_upload",
            Self::ChatUpload => "chat_upload",
        }
    }

    /// Whether transfers of this class move bytes away from the device.
    #[must_use]
    pub const fn is_upload(self) -> bool {
        matches!(self, Self::GeneralUpload | Self::ChatUpload)
    }
}

impl Display for TransferClass {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Discriminant of the trigger that started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Ordinary download of one or more nodes.
    DownloadNodes,
    /// Node saved for offline use.
    DownloadForOffline,
    /// Node fetched into the preview cache.
    DownloadForPreview,
    /// Local files attached to a chat.
    UploadChatAttachment,
}

impl TriggerKind {
    /// Stable snake-case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DownloadNodes => "download_nodes",
            Self::DownloadForOffline => "download_for_offline",
            Self::DownloadForPreview => "download_for_preview",
            Self::UploadChatAttachment => "upload_chat_attachment",
        }
    }
}

impl Display for TriggerKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// What the supervisor is doing, for surfaces that need an indeterminate state
/// before totals are known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobInProgressState {
    /// Expanding folders or resolving sources before any transfer is known.
    ScanningFiles,
    /// Transfers are being enumerated and started.
    ProcessingFiles,
    /// Nothing in progress.
    #[default]
    Idle,
}

impl JobInProgressState {
    /// Whether an indeterminate progress indicator should be shown.
    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Lifecycle phase of a supervisor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorPhase {
    /// No run is active.
    #[default]
    Idle,
    /// Reconciling bookkeeping left behind by an interrupted run.
    CorrectingPriorState,
    /// Waiting for the engine to enumerate transfers.
    Scanning,
    /// Folding sampled event batches.
    Transferring,
    /// Computing the final totals and outcome.
    Finalizing,
    /// The run has reported its outcome.
    Terminal,
}

impl SupervisorPhase {
    /// Stable snake-case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CorrectingPriorState => "correcting_prior_state",
            Self::Scanning => "scanning",
            Self::Transferring => "transferring",
            Self::Finalizing => "finalizing",
            Self::Terminal => "terminal",
        }
    }
}

/// How a supervisor run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every known transfer finished; `failed` of them with an error.
    Completed {
        /// Transfers that finished with an error.
        failed: u32,
    },
    /// The event streams ended before every transfer finished.
    Incomplete,
    /// The run was cancelled.
    Cancelled,
    /// The destination ran out of space.
    InsufficientSpace,
}

impl RunOutcome {
    /// Result handed to the host scheduler.
    #[must_use]
    pub const fn worker_result(self) -> WorkerResult {
        match self {
            Self::Completed { .. } => WorkerResult::Success,
            Self::Incomplete | Self::Cancelled | Self::InsufficientSpace => WorkerResult::Failure,
        }
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed { failed: 0 } => "completed",
            Self::Completed { .. } => "partial_failure",
            Self::Incomplete => "incomplete",
            Self::Cancelled => "cancelled",
            Self::InsufficientSpace => "insufficient_space",
        }
    }
}

/// Result consumed by the host scheduler to decide whether to re-enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerResult {
    /// The run completed.
    Success,
    /// The run failed or was interrupted.
    Failure,
}

/// Typed events published by supervisors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new supervisor run started for a class.
    RunStarted {
        /// Class served by the run.
        class: TransferClass,
        /// Identifier of the run.
        run_id: Uuid,
        /// Trigger that started the run.
        trigger: TriggerKind,
    },
    /// A request joined a run that was already active.
    RunJoined {
        /// Class served by the run.
        class: TransferClass,
        /// Identifier of the joined run.
        run_id: Uuid,
        /// Trigger of the joining request.
        trigger: TriggerKind,
    },
    /// A run moved to a new phase.
    PhaseChanged {
        /// Class served by the run.
        class: TransferClass,
        /// Identifier of the run.
        run_id: Uuid,
        /// Phase entered.
        phase: SupervisorPhase,
    },
    /// The indeterminate job state for a class changed.
    JobStateChanged {
        /// Class whose job state changed.
        class: TransferClass,
        /// New job state.
        state: JobInProgressState,
    },
    /// A sampled batch was folded into new totals.
    TotalsUpdated {
        /// Class the totals belong to.
        class: TransferClass,
        /// Identifier of the run.
        run_id: Uuid,
        /// Totals after the batch.
        totals: ActiveTransferTotals,
    },
    /// A run reached its terminal outcome.
    RunFinished {
        /// Class served by the run.
        class: TransferClass,
        /// Identifier of the run.
        run_id: Uuid,
        /// Terminal outcome.
        outcome: RunOutcome,
        /// Final totals snapshot.
        totals: ActiveTransferTotals,
    },
    /// Active-transfer bookkeeping for a class was cleared after a run.
    TransfersCleared {
        /// Class whose bookkeeping was cleared.
        class: TransferClass,
        /// Identifier of the run that was cleared.
        run_id: Uuid,
        /// Trigger of the most recent request in the run.
        last_trigger: Option<TriggerKind>,
        /// Outcome of the cleared run.
        outcome: RunOutcome,
        /// Final totals snapshot.
        totals: ActiveTransferTotals,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunJoined { .. } => "run_joined",
            Self::PhaseChanged { .. } => "phase_changed",
            Self::JobStateChanged { .. } => "job_state_changed",
            Self::TotalsUpdated { .. } => "totals_updated",
            Self::RunFinished { .. } => "run_finished",
            Self::TransfersCleared { .. } => "transfers_cleared",
        }
    }

    /// Class the event belongs to.
    #[must_use]
    pub const fn class(&self) -> TransferClass {
        match self {
            Self::RunStarted { class, .. }
            | Self::RunJoined { class, .. }
            | Self::PhaseChanged { class, .. }
            | Self::JobStateChanged { class, .. }
            | Self::TotalsUpdated { class, .. }
            | Self::RunFinished { class, .. }
            | Self::TransfersCleared { class, .. } => *class,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}
