//! Collaborator traits consumed by the orchestration layer.

use std::pin::Pin;

use anyhow::bail;
use async_trait::async_trait;
use ferry_events::{ActiveTransferTotals, RunOutcome, TransferClass};
use tokio_stream::Stream;

use crate::model::{
    NodeRef, Notification, NotificationId, ResolvedDestination, TransferEvent, TransferTrigger,
};

/// Stream of engine events for one request; ends when the engine stops
/// reporting, and dropping it cancels the request's reporting.
pub type TransferEventStream = Pin<Box<dyn Stream<Item = TransferEvent> + Send>>;

/// Byte-moving engine implemented by adapters.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Start every transfer described by `trigger` into `destination`.
    async fn start_transfers(
        &self,
        destination: &ResolvedDestination,
        trigger: &TransferTrigger,
    ) -> anyhow::Result<TransferEventStream>;

    /// Drop the engine's bookkeeping of finished transfers for a class.
    async fn clear_finished_transfers(&self, class: TransferClass) -> anyhow::Result<()>;

    /// Current aggregate speed of a class in bytes per second.
    async fn current_speed(&self, class: TransferClass) -> anyhow::Result<u64> {
        let _ = class;
        bail!("speed reporting not supported by this engine");
    }
}

/// User preferences read by the resolver and the guard.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Remembered download location, if any.
    async fn download_location(&self) -> anyhow::Result<Option<String>>;

    /// Store or clear the remembered download location.
    async fn set_download_location(&self, location: Option<String>) -> anyhow::Result<()>;

    /// Whether the user wants to pick a destination for every download.
    async fn ask_every_time(&self) -> anyhow::Result<bool>;

    /// Update the ask-every-time flag.
    async fn set_ask_every_time(&self, value: bool) -> anyhow::Result<()>;

    /// Whether large downloads need confirmation.
    async fn ask_before_large_downloads(&self) -> anyhow::Result<bool>;

    /// Update the large-download confirmation flag.
    async fn set_ask_before_large_downloads(&self, value: bool) -> anyhow::Result<()>;

    /// Whether the "remember this destination" prompt was opted out of.
    async fn skip_save_destination_prompt(&self) -> anyhow::Result<bool>;

    /// Update the save-destination prompt opt-out.
    async fn set_skip_save_destination_prompt(&self, value: bool) -> anyhow::Result<()>;
}

/// Renders totals into notifications.
pub trait NotificationBuilder: Send + Sync {
    /// Progress notification for a sample.
    fn build(&self, totals: &ActiveTransferTotals, is_upload: bool) -> Notification;

    /// Notification for a run that ended, built from its final totals.
    fn build_finished(&self, totals: &ActiveTransferTotals, outcome: RunOutcome) -> Notification;

    /// Over-quota warning.
    fn build_over_quota(&self, is_paywall: bool) -> Notification;
}

/// Displays notifications.
pub trait NotificationPoster: Send + Sync {
    /// Post or replace the notification under `id`.
    fn post(&self, id: NotificationId, notification: Notification);
}

/// Network reachability.
pub trait ConnectivityOracle: Send + Sync {
    /// Whether the device is online.
    fn is_connected(&self) -> bool;
}

/// Payload size of node sets.
#[async_trait]
pub trait SizeCalculator: Send + Sync {
    /// Total size in bytes, folders recursed.
    async fn total_size(&self, nodes: &[NodeRef]) -> anyhow::Result<u64>;
}

/// Account storage quota.
#[async_trait]
pub trait QuotaOracle: Send + Sync {
    /// Whether the account is over its storage quota.
    async fn is_storage_over_quota(&self) -> anyhow::Result<bool>;
}

/// Rating prompt heuristic.
pub trait RatingPolicy: Send + Sync {
    /// Whether the sampled speed and payload justify prompting.
    fn should_prompt(&self, speed_bps: u64, total_bytes: u64) -> bool;

    /// Show the rating prompt.
    fn show_prompt(&self);
}

/// Folder or tree picker shown for ask-every-time downloads.
#[async_trait]
pub trait DestinationPicker: Send + Sync {
    /// Ask for a destination; `None` when the user cancelled.
    async fn pick(&self, trigger: &TransferTrigger) -> Option<String>;
}
