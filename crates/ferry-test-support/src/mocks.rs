//! Scripted collaborators for orchestration tests.
//!
//! Every mock records what it was asked so tests can assert on the calls
//! instead of on timing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use ferry_config::TransferPreferences;
use ferry_events::{ActiveTransferTotals, RunOutcome, TransferClass};
use ferry_transfer_core::{
    ConnectivityOracle, DestinationPicker, NodeRef, Notification, NotificationBuilder,
    NotificationId, NotificationPoster, NotificationProgress, PreferenceStore, QuotaOracle,
    RatingPolicy, ResolvedDestination, SizeCalculator, TransferEngine, TransferEvent,
    TransferEventStream, TransferTrigger,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Script {
    Events(Vec<TransferEvent>),
    Channel(mpsc::UnboundedReceiver<TransferEvent>),
    Fail(String),
}

/// Engine that replays scripted event sequences, one per `start_transfers`.
///
/// Unscripted calls produce an empty stream.
#[derive(Default)]
pub struct ScriptedEngine {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<(ResolvedDestination, TransferTrigger)>>,
    cleared: Mutex<Vec<TransferClass>>,
    speed: AtomicU64,
}

impl ScriptedEngine {
    /// Engine with no scripts queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a finite event list for the next request.
    pub fn push_events(&self, events: Vec<TransferEvent>) {
        lock(&self.scripts).push_back(Script::Events(events));
    }

    /// Queue a live stream for the next request; it ends when the returned
    /// sender is dropped.
    #[must_use]
    pub fn push_channel(&self) -> mpsc::UnboundedSender<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.scripts).push_back(Script::Channel(rx));
        tx
    }

    /// Make the next request fail to start.
    pub fn push_failure(&self, message: &str) {
        lock(&self.scripts).push_back(Script::Fail(message.to_string()));
    }

    /// Speed reported by [`TransferEngine::current_speed`].
    pub fn set_speed(&self, bytes_per_second: u64) {
        self.speed.store(bytes_per_second, Ordering::SeqCst);
    }

    /// Requests started so far.
    #[must_use]
    pub fn calls(&self) -> Vec<(ResolvedDestination, TransferTrigger)> {
        lock(&self.calls).clone()
    }

    /// Classes whose finished transfers were cleared, in order.
    #[must_use]
    pub fn cleared(&self) -> Vec<TransferClass> {
        lock(&self.cleared).clone()
    }
}

#[async_trait]
impl TransferEngine for ScriptedEngine {
    async fn start_transfers(
        &self,
        destination: &ResolvedDestination,
        trigger: &TransferTrigger,
    ) -> Result<TransferEventStream> {
        lock(&self.calls).push((destination.clone(), trigger.clone()));
        let script = lock(&self.scripts).pop_front();
        match script {
            None => Ok(Box::pin(tokio_stream::empty())),
            Some(Script::Events(events)) => Ok(Box::pin(tokio_stream::iter(events))),
            Some(Script::Channel(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(Script::Fail(message)) => Err(anyhow!(message)),
        }
    }

    async fn clear_finished_transfers(&self, class: TransferClass) -> Result<()> {
        lock(&self.cleared).push(class);
        Ok(())
    }

    async fn current_speed(&self, _class: TransferClass) -> Result<u64> {
        Ok(self.speed.load(Ordering::SeqCst))
    }
}

/// In-memory preference store.
#[derive(Default)]
pub struct MemoryPreferences {
    state: Mutex<TransferPreferences>,
    fail_reads: AtomicBool,
}

impl MemoryPreferences {
    /// Store seeded with `preferences`.
    #[must_use]
    pub fn with(preferences: TransferPreferences) -> Self {
        Self {
            state: Mutex::new(preferences),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> TransferPreferences {
        lock(&self.state).clone()
    }

    /// Make every read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn read<T>(&self, pick: impl FnOnce(&TransferPreferences) -> T) -> Result<T> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("preference store unavailable");
        }
        Ok(pick(&lock(&self.state)))
    }

    fn write(&self, apply: impl FnOnce(&mut TransferPreferences)) {
        apply(&mut lock(&self.state));
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn download_location(&self) -> Result<Option<String>> {
        self.read(|prefs| prefs.download_location.clone())
    }

    async fn set_download_location(&self, location: Option<String>) -> Result<()> {
        self.write(|prefs| prefs.download_location = location);
        Ok(())
    }

    async fn ask_every_time(&self) -> Result<bool> {
        self.read(|prefs| prefs.ask_every_time)
    }

    async fn set_ask_every_time(&self, value: bool) -> Result<()> {
        self.write(|prefs| prefs.ask_every_time = value);
        Ok(())
    }

    async fn ask_before_large_downloads(&self) -> Result<bool> {
        self.read(|prefs| prefs.ask_before_large_downloads)
    }

    async fn set_ask_before_large_downloads(&self, value: bool) -> Result<()> {
        self.write(|prefs| prefs.ask_before_large_downloads = value);
        Ok(())
    }

    async fn skip_save_destination_prompt(&self) -> Result<bool> {
        self.read(|prefs| prefs.skip_save_destination_prompt)
    }

    async fn set_skip_save_destination_prompt(&self, value: bool) -> Result<()> {
        self.write(|prefs| prefs.skip_save_destination_prompt = value);
        Ok(())
    }
}

/// Notification builder and poster that records everything.
#[derive(Default)]
pub struct RecordingNotifications {
    posted: Mutex<Vec<(NotificationId, Notification)>>,
    finished_totals: Mutex<Vec<ActiveTransferTotals>>,
    finished_outcomes: Mutex<Vec<RunOutcome>>,
}

impl RecordingNotifications {
    /// Recorder with nothing posted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every posted notification, in order.
    #[must_use]
    pub fn posted(&self) -> Vec<(NotificationId, Notification)> {
        lock(&self.posted).clone()
    }

    /// Notifications posted under `id`, in order.
    #[must_use]
    pub fn posted_under(&self, id: NotificationId) -> Vec<Notification> {
        lock(&self.posted)
            .iter()
            .filter(|(posted_id, _)| *posted_id == id)
            .map(|(_, notification)| notification.clone())
            .collect()
    }

    /// Totals handed to [`NotificationBuilder::build_finished`].
    #[must_use]
    pub fn finished_totals(&self) -> Vec<ActiveTransferTotals> {
        lock(&self.finished_totals).clone()
    }

    /// Outcomes handed to [`NotificationBuilder::build_finished`].
    #[must_use]
    pub fn finished_outcomes(&self) -> Vec<RunOutcome> {
        lock(&self.finished_outcomes).clone()
    }
}

impl NotificationBuilder for RecordingNotifications {
    fn build(&self, totals: &ActiveTransferTotals, is_upload: bool) -> Notification {
        let verb = if is_upload { "Uploading" } else { "Downloading" };
        Notification {
            title: format!("{verb} {}/{}", totals.finished(), totals.total_transfers),
            body: totals.class.to_string(),
            progress: Some(NotificationProgress {
                current: totals.transferred_bytes,
                max: totals.total_bytes,
            }),
            ongoing: true,
        }
    }

    fn build_finished(&self, totals: &ActiveTransferTotals, outcome: RunOutcome) -> Notification {
        lock(&self.finished_totals).push(totals.clone());
        lock(&self.finished_outcomes).push(outcome);
        Notification {
            title: format!("{} {}", totals.completed, outcome.as_str()),
            body: format!("{} failed", totals.failed),
            progress: None,
            ongoing: false,
        }
    }

    fn build_over_quota(&self, is_paywall: bool) -> Notification {
        Notification {
            title: "Storage full".to_string(),
            body: if is_paywall { "paywall" } else { "over quota" }.to_string(),
            progress: None,
            ongoing: false,
        }
    }
}

impl NotificationPoster for RecordingNotifications {
    fn post(&self, id: NotificationId, notification: Notification) {
        lock(&self.posted).push((id, notification));
    }
}

/// Size calculator returning a fixed size.
#[derive(Default)]
pub struct FixedSizeCalculator {
    size: AtomicU64,
    calls: AtomicUsize,
}

impl FixedSizeCalculator {
    /// Calculator reporting `size` bytes for any node set.
    #[must_use]
    pub const fn new(size: u64) -> Self {
        Self {
            size: AtomicU64::new(size),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of size requests served.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SizeCalculator for FixedSizeCalculator {
    async fn total_size(&self, _nodes: &[NodeRef]) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.size.load(Ordering::SeqCst))
    }
}

/// Connectivity flag tests can flip.
pub struct ToggleConnectivity(AtomicBool);

impl ToggleConnectivity {
    /// Oracle starting in the given state.
    #[must_use]
    pub const fn new(connected: bool) -> Self {
        Self(AtomicBool::new(connected))
    }

    /// Change the reported state.
    pub fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::SeqCst);
    }
}

impl ConnectivityOracle for ToggleConnectivity {
    fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Quota flag tests can flip.
pub struct ToggleQuota(AtomicBool);

impl ToggleQuota {
    /// Oracle starting in the given state.
    #[must_use]
    pub const fn new(over_quota: bool) -> Self {
        Self(AtomicBool::new(over_quota))
    }
}

#[async_trait]
impl QuotaOracle for ToggleQuota {
    async fn is_storage_over_quota(&self) -> Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// Rating policy that prompts once speed reaches a threshold.
pub struct RecordingRating {
    min_speed_bps: u64,
    samples: Mutex<Vec<(u64, u64)>>,
    prompts: AtomicUsize,
}

impl RecordingRating {
    /// Policy prompting at `min_speed_bps` or faster.
    #[must_use]
    pub const fn new(min_speed_bps: u64) -> Self {
        Self {
            min_speed_bps,
            samples: Mutex::new(Vec::new()),
            prompts: AtomicUsize::new(0),
        }
    }

    /// Times the prompt was shown.
    #[must_use]
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// `(speed, total bytes)` pairs evaluated so far.
    #[must_use]
    pub fn samples(&self) -> Vec<(u64, u64)> {
        lock(&self.samples).clone()
    }
}

impl RatingPolicy for RecordingRating {
    fn should_prompt(&self, speed_bps: u64, total_bytes: u64) -> bool {
        lock(&self.samples).push((speed_bps, total_bytes));
        speed_bps >= self.min_speed_bps
    }

    fn show_prompt(&self) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Picker answering with queued choices; an empty queue cancels.
#[derive(Default)]
pub struct ScriptedPicker {
    answers: Mutex<VecDeque<Option<String>>>,
    calls: AtomicUsize,
}

impl ScriptedPicker {
    /// Picker with the given answers.
    #[must_use]
    pub fn new(answers: impl IntoIterator<Item = Option<String>>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Times the picker was shown.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationPicker for ScriptedPicker {
    async fn pick(&self, _trigger: &TransferTrigger) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.answers).pop_front().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn scripted_engine_replays_in_order() -> Result<()> {
        let engine = ScriptedEngine::new();
        engine.push_events(vec![TransferEvent::AllUpdated]);
        engine.push_failure("boom");
        let dest = ResolvedDestination::path("/tmp");
        let trigger = TransferTrigger::DownloadForPreview {
            node: NodeRef::file(1, "a", "/"),
        };

        let first: Vec<_> = engine.start_transfers(&dest, &trigger).await?.collect().await;
        assert_eq!(first, vec![TransferEvent::AllUpdated]);
        assert!(engine.start_transfers(&dest, &trigger).await.is_err());
        let third: Vec<_> = engine.start_transfers(&dest, &trigger).await?.collect().await;
        assert!(third.is_empty());
        assert_eq!(engine.calls().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn memory_preferences_round_trip() -> Result<()> {
        let prefs = MemoryPreferences::default();
        prefs.set_download_location(Some("/data".into())).await?;
        prefs.set_ask_every_time(true).await?;
        assert_eq!(prefs.download_location().await?.as_deref(), Some("/data"));
        assert!(prefs.ask_every_time().await?);
        prefs.fail_reads(true);
        assert!(prefs.ask_every_time().await.is_err());
        Ok(())
    }
}
