//! Orchestration view-state machine.
//!
//! # Design
//! - Pre-dispatch checks (connectivity, quota, size) short-circuit into a
//!   one-off message and never reach the supervisor.
//! - One-off events live in a `Pending | Consumed` watch slot; prompts that
//!   follow a run wait for the slot to be consumed before they appear.
//! - Finish detection and rating sampling observe the event bus and are
//!   owned by this instance; dropping the orchestrator stops them but never
//!   the supervisor's runs.
//! - The bus monitors never wait on the UI: finish messages for runs started
//!   elsewhere are parked in tasks of their own until the slot is free.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ferry_config::StorageSettings;
use ferry_events::{
    ActiveTransferTotals, Event, EventBus, EventStream, JobInProgressState, RunOutcome, TransferClass,
    TriggerKind,
};
use ferry_transfer_core::{
    ConnectivityOracle, DestinationPicker, MessageKind, OneShot, OneShotEvent, PreferenceStore,
    ProcessingError, QuotaOracle, RatingPolicy, SizeCalculator, TransferEngine, TransferError,
    TransferResult, TransferTrigger,
};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::guard::LargeOperationGuard;
use crate::resolver::DestinationResolver;
use crate::supervisor::{RunReport, TransferSupervisor};

/// Class whose finished runs and speed this surface reports.
const OBSERVED_CLASS: TransferClass = TransferClass::GeneralDownload;

/// Collaborators of an orchestrator instance.
#[derive(Clone)]
pub struct OrchestratorDeps {
    /// Supervisor that owns the runs.
    pub supervisor: TransferSupervisor,
    /// Bus the supervisor publishes on.
    pub events: EventBus,
    /// Engine queried for the current speed.
    pub engine: Arc<dyn TransferEngine>,
    /// User preferences.
    pub preferences: Arc<dyn PreferenceStore>,
    /// Payload size calculator.
    pub sizes: Arc<dyn SizeCalculator>,
    /// Network reachability.
    pub connectivity: Arc<dyn ConnectivityOracle>,
    /// Account storage quota.
    pub quota: Arc<dyn QuotaOracle>,
    /// Rating prompt heuristic.
    pub rating: Arc<dyn RatingPolicy>,
    /// Storage roots used by the resolver.
    pub storage: StorageSettings,
    /// Payload size above which downloads need confirmation.
    pub large_operation_threshold_bytes: u64,
    /// Minimum spacing between rating samples.
    pub rating_sample_interval: Duration,
}

/// Single-slot holder of the pending one-off event.
struct OneShotSlot {
    tx: watch::Sender<OneShot<OneShotEvent>>,
}

impl OneShotSlot {
    fn new() -> Self {
        let (tx, _) = watch::channel(OneShot::Consumed);
        Self { tx }
    }

    /// Replace whatever is pending.
    fn emit(&self, event: OneShotEvent) {
        debug!(event = ?event, "one-off event emitted");
        self.tx.send_replace(OneShot::Pending(event));
    }

    /// Emit once nothing is pending.
    async fn emit_when_idle(&self, event: OneShotEvent) {
        let mut rx = self.tx.subscribe();
        loop {
            if rx.wait_for(|slot| !slot.is_pending()).await.is_err() {
                return;
            }
            let placed = self.tx.send_if_modified(|slot| {
                if slot.is_pending() {
                    false
                } else {
                    *slot = OneShot::Pending(event.clone());
                    true
                }
            });
            if placed {
                debug!(event = ?event, "deferred one-off event emitted");
                return;
            }
        }
    }

    fn consume(&self) -> Option<OneShotEvent> {
        let mut taken = None;
        self.tx.send_if_modified(|slot| {
            taken = slot.take();
            taken.is_some()
        });
        taken
    }

    fn consume_if(&self, predicate: impl Fn(&OneShotEvent) -> bool) {
        self.tx.send_if_modified(|slot| match slot.pending() {
            Some(event) if predicate(event) => {
                *slot = OneShot::Consumed;
                true
            }
            _ => false,
        });
    }
}

/// Bridges the resolver's picker to the `AskDestination` one-off event.
struct PickerBridge {
    slot: Arc<OneShotSlot>,
    waiting: Arc<Mutex<Option<oneshot::Sender<Option<String>>>>>,
}

#[async_trait]
impl DestinationPicker for PickerBridge {
    async fn pick(&self, trigger: &TransferTrigger) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        // A picker that was still open is abandoned; its waiter sees a cancellation.
        *lock(&self.waiting) = Some(tx);
        self.slot.emit(OneShotEvent::AskDestination {
            trigger: trigger.clone(),
        });
        rx.await.ok().flatten()
    }
}

#[derive(Default)]
struct Tracking {
    own_runs: HashSet<Uuid>,
    reported: HashSet<Uuid>,
    current_run: Option<Uuid>,
    current_class: Option<TransferClass>,
}

struct Shared {
    supervisor: TransferSupervisor,
    engine: Arc<dyn TransferEngine>,
    preferences: Arc<dyn PreferenceStore>,
    connectivity: Arc<dyn ConnectivityOracle>,
    quota: Arc<dyn QuotaOracle>,
    rating: Arc<dyn RatingPolicy>,
    guard: LargeOperationGuard,
    resolver: DestinationResolver,
    slot: Arc<OneShotSlot>,
    waiting_pick: Arc<Mutex<Option<oneshot::Sender<Option<String>>>>>,
    job_state: watch::Sender<JobInProgressState>,
    active: AtomicBool,
    tracking: Mutex<Tracking>,
    job: Mutex<Option<JoinHandle<()>>>,
    deferred: Mutex<JoinSet<()>>,
    rating_interval: Duration,
}

/// Per-surface state machine driving triggers through gating, resolution and
/// dispatch.
pub struct TransferOrchestrator {
    shared: Arc<Shared>,
    monitors: Vec<JoinHandle<()>>,
}

impl TransferOrchestrator {
    /// Build an orchestrator and start its bus monitors.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(deps: OrchestratorDeps) -> Self {
        let slot = Arc::new(OneShotSlot::new());
        let waiting_pick = Arc::new(Mutex::new(None));
        let picker = Arc::new(PickerBridge {
            slot: Arc::clone(&slot),
            waiting: Arc::clone(&waiting_pick),
        });
        let (job_state, _) = watch::channel(latest_job_state(&deps.events));
        let shared = Arc::new(Shared {
            supervisor: deps.supervisor,
            engine: deps.engine,
            guard: LargeOperationGuard::new(
                deps.large_operation_threshold_bytes,
                deps.sizes,
                Arc::clone(&deps.preferences),
            ),
            resolver: DestinationResolver::new(
                deps.storage,
                Arc::clone(&deps.preferences),
                picker,
            ),
            preferences: deps.preferences,
            connectivity: deps.connectivity,
            quota: deps.quota,
            rating: deps.rating,
            slot,
            waiting_pick,
            job_state,
            active: AtomicBool::new(true),
            tracking: Mutex::new(Tracking::default()),
            job: Mutex::new(None),
            deferred: Mutex::new(JoinSet::new()),
            rating_interval: deps.rating_sample_interval,
        });

        // Only events published after construction reach the monitors.
        let since = deps.events.last_event_id();
        let monitors = vec![
            tokio::spawn(monitor_runs(Arc::clone(&shared), deps.events.subscribe(since))),
            tokio::spawn(monitor_rating(Arc::clone(&shared), deps.events.subscribe(since))),
        ];
        Self { shared, monitors }
    }

    /// Gate `trigger` and dispatch it when nothing needs the user.
    pub async fn start(&self, trigger: TransferTrigger) {
        info!(trigger = %trigger.kind(), items = trigger.item_count(), "transfer requested");
        if !self.shared.connectivity.is_connected() {
            self.shared.fail(&TransferError::NotConnected);
            return;
        }
        if trigger.is_upload() {
            match self.shared.quota.is_storage_over_quota().await {
                Ok(false) => {}
                Ok(true) => {
                    self.shared.fail(&TransferError::StorageOverQuota);
                    return;
                }
                Err(err) => {
                    self.shared
                        .fail(&TransferError::engine("quota.is_storage_over_quota", err));
                    return;
                }
            }
        }
        let decision = self.shared.guard.should_confirm(&trigger).await;
        match decision {
            Ok(Some(size_label)) => {
                info!(size = %size_label, "large operation needs confirmation");
                self.shared.slot.emit(OneShotEvent::ConfirmLargeOperation {
                    size_label,
                    trigger,
                });
            }
            Ok(None) => self.start_without_confirmation(trigger, false).await,
            Err(err) => self.shared.fail(&err),
        }
    }

    /// Resolve and dispatch `trigger` without the size gate, optionally
    /// persisting the large-download opt-out first.
    pub async fn start_without_confirmation(&self, trigger: TransferTrigger, remember_opt_out: bool) {
        if remember_opt_out && let Err(err) = self.shared.guard.remember_opt_out().await {
            warn!(error = %err, "failed to persist large-download opt-out");
        }
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run_job(shared, trigger));
        if let Some(previous) = lock(&self.shared.job).replace(handle)
            && !previous.is_finished()
        {
            debug!("previous job keeps running untracked");
        }
    }

    /// Stop tracking the current job; the supervisor's run is not affected.
    pub fn cancel_current_job(&self) {
        if let Some(handle) = lock(&self.shared.job).take() {
            handle.abort();
        }
        lock(&self.shared.waiting_pick).take();
        let mut tracking = self.shared.lock_tracking();
        if let Some(run_id) = tracking.current_run.take() {
            tracking.own_runs.remove(&run_id);
        }
        info!("current job cancelled");
    }

    /// Clear the pending one-off event, returning it; later calls return `None`.
    #[must_use]
    pub fn consume_one_off_event(&self) -> Option<OneShotEvent> {
        self.shared.slot.consume()
    }

    /// Answer an `AskDestination` event; `None` means the picker was cancelled.
    /// Returns whether a resolution was waiting for the answer.
    #[must_use]
    pub fn provide_destination(&self, location: Option<String>) -> bool {
        self.shared
            .slot
            .consume_if(|event| matches!(event, OneShotEvent::AskDestination { .. }));
        lock(&self.shared.waiting_pick)
            .take()
            .is_some_and(|waiter| waiter.send(location).is_ok())
    }

    /// Remember `location` as the download destination and stop asking.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Engine`] when the preferences cannot be written.
    pub async fn save_destination(&self, location: String) -> TransferResult<()> {
        let prefs = &self.shared.preferences;
        prefs
            .set_download_location(Some(location))
            .await
            .map_err(|err| TransferError::engine("preferences.set_download_location", err))?;
        prefs
            .set_ask_every_time(false)
            .await
            .map_err(|err| TransferError::engine("preferences.set_ask_every_time", err))
    }

    /// Decline the save-destination prompt, optionally for good.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Engine`] when the opt-out cannot be written.
    pub async fn dismiss_save_destination(&self, never_ask_again: bool) -> TransferResult<()> {
        if !never_ask_again {
            return Ok(());
        }
        self.shared
            .preferences
            .set_skip_save_destination_prompt(true)
            .await
            .map_err(|err| TransferError::engine("preferences.set_skip_save_destination_prompt", err))
    }

    /// Record whether the surface is visible; finish messages are dropped
    /// while inactive.
    pub fn set_active(&self, active: bool) {
        self.shared.active.store(active, Ordering::SeqCst);
    }

    /// Observable one-off event slot.
    #[must_use]
    pub fn events(&self) -> watch::Receiver<OneShot<OneShotEvent>> {
        self.shared.slot.tx.subscribe()
    }

    /// Observable job state of the class this surface last dispatched.
    #[must_use]
    pub fn job_state(&self) -> watch::Receiver<JobInProgressState> {
        self.shared.job_state.subscribe()
    }
}

impl Drop for TransferOrchestrator {
    fn drop(&mut self) {
        for monitor in &self.monitors {
            monitor.abort();
        }
        if let Some(handle) = lock(&self.shared.job).take() {
            handle.abort();
        }
        lock(&self.shared.deferred).abort_all();
    }
}

impl Shared {
    fn lock_tracking(&self) -> MutexGuard<'_, Tracking> {
        lock(&self.tracking)
    }

    fn fail(&self, err: &TransferError) {
        warn!(error = %err, "transfer pass ended early");
        if let Some(kind) = err.message_kind() {
            self.slot.emit(OneShotEvent::Message(kind));
        }
    }

    fn report_outcome(&self, trigger: &TransferTrigger, report: &RunReport) {
        let totals = &report.totals;
        let event = match report.outcome {
            RunOutcome::InsufficientSpace => OneShotEvent::Message(MessageKind::InsufficientSpace),
            RunOutcome::Cancelled => OneShotEvent::Message(MessageKind::TransferCancelled),
            RunOutcome::Completed { failed } => finish_processing(
                trigger,
                totals,
                (failed > 0).then_some(ProcessingError::PartialFailure {
                    failed,
                    total: totals.total_transfers,
                }),
            ),
            RunOutcome::Incomplete => finish_processing(
                trigger,
                totals,
                Some(ProcessingError::Incomplete {
                    pending: totals.pending(),
                }),
            ),
        };
        self.slot.emit(event);
    }

    /// Claim `run_id` for finish detection; false if it was already reported
    /// or the surface is inactive.
    fn claim_finish(&self, run_id: Uuid) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            debug!(run_id = %run_id, "surface inactive; finish message dropped");
            return false;
        }
        self.lock_tracking().reported.insert(run_id)
    }

    /// Finish message for `run_id`, claimed so no other path reports it.
    fn finish_announcement(
        &self,
        run_id: Uuid,
        last_trigger: Option<TriggerKind>,
        outcome: RunOutcome,
        totals: &ActiveTransferTotals,
    ) -> Option<OneShotEvent> {
        let message = finish_message(last_trigger, outcome, totals)?;
        if !self.claim_finish(run_id) {
            return None;
        }
        info!(run_id = %run_id, message = %message, "transfers finished");
        Some(OneShotEvent::Message(message))
    }

    /// Emit `event` from a task of this instance once the slot is free.
    fn defer(&self, event: OneShotEvent) {
        let slot = Arc::clone(&self.slot);
        let mut deferred = lock(&self.deferred);
        while deferred.try_join_next().is_some() {}
        deferred.spawn(async move { slot.emit_when_idle(event).await });
    }

    async fn offer_save_destination(&self, picked: String) {
        match self.preferences.skip_save_destination_prompt().await {
            Ok(true) => {}
            Ok(false) => {
                self.slot
                    .emit_when_idle(OneShotEvent::PromptSaveDestination { path: picked })
                    .await;
            }
            Err(err) => warn!(error = %err, "failed to read save-destination opt-out"),
        }
    }
}

async fn run_job(shared: Arc<Shared>, trigger: TransferTrigger) {
    let resolution = match shared.resolver.resolve(&trigger).await {
        Ok(resolution) => resolution,
        Err(err) => {
            shared.fail(&err);
            return;
        }
    };

    // Registering under the tracking lock keeps the run monitor from
    // announcing this run before it is known to be ours.
    let ticket = {
        let mut tracking = shared.lock_tracking();
        let ticket = shared
            .supervisor
            .dispatch(resolution.destination.clone(), trigger.clone());
        tracking.own_runs.insert(ticket.run_id);
        tracking.current_run = Some(ticket.run_id);
        tracking.current_class = Some(trigger.class());
        ticket
    };
    let run_id = ticket.run_id;
    info!(run_id = %run_id, joined = ticket.joined, trigger = %trigger.kind(), "job dispatched");

    let Some(report) = ticket.finished().await else {
        warn!(run_id = %run_id, "run ended without a report");
        shared.slot.emit(OneShotEvent::Message(MessageKind::TransferCancelled));
        return;
    };
    shared.report_outcome(&trigger, &report);

    if matches!(report.outcome, RunOutcome::Completed { .. }) {
        if let Some(picked) = resolution.picked {
            shared.offer_save_destination(picked).await;
        }
        if let Some(event) =
            shared.finish_announcement(run_id, report.last_trigger, report.outcome, &report.totals)
        {
            shared.slot.emit_when_idle(event).await;
        }
    }
}

/// Mirrors job state and announces finished runs this surface did not start.
async fn monitor_runs(shared: Arc<Shared>, mut stream: EventStream) {
    while let Some(envelope) = stream.next().await {
        match envelope.event {
            Event::JobStateChanged { class, state } => {
                let current = shared.lock_tracking().current_class.unwrap_or(OBSERVED_CLASS);
                if class == current {
                    shared.job_state.send_replace(state);
                }
            }
            Event::TransfersCleared {
                class,
                run_id,
                last_trigger,
                outcome,
                totals,
            } if class == OBSERVED_CLASS => {
                let own = shared.lock_tracking().own_runs.contains(&run_id);
                if own {
                    continue;
                }
                if let Some(event) =
                    shared.finish_announcement(run_id, last_trigger, outcome, &totals)
                {
                    shared.defer(event);
                }
            }
            _ => {}
        }
    }
}

/// Samples download speed until the rating policy fires once.
async fn monitor_rating(shared: Arc<Shared>, mut stream: EventStream) {
    let mut last_sample: Option<Instant> = None;
    while let Some(envelope) = stream.next().await {
        let Event::TotalsUpdated { class, totals, .. } = envelope.event else {
            continue;
        };
        if class != OBSERVED_CLASS || !totals.has_ongoing_transfers() {
            continue;
        }
        if last_sample.is_some_and(|at| at.elapsed() < shared.rating_interval) {
            continue;
        }
        last_sample = Some(Instant::now());

        let speed = match shared.engine.current_speed(class).await {
            Ok(speed) => speed,
            Err(err) => {
                debug!(error = %err, "engine speed unavailable; using sampled speed");
                totals.speed_bps
            }
        };
        if shared.rating.should_prompt(speed, totals.total_bytes) {
            info!(speed, total_bytes = totals.total_bytes, "showing rating prompt");
            shared.rating.show_prompt();
            return;
        }
    }
}

fn latest_job_state(events: &EventBus) -> JobInProgressState {
    events
        .latest_for(OBSERVED_CLASS, |event| {
            matches!(event, Event::JobStateChanged { .. })
        })
        .and_then(|envelope| match envelope.event {
            Event::JobStateChanged { state, .. } => Some(state),
            _ => None,
        })
        .unwrap_or(JobInProgressState::Idle)
}

fn finish_processing(
    trigger: &TransferTrigger,
    totals: &ActiveTransferTotals,
    error: Option<ProcessingError>,
) -> OneShotEvent {
    OneShotEvent::FinishProcessing {
        error,
        total_nodes: trigger.item_count(),
        total_files: totals.total_transfers,
        already_downloaded: totals.already_transferred,
    }
}

fn finish_message(
    last_trigger: Option<TriggerKind>,
    outcome: RunOutcome,
    totals: &ActiveTransferTotals,
) -> Option<MessageKind> {
    if !matches!(outcome, RunOutcome::Completed { .. }) {
        return None;
    }
    match last_trigger? {
        TriggerKind::DownloadForOffline => Some(MessageKind::FinishedOffline),
        TriggerKind::DownloadNodes if totals.completed > 0 => {
            Some(MessageKind::FinishedDownloadingPlural(totals.completed))
        }
        TriggerKind::DownloadNodes
        | TriggerKind::DownloadForPreview
        | TriggerKind::UploadChatAttachment => None,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(completed: u32) -> ActiveTransferTotals {
        let mut totals = ActiveTransferTotals::new(TransferClass::GeneralDownload);
        totals.total_transfers = completed;
        totals.started = completed;
        totals.completed = completed;
        totals.all_enumerated = true;
        totals
    }

    #[test]
    fn finish_messages_follow_the_last_trigger() {
        let done = RunOutcome::Completed { failed: 0 };
        assert_eq!(
            finish_message(Some(TriggerKind::DownloadNodes), done, &totals(3)),
            Some(MessageKind::FinishedDownloadingPlural(3))
        );
        assert_eq!(
            finish_message(Some(TriggerKind::DownloadForOffline), done, &totals(1)),
            Some(MessageKind::FinishedOffline)
        );
        assert_eq!(
            finish_message(Some(TriggerKind::DownloadForPreview), done, &totals(1)),
            None
        );
        assert_eq!(
            finish_message(Some(TriggerKind::DownloadNodes), done, &totals(0)),
            None
        );
        assert_eq!(
            finish_message(
                Some(TriggerKind::DownloadNodes),
                RunOutcome::InsufficientSpace,
                &totals(2)
            ),
            None
        );
        assert_eq!(finish_message(None, done, &totals(2)), None);
    }

    #[tokio::test]
    async fn one_shot_slot_consumes_once_and_defers_emission() {
        let slot = Arc::new(OneShotSlot::new());
        slot.emit(OneShotEvent::Message(MessageKind::NotConnected));

        let deferred = Arc::clone(&slot);
        let waiter = tokio::spawn(async move {
            deferred
                .emit_when_idle(OneShotEvent::Message(MessageKind::FinishedOffline))
                .await;
        });
        tokio::task::yield_now().await;
        assert_eq!(
            slot.tx.borrow().pending(),
            Some(&OneShotEvent::Message(MessageKind::NotConnected))
        );

        assert_eq!(
            slot.consume(),
            Some(OneShotEvent::Message(MessageKind::NotConnected))
        );
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("deferred emission")
            .expect("waiter task");
        assert_eq!(
            slot.consume(),
            Some(OneShotEvent::Message(MessageKind::FinishedOffline))
        );
        assert_eq!(slot.consume(), None);
    }
}
