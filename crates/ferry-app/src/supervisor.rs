//! Transfer supervisor: one background run per transfer class.
//!
//! # Design
//! - A run owns its engine streams, folds them in sampled batches and is the
//!   only writer of its class's totals.
//! - Requests for a class that is already running join the active run; the
//!   join-or-finalize decision is taken under the registry lock.
//! - The run persists a record after every batch so an interrupted run can be
//!   recovered on the next start.
//! - Errors never escape the run task; they are logged and folded into the
//!   outcome.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ferry_events::{
    ActiveTransferTotals, Event, EventBus, JobInProgressState, RunOutcome, SupervisorPhase,
    TransferClass, TriggerKind,
};
use ferry_runtime::{PersistedRequest, RunRecord, RunStateStore};
use ferry_telemetry::{Metrics, TransferStatus};
use ferry_transfer_core::{
    NotificationBuilder, NotificationId, NotificationPoster, ResolvedDestination, TransferEngine,
    TransferEvent, TransferTrigger, fold_all,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::{Stream, StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

type TaggedStream = Pin<Box<dyn Stream<Item = Option<TransferEvent>> + Send>>;

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct SupervisorDeps {
    /// Byte-moving engine.
    pub engine: Arc<dyn TransferEngine>,
    /// Renders totals into notifications.
    pub notifications: Arc<dyn NotificationBuilder>,
    /// Displays notifications.
    pub poster: Arc<dyn NotificationPoster>,
    /// Persisted run records.
    pub store: RunStateStore,
    /// Bus the runs publish on.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Interval between folded batches.
    pub sampling_interval: Duration,
}

/// Final report of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Identifier of the run.
    pub run_id: Uuid,
    /// Class served by the run.
    pub class: TransferClass,
    /// Terminal outcome.
    pub outcome: RunOutcome,
    /// Final totals.
    pub totals: ActiveTransferTotals,
    /// Trigger of the most recent request the run served.
    pub last_trigger: Option<TriggerKind>,
}

/// Handle returned for every dispatched request.
#[derive(Debug, Clone)]
pub struct RunTicket {
    /// Run serving the request.
    pub run_id: Uuid,
    /// Whether the request joined a run that was already active.
    pub joined: bool,
    report: watch::Receiver<Option<RunReport>>,
}

impl RunTicket {
    /// Wait for the run to finish; `None` if the run task vanished.
    pub async fn finished(mut self) -> Option<RunReport> {
        self.report
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|report| report.clone())
    }
}

struct ActiveRun {
    run_id: Uuid,
    joins: mpsc::UnboundedSender<PersistedRequest>,
    cancel: CancellationToken,
    report: watch::Receiver<Option<RunReport>>,
}

struct Inner {
    deps: SupervisorDeps,
    runs: Mutex<HashMap<TransferClass, ActiveRun>>,
}

/// Supervises transfer runs, one per class at a time.
#[derive(Clone)]
pub struct TransferSupervisor {
    inner: Arc<Inner>,
}

impl TransferSupervisor {
    /// Build a supervisor with no active runs.
    #[must_use]
    pub fn new(deps: SupervisorDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start `trigger` into `destination`, joining the class's active run if
    /// there is one.
    #[must_use]
    pub fn dispatch(&self, destination: ResolvedDestination, trigger: TransferTrigger) -> RunTicket {
        let class = trigger.class();
        let kind = trigger.kind();
        let request = PersistedRequest {
            trigger,
            destination,
        };

        let mut runs = self.inner.lock_runs();
        let joined = match runs.get(&class) {
            Some(active) => match active.joins.send(request) {
                Ok(()) => Err(RunTicket {
                    run_id: active.run_id,
                    joined: true,
                    report: active.report.clone(),
                }),
                Err(mpsc::error::SendError(request)) => Ok(request),
            },
            None => Ok(request),
        };
        let request = match joined {
            Ok(request) => request,
            Err(ticket) => {
                drop(runs);
                info!(
                    class = %class,
                    run_id = %ticket.run_id,
                    trigger = %kind,
                    "request joined active run"
                );
                self.inner.deps.metrics.inc_run_joined(class);
                self.inner.publish(Event::RunJoined {
                    class,
                    run_id: ticket.run_id,
                    trigger: kind,
                });
                return ticket;
            }
        };

        let run_id = Uuid::new_v4();
        let (joins_tx, joins_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        runs.insert(
            class,
            ActiveRun {
                run_id,
                joins: joins_tx,
                cancel: cancel.clone(),
                report: report_rx.clone(),
            },
        );
        drop(runs);

        info!(class = %class, run_id = %run_id, trigger = %kind, "starting transfer run");
        self.inner.deps.metrics.inc_run_started(class);
        self.inner.publish(Event::RunStarted {
            class,
            run_id,
            trigger: kind,
        });

        let run = Run {
            inner: Arc::clone(&self.inner),
            class,
            run_id,
            joins: joins_rx,
            cancel,
            report: report_tx,
        };
        tokio::spawn(run.drive(request));

        RunTicket {
            run_id,
            joined: false,
            report: report_rx,
        }
    }

    /// Cancel the active run of `class`; returns whether one was running.
    pub fn cancel(&self, class: TransferClass) -> bool {
        self.inner.lock_runs().get(&class).is_some_and(|active| {
            active.cancel.cancel();
            true
        })
    }

    /// Identifier of the active run of `class`.
    #[must_use]
    pub fn active_run(&self, class: TransferClass) -> Option<Uuid> {
        self.inner.lock_runs().get(&class).map(|active| active.run_id)
    }

    /// Re-dispatch or discard runs interrupted by a previous process.
    ///
    /// With `resume` set, every persisted request is started again and the
    /// engine re-enumerates it, reporting files that already arrived as
    /// already transferred. Without it the records are deleted.
    pub async fn recover(&self, resume: bool) -> Vec<RunTicket> {
        let records = self.inner.deps.store.load_all().await;
        let mut tickets = Vec::new();
        for record in records {
            if !resume {
                info!(class = %record.class, run_id = %record.run_id, "discarding interrupted run");
                if let Err(err) = self.inner.deps.store.clear(record.class).await {
                    warn!(error = %err, class = %record.class, "failed to discard interrupted run");
                }
                continue;
            }
            info!(
                class = %record.class,
                run_id = %record.run_id,
                requests = record.requests.len(),
                "resuming interrupted run"
            );
            for request in record.requests {
                tickets.push(self.dispatch(request.destination, request.trigger));
            }
        }
        tickets
    }
}

impl Inner {
    fn lock_runs(&self) -> MutexGuard<'_, HashMap<TransferClass, ActiveRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: Event) {
        self.deps.metrics.inc_event(event.kind());
        let _ = self.deps.events.publish(event);
    }
}

/// State of one run while its task is alive.
struct Run {
    inner: Arc<Inner>,
    class: TransferClass,
    run_id: Uuid,
    joins: mpsc::UnboundedReceiver<PersistedRequest>,
    cancel: CancellationToken,
    report: watch::Sender<Option<RunReport>>,
}

/// Mutable fold state of a run.
struct Progress {
    totals: ActiveTransferTotals,
    batch: Vec<TransferEvent>,
    streams: StreamMap<usize, TaggedStream>,
    enumerating: HashSet<usize>,
    next_key: usize,
    started_streams: usize,
    failed_starts: usize,
    phase: SupervisorPhase,
    job_state: JobInProgressState,
    over_quota_posted: bool,
}

#[derive(Clone, Copy)]
enum Stop {
    Drained,
    Cancelled,
    InsufficientSpace,
}

impl Run {
    async fn drive(mut self, first: PersistedRequest) {
        self.enter(SupervisorPhase::CorrectingPriorState);
        self.correct_prior_state().await;

        let request = first.clone();
        let mut record = RunRecord::new(self.run_id, self.class, first);
        self.save(&record).await;

        let mut progress = Progress {
            totals: ActiveTransferTotals::new(self.class),
            batch: Vec::new(),
            streams: StreamMap::new(),
            enumerating: HashSet::new(),
            next_key: 0,
            started_streams: 0,
            failed_starts: 0,
            phase: SupervisorPhase::CorrectingPriorState,
            job_state: JobInProgressState::Idle,
            over_quota_posted: false,
        };
        self.enter(SupervisorPhase::Scanning);
        progress.phase = SupervisorPhase::Scanning;
        self.set_job_state(&mut progress, JobInProgressState::ScanningFiles);
        let _ = self.start_request(&mut progress, &request).await;

        let stop = self.pump(&mut progress, &mut record).await;
        self.finalize(progress, &record, stop).await;
    }

    async fn pump(&mut self, progress: &mut Progress, record: &mut RunRecord) -> Stop {
        let period = self.inner.deps.sampling_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if progress.streams.is_empty() {
                self.flush(progress, record).await;
                match self.close_or_take() {
                    Some(request) => {
                        self.join(progress, record, &request).await;
                        continue;
                    }
                    None => return Stop::Drained,
                }
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.flush(progress, record).await;
                    self.close();
                    return Stop::Cancelled;
                }
                Some(request) = self.joins.recv() => {
                    self.join(progress, record, &request).await;
                }
                Some((key, item)) = progress.streams.next() => {
                    match item {
                        Some(TransferEvent::InsufficientSpace) => {
                            warn!(class = %self.class, run_id = %self.run_id, "engine reported insufficient space");
                            self.flush(progress, record).await;
                            self.close();
                            return Stop::InsufficientSpace;
                        }
                        Some(TransferEvent::QuotaExceeded { paywall }) => {
                            self.post_over_quota(progress, paywall);
                        }
                        Some(TransferEvent::AllUpdated) => {
                            if progress.enumerating.remove(&key) && progress.enumerating.is_empty() {
                                progress.batch.push(TransferEvent::AllUpdated);
                                self.flush(progress, record).await;
                            }
                        }
                        Some(event) => progress.batch.push(event),
                        None => {
                            debug!(class = %self.class, run_id = %self.run_id, stream = key, "engine stream ended");
                            if progress.enumerating.remove(&key) && progress.enumerating.is_empty() {
                                progress.batch.push(TransferEvent::AllUpdated);
                            }
                            self.flush(progress, record).await;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush(progress, record).await;
                }
            }
        }
    }

    async fn correct_prior_state(&self) {
        let store = &self.inner.deps.store;
        match store.load(self.class).await {
            Ok(Some(stale)) => {
                info!(
                    class = %self.class,
                    run_id = %self.run_id,
                    stale_run_id = %stale.run_id,
                    "clearing bookkeeping left by an earlier run"
                );
                if let Err(err) = store.clear(self.class).await {
                    warn!(error = %err, class = %self.class, "failed to clear stale run record");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, class = %self.class, "failed to load prior run record");
            }
        }
        if let Err(err) = self
            .inner
            .deps
            .engine
            .clear_finished_transfers(self.class)
            .await
        {
            warn!(error = %err, class = %self.class, "failed to clear finished transfers");
        }
    }

    /// Attach the engine stream for `request`; false if the engine refused it.
    async fn start_request(&self, progress: &mut Progress, request: &PersistedRequest) -> bool {
        match self
            .inner
            .deps
            .engine
            .start_transfers(&request.destination, &request.trigger)
            .await
        {
            Ok(stream) => {
                let key = progress.next_key;
                progress.next_key += 1;
                progress.started_streams += 1;
                progress.enumerating.insert(key);
                let tagged: TaggedStream =
                    Box::pin(stream.map(Some).chain(tokio_stream::once(None)));
                progress.streams.insert(key, tagged);
                debug!(class = %self.class, run_id = %self.run_id, stream = key, "engine stream attached");
                true
            }
            Err(err) => {
                progress.failed_starts += 1;
                warn!(
                    error = %err,
                    class = %self.class,
                    run_id = %self.run_id,
                    trigger = %request.trigger.kind(),
                    "engine failed to start transfers"
                );
                false
            }
        }
    }

    async fn join(&self, progress: &mut Progress, record: &mut RunRecord, request: &PersistedRequest) {
        self.flush(progress, record).await;
        record.push_request(request.clone());
        self.save(record).await;
        // A refused request adds no stream, so enumeration stays as it was.
        if self.start_request(progress, request).await {
            progress.totals = progress.totals.reopened();
        }
    }

    /// Decide under the registry lock whether the run ends or takes a request
    /// that raced in.
    fn close_or_take(&mut self) -> Option<PersistedRequest> {
        let mut runs = self.inner.lock_runs();
        if let Ok(request) = self.joins.try_recv() {
            return Some(request);
        }
        if runs.get(&self.class).is_some_and(|active| active.run_id == self.run_id) {
            runs.remove(&self.class);
        }
        None
    }

    fn close(&mut self) {
        {
            let mut runs = self.inner.lock_runs();
            if runs.get(&self.class).is_some_and(|active| active.run_id == self.run_id) {
                runs.remove(&self.class);
            }
        }
        while let Ok(request) = self.joins.try_recv() {
            warn!(
                class = %self.class,
                run_id = %self.run_id,
                trigger = %request.trigger.kind(),
                "dropping request that joined a terminating run"
            );
        }
    }

    async fn flush(&self, progress: &mut Progress, record: &mut RunRecord) {
        if progress.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut progress.batch);
        progress.totals = fold_all(&progress.totals, &batch);
        let totals = &progress.totals;

        self.inner.deps.metrics.set_bytes_transferred(self.class, totals.transferred_bytes);
        self.inner.publish(Event::TotalsUpdated {
            class: self.class,
            run_id: self.run_id,
            totals: totals.clone(),
        });
        record.record_totals(totals);
        self.save(record).await;

        if progress.phase == SupervisorPhase::Scanning {
            if progress.totals.all_enumerated {
                progress.phase = SupervisorPhase::Transferring;
                self.enter(SupervisorPhase::Transferring);
                self.set_job_state(progress, JobInProgressState::Idle);
            } else if progress.totals.total_transfers > 0 {
                self.set_job_state(progress, JobInProgressState::ProcessingFiles);
            }
        }
        if progress.phase == SupervisorPhase::Transferring {
            let notification = self
                .inner
                .deps
                .notifications
                .build(&progress.totals, self.class.is_upload());
            self.inner
                .deps
                .poster
                .post(NotificationId::for_class(self.class), notification);
        }
    }

    fn post_over_quota(&self, progress: &mut Progress, paywall: bool) {
        if progress.over_quota_posted {
            return;
        }
        progress.over_quota_posted = true;
        warn!(class = %self.class, run_id = %self.run_id, paywall, "storage quota exceeded");
        let notification = self.inner.deps.notifications.build_over_quota(paywall);
        self.inner
            .deps
            .poster
            .post(NotificationId::OVER_QUOTA, notification);
    }

    async fn finalize(mut self, mut progress: Progress, record: &RunRecord, stop: Stop) {
        self.enter(SupervisorPhase::Finalizing);
        let totals = progress.totals.clone();
        let outcome = match stop {
            Stop::InsufficientSpace => RunOutcome::InsufficientSpace,
            Stop::Cancelled => RunOutcome::Cancelled,
            Stop::Drained if progress.started_streams == 0 && progress.failed_starts > 0 => {
                RunOutcome::Cancelled
            }
            Stop::Drained if totals.has_completed() => RunOutcome::Completed {
                failed: totals.failed,
            },
            Stop::Drained => RunOutcome::Incomplete,
        };

        let metrics = &self.inner.deps.metrics;
        metrics.inc_run_finished(self.class, outcome);
        metrics.add_transfers(
            self.class,
            TransferStatus::Completed,
            totals.completed.saturating_sub(totals.already_transferred),
        );
        metrics.add_transfers(self.class, TransferStatus::Failed, totals.failed);
        metrics.add_transfers(
            self.class,
            TransferStatus::AlreadyPresent,
            totals.already_transferred,
        );

        let finished = self.inner.deps.notifications.build_finished(&totals, outcome);
        self.inner
            .deps
            .poster
            .post(NotificationId::for_class(self.class), finished);
        self.set_job_state(&mut progress, JobInProgressState::Idle);

        info!(
            class = %self.class,
            run_id = %self.run_id,
            outcome = outcome.as_str(),
            total = totals.total_transfers,
            completed = totals.completed,
            failed = totals.failed,
            "transfer run finished"
        );
        self.inner.publish(Event::RunFinished {
            class: self.class,
            run_id: self.run_id,
            outcome,
            totals: totals.clone(),
        });

        self.clear_own_record().await;
        if let Err(err) = self
            .inner
            .deps
            .engine
            .clear_finished_transfers(self.class)
            .await
        {
            warn!(error = %err, class = %self.class, "failed to clear finished transfers");
        }
        self.inner.publish(Event::TransfersCleared {
            class: self.class,
            run_id: self.run_id,
            last_trigger: record.last_trigger,
            outcome,
            totals: totals.clone(),
        });

        // A dispatch that raced the terminal decision may still hold a sender.
        self.close();
        self.enter(SupervisorPhase::Terminal);
        self.report.send_replace(Some(RunReport {
            run_id: self.run_id,
            class: self.class,
            outcome,
            totals,
            last_trigger: record.last_trigger,
        }));
    }

    fn enter(&self, phase: SupervisorPhase) {
        debug!(class = %self.class, run_id = %self.run_id, phase = phase.as_str(), "supervisor phase");
        self.inner.publish(Event::PhaseChanged {
            class: self.class,
            run_id: self.run_id,
            phase,
        });
    }

    fn set_job_state(&self, progress: &mut Progress, state: JobInProgressState) {
        if progress.job_state == state {
            return;
        }
        progress.job_state = state;
        self.inner.publish(Event::JobStateChanged {
            class: self.class,
            state,
        });
    }

    /// A run that started after this one left the registry may already own
    /// the class's record; leave that one alone.
    async fn clear_own_record(&self) {
        let store = &self.inner.deps.store;
        match store.load(self.class).await {
            Ok(Some(current)) if current.run_id != self.run_id => {}
            Ok(_) | Err(_) => {
                if let Err(err) = store.clear(self.class).await {
                    warn!(error = %err, class = %self.class, "failed to clear run record");
                }
            }
        }
    }

    async fn save(&self, record: &RunRecord) {
        if let Err(err) = self.inner.deps.store.save(record).await {
            warn!(error = %err, class = %self.class, run_id = %self.run_id, "failed to persist run record");
        }
    }
}
