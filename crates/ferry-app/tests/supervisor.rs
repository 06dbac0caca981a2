use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ferry_app::{RunReport, RunTicket, SupervisorDeps, TransferSupervisor};
use ferry_events::{Event, EventBus, RunOutcome, TransferClass, TriggerKind};
use ferry_runtime::{PersistedRequest, RunRecord, RunStateStore};
use ferry_telemetry::Metrics;
use ferry_test_support::assert::{eventually, next_matching, within};
use ferry_test_support::fixtures::{
    MIB, completed_request, completed_transfer, download, failed_transfer, file_node, offline,
};
use ferry_test_support::mocks::{RecordingNotifications, ScriptedEngine};
use ferry_transfer_core::{NotificationId, ResolvedDestination, TransferEvent, TransferTrigger};
use tempfile::TempDir;
use uuid::Uuid;

const SAMPLING: Duration = Duration::from_millis(20);
const CLASS: TransferClass = TransferClass::GeneralDownload;

struct Harness {
    supervisor: TransferSupervisor,
    engine: Arc<ScriptedEngine>,
    notes: Arc<RecordingNotifications>,
    events: EventBus,
    metrics: Metrics,
    store: RunStateStore,
    dir: TempDir,
}

impl Harness {
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let engine = Arc::new(ScriptedEngine::new());
        let notes = Arc::new(RecordingNotifications::new());
        let events = EventBus::with_capacity(256);
        let metrics = Metrics::new()?;
        let store = RunStateStore::new(dir.path().join("state"));
        let supervisor = TransferSupervisor::new(SupervisorDeps {
            engine: engine.clone(),
            notifications: notes.clone(),
            poster: notes.clone(),
            store: store.clone(),
            events: events.clone(),
            metrics: metrics.clone(),
            sampling_interval: SAMPLING,
        });
        Ok(Self {
            supervisor,
            engine,
            notes,
            events,
            metrics,
            store,
            dir,
        })
    }

    fn destination(&self) -> ResolvedDestination {
        ResolvedDestination::path(self.dir.path().join("out"))
    }

    fn dispatch(&self, trigger: TransferTrigger) -> RunTicket {
        self.supervisor.dispatch(self.destination(), trigger)
    }
}

async fn report(ticket: RunTicket) -> Result<RunReport> {
    within(ticket.finished())
        .await?
        .context("run ended without a report")
}

fn three_files() -> TransferTrigger {
    download(vec![
        file_node(1, "a.bin"),
        file_node(2, "b.bin"),
        file_node(3, "c.bin"),
    ])
}

#[tokio::test]
async fn completed_run_reports_totals_and_clears_bookkeeping() -> Result<()> {
    let harness = Harness::new()?;
    harness.engine.push_events(completed_request(&[1, 2, 3], MIB));

    let ticket = harness.dispatch(three_files());
    assert!(!ticket.joined);
    let report = report(ticket).await?;

    assert_eq!(report.outcome, RunOutcome::Completed { failed: 0 });
    assert_eq!(report.totals.total_transfers, 3);
    assert_eq!(report.totals.completed, 3);
    assert_eq!(report.totals.transferred_bytes, 3 * MIB);
    assert_eq!(report.last_trigger, Some(TriggerKind::DownloadNodes));

    assert_eq!(harness.engine.cleared(), vec![CLASS, CLASS]);
    assert!(harness.store.load(CLASS).await?.is_none());
    assert!(harness.supervisor.active_run(CLASS).is_none());

    let finished = harness.notes.finished_totals();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].completed, 3);
    assert!(
        harness
            .notes
            .posted()
            .iter()
            .all(|(id, _)| *id == NotificationId::for_class(CLASS))
    );

    let snapshot = harness.metrics.snapshot(CLASS);
    assert_eq!(snapshot.runs_started_total, 1);
    assert_eq!(snapshot.runs_finished_total, 1);
    assert_eq!(snapshot.transfers_completed_total, 3);
    Ok(())
}

#[tokio::test]
async fn zero_transfer_requests_complete() -> Result<()> {
    let harness = Harness::new()?;
    harness.engine.push_events(vec![TransferEvent::AllUpdated]);
    let enumerated = report(harness.dispatch(three_files())).await?;
    assert_eq!(enumerated.outcome, RunOutcome::Completed { failed: 0 });
    assert_eq!(enumerated.totals.total_transfers, 0);

    // Unscripted requests get a stream that ends without any event.
    let silent = report(harness.dispatch(three_files())).await?;
    assert_eq!(silent.outcome, RunOutcome::Completed { failed: 0 });
    Ok(())
}

#[tokio::test]
async fn per_file_failures_show_up_in_the_outcome() -> Result<()> {
    let harness = Harness::new()?;
    let mut events = completed_transfer(1, MIB);
    events.extend(failed_transfer(2, MIB));
    events.push(TransferEvent::AllUpdated);
    harness.engine.push_events(events);

    let report = report(harness.dispatch(three_files())).await?;
    assert_eq!(report.outcome, RunOutcome::Completed { failed: 1 });
    assert_eq!(harness.metrics.snapshot(CLASS).transfers_failed_total, 1);
    Ok(())
}

#[tokio::test]
async fn streams_ending_with_unfinished_transfers_are_incomplete() -> Result<()> {
    let harness = Harness::new()?;
    harness.engine.push_events(vec![TransferEvent::Started {
        tag: 1,
        expected_bytes: MIB,
    }]);
    let report = report(harness.dispatch(three_files())).await?;
    assert_eq!(report.outcome, RunOutcome::Incomplete);
    assert_eq!(report.totals.pending(), 1);
    Ok(())
}

#[tokio::test]
async fn insufficient_space_stops_the_run() -> Result<()> {
    let harness = Harness::new()?;
    let mut events = completed_transfer(1, MIB);
    events.push(TransferEvent::Started {
        tag: 2,
        expected_bytes: MIB,
    });
    events.push(TransferEvent::InsufficientSpace);
    events.extend(completed_transfer(3, MIB));
    harness.engine.push_events(events);

    let report = report(harness.dispatch(three_files())).await?;
    assert_eq!(report.outcome, RunOutcome::InsufficientSpace);
    assert!(report.totals.transfers.get(&3).is_none());
    assert!(harness.supervisor.active_run(CLASS).is_none());
    assert_eq!(
        harness.notes.finished_outcomes(),
        vec![RunOutcome::InsufficientSpace]
    );
    Ok(())
}

#[tokio::test]
async fn engine_start_failure_cancels_the_run() -> Result<()> {
    let harness = Harness::new()?;
    harness.engine.push_failure("engine offline");
    let report = report(harness.dispatch(three_files())).await?;
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(harness.notes.finished_outcomes(), vec![RunOutcome::Cancelled]);
    Ok(())
}

#[tokio::test]
async fn requests_for_a_running_class_join_the_active_run() -> Result<()> {
    let harness = Harness::new()?;
    let mut bus = harness.events.subscribe(None);
    let live = harness.engine.push_channel();
    harness.engine.push_events(completed_request(&[2], MIB));

    let first = harness.dispatch(download(vec![file_node(1, "a.bin")]));
    let second = harness.dispatch(offline(file_node(2, "b.bin")));
    assert!(second.joined);
    assert_eq!(first.run_id, second.run_id);

    let joined = next_matching(&mut bus, |envelope| {
        matches!(envelope.event, Event::RunJoined { .. })
    })
    .await?;
    assert!(matches!(
        joined.event,
        Event::RunJoined {
            trigger: TriggerKind::DownloadForOffline,
            ..
        }
    ));

    eventually(|| harness.engine.calls().len() == 2).await?;
    for event in completed_request(&[1], MIB) {
        live.send(event)?;
    }
    drop(live);

    let first = report(first).await?;
    let second = report(second).await?;
    assert_eq!(first, second);
    assert_eq!(first.outcome, RunOutcome::Completed { failed: 0 });
    assert_eq!(first.totals.total_transfers, 2);
    assert_eq!(first.last_trigger, Some(TriggerKind::DownloadForOffline));
    assert_eq!(harness.metrics.snapshot(CLASS).runs_joined_total, 1);
    assert_eq!(harness.notes.finished_totals().len(), 1);
    Ok(())
}

#[tokio::test]
async fn a_refused_join_leaves_an_enumerated_run_completable() -> Result<()> {
    let harness = Harness::new()?;
    let live = harness.engine.push_channel();
    harness.engine.push_failure("offline store unavailable");

    let ticket = harness.dispatch(download(vec![file_node(1, "a.bin")]));
    live.send(TransferEvent::Queued {
        tag: 1,
        expected_bytes: MIB,
    })?;
    live.send(TransferEvent::AllUpdated)?;

    let mut enumerated = false;
    for _ in 0..100 {
        if let Some(record) = harness.store.load(CLASS).await?
            && record.totals.all_enumerated
        {
            enumerated = true;
            break;
        }
        tokio::time::sleep(SAMPLING).await;
    }
    assert!(enumerated, "run never recorded its enumeration");

    let refused = harness.dispatch(offline(file_node(2, "b.bin")));
    assert!(refused.joined);
    eventually(|| harness.engine.calls().len() == 2).await?;

    for event in completed_transfer(1, MIB) {
        live.send(event)?;
    }
    drop(live);

    let report = report(ticket).await?;
    assert_eq!(report.outcome, RunOutcome::Completed { failed: 0 });
    assert!(report.totals.all_enumerated);
    assert_eq!(report.totals.completed, 1);
    Ok(())
}

#[tokio::test]
async fn cancelling_a_class_stops_its_run() -> Result<()> {
    let harness = Harness::new()?;
    let live = harness.engine.push_channel();
    let ticket = harness.dispatch(three_files());
    live.send(TransferEvent::Started {
        tag: 1,
        expected_bytes: MIB,
    })?;
    eventually(|| !harness.engine.calls().is_empty()).await?;

    assert!(harness.supervisor.cancel(CLASS));
    let report = report(ticket).await?;
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(!harness.supervisor.cancel(CLASS));
    drop(live);
    Ok(())
}

#[tokio::test]
async fn the_run_record_tracks_requests_while_running() -> Result<()> {
    let harness = Harness::new()?;
    let live = harness.engine.push_channel();
    let ticket = harness.dispatch(three_files());
    live.send(TransferEvent::Started {
        tag: 1,
        expected_bytes: MIB,
    })?;

    let mut persisted = None;
    for _ in 0..100 {
        if let Some(record) = harness.store.load(CLASS).await? {
            if record.totals.started == 1 {
                persisted = Some(record);
                break;
            }
        }
        tokio::time::sleep(SAMPLING).await;
    }
    let record = persisted.context("record with folded totals")?;
    assert_eq!(record.run_id, ticket.run_id);
    assert_eq!(record.requests.len(), 1);
    assert_eq!(record.last_trigger, Some(TriggerKind::DownloadNodes));

    drop(live);
    report(ticket).await?;
    Ok(())
}

#[tokio::test]
async fn quota_warnings_are_posted_once_per_run() -> Result<()> {
    let harness = Harness::new()?;
    harness.engine.push_events(vec![
        TransferEvent::QuotaExceeded { paywall: false },
        TransferEvent::QuotaExceeded { paywall: true },
        TransferEvent::AllUpdated,
    ]);
    report(harness.dispatch(three_files())).await?;
    assert_eq!(harness.notes.posted_under(NotificationId::OVER_QUOTA).len(), 1);
    Ok(())
}

#[tokio::test]
async fn recovery_resumes_or_discards_interrupted_runs() -> Result<()> {
    let harness = Harness::new()?;
    let request = PersistedRequest {
        trigger: three_files(),
        destination: harness.destination(),
    };
    let stale = RunRecord::new(Uuid::new_v4(), CLASS, request.clone());

    harness.store.save(&stale).await?;
    assert!(harness.supervisor.recover(false).await.is_empty());
    assert!(harness.store.load_all().await.is_empty());
    assert!(harness.engine.calls().is_empty());

    harness.store.save(&stale).await?;
    harness.engine.push_events(completed_request(&[1, 2, 3], MIB));
    let tickets = harness.supervisor.recover(true).await;
    assert_eq!(tickets.len(), 1);
    let resumed = report(tickets.into_iter().next().context("ticket")?).await?;
    assert_eq!(resumed.outcome, RunOutcome::Completed { failed: 0 });
    assert_ne!(resumed.run_id, stale.run_id);
    assert_eq!(harness.engine.calls(), vec![(request.destination, request.trigger)]);
    assert!(harness.store.load(CLASS).await?.is_none());
    Ok(())
}
