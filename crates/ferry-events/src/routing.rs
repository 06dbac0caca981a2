//! Event bus routing helpers.
//!
//! The bus is a `tokio::broadcast` channel paired with a bounded replay ring.
//! Subscribers that fall behind skip the overflowed events rather than
//! stalling publishers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast::{self, Receiver, Sender, error::RecvError};

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, TransferClass};

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    replay: Arc<Mutex<VecDeque<EventEnvelope>>>,
    replay_capacity: usize,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Construct a bus with a custom replay capacity.
    ///
    /// # Panics
    ///
    /// Panics if `replay_capacity` is zero.
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        assert!(replay_capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(replay_capacity);
        Self {
            sender,
            replay: Arc::new(Mutex::new(VecDeque::with_capacity(replay_capacity))),
            replay_capacity,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a bus with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to all subscribers, returning its identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        {
            let mut replay = self.lock_replay();
            if replay.len() == self.replay_capacity {
                let _ = replay.pop_front();
            }
            replay.push_back(envelope.clone());
        }
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        // Subscribe before reading the ring so nothing published in between is lost;
        // the stream drops live duplicates of replayed ids.
        let receiver = self.sender.subscribe();
        let backlog = since_id.map_or_else(VecDeque::new, |since| {
            self.backlog_since(since).into_iter().collect()
        });
        let replayed_up_to = backlog.back().map(|envelope: &EventEnvelope| envelope.id);
        EventStream {
            backlog,
            receiver,
            replayed_up_to,
        }
    }

    /// Last event id observed in the replay buffer.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_replay().back().map(|envelope| envelope.id)
    }

    /// Collect a backlog of events emitted after the specified id.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.lock_replay()
            .iter()
            .filter(|envelope| envelope.id > id)
            .cloned()
            .collect()
    }

    /// Most recent buffered event for `class` matching `predicate`.
    #[must_use]
    pub fn latest_for<F>(&self, class: TransferClass, predicate: F) -> Option<EventEnvelope>
    where
        F: Fn(&Event) -> bool,
    {
        self.lock_replay()
            .iter()
            .rev()
            .find(|envelope| envelope.event.class() == class && predicate(&envelope.event))
            .cloned()
    }

    fn lock_replay(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events from the replay backlog first, then from
/// the live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
    replayed_up_to: Option<EventId>,
}

impl EventStream {
    /// Receive the next event; `None` once the bus has been dropped.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }

        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if self
                        .replayed_up_to
                        .is_some_and(|replayed| envelope.id <= replayed)
                    {
                        continue;
                    }
                    return Some(envelope);
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::{JobInProgressState, SupervisorPhase};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn job_state(state: JobInProgressState) -> Event {
        Event::JobStateChanged {
            class: TransferClass::GeneralDownload,
            state,
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);
        let mut last_id = 0;
        for _ in 0..5 {
            last_id = bus.publish(job_state(JobInProgressState::ProcessingFiles));
        }
        assert_eq!(last_id, 5);
        assert_eq!(bus.last_event_id(), Some(5));

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(envelope) = stream.next().await {
                received.push(envelope.id);
            }
        }
        assert_eq!(received, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn replay_ring_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        let first = bus.publish(job_state(JobInProgressState::ScanningFiles));
        let _ = bus.publish(job_state(JobInProgressState::ProcessingFiles));
        let _ = bus.publish(job_state(JobInProgressState::Idle));
        let backlog = bus.backlog_since(0);
        assert_eq!(backlog.len(), 2);
        assert!(backlog.iter().all(|envelope| envelope.id > first));
    }

    #[tokio::test]
    async fn latest_for_filters_by_class_and_predicate() {
        let bus = EventBus::new();
        let run_id = Uuid::new_v4();
        let _ = bus.publish(Event::PhaseChanged {
            class: TransferClass::GeneralDownload,
            run_id,
            phase: SupervisorPhase::Scanning,
        });
        let _ = bus.publish(Event::PhaseChanged {
            class: TransferClass::ChatUpload,
            run_id,
            phase: SupervisorPhase::Transferring,
        });

        let latest = bus
            .latest_for(TransferClass::GeneralDownload, |event| {
                matches!(event, Event::PhaseChanged { .. })
            })
            .expect("download phase event");
        assert!(matches!(
            latest.event,
            Event::PhaseChanged {
                phase: SupervisorPhase::Scanning,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for _ in 0..500 {
                    timeout(Duration::from_secs(1), async {
                        let _ = bus.publish(job_state(JobInProgressState::ProcessingFiles));
                    })
                    .await
                    .expect("publish timed out");
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(envelope) = stream.next().await {
                    ids.insert(envelope.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = consumer.await.expect("consumer task panicked");
        assert_eq!(ids.len(), 500);
    }
}
