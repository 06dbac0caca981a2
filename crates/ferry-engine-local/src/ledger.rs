//! Per-class bookkeeping shared by the engine and its workers.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use ferry_events::{TransferClass, TransferTag};

const SPEED_WINDOW: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
struct ClassLedger {
    finished: BTreeSet<TransferTag>,
    moved_bytes: u64,
    samples: VecDeque<(Instant, u64)>,
}

/// Finished transfers and recent throughput, keyed by class.
#[derive(Debug, Default)]
pub struct Ledger {
    classes: Mutex<HashMap<TransferClass, ClassLedger>>,
}

impl Ledger {
    /// Account bytes written by a worker.
    pub fn record_bytes(&self, class: TransferClass, delta: u64) {
        self.record_bytes_at(class, delta, Instant::now());
    }

    fn record_bytes_at(&self, class: TransferClass, delta: u64, now: Instant) {
        let mut classes = self.classes.lock().unwrap_or_else(PoisonError::into_inner);
        let ledger = classes.entry(class).or_default();
        ledger.moved_bytes = ledger.moved_bytes.saturating_add(delta);
        ledger.samples.push_back((now, ledger.moved_bytes));
        prune(&mut ledger.samples, now);
    }

    /// Remember a transfer that reached a terminal state.
    pub fn mark_finished(&self, class: TransferClass, tag: TransferTag) {
        let mut classes = self.classes.lock().unwrap_or_else(PoisonError::into_inner);
        classes.entry(class).or_default().finished.insert(tag);
    }

    /// Number of finished transfers still tracked for a class.
    pub fn finished_count(&self, class: TransferClass) -> usize {
        let classes = self.classes.lock().unwrap_or_else(PoisonError::into_inner);
        classes.get(&class).map_or(0, |ledger| ledger.finished.len())
    }

    /// Forget finished transfers of a class.
    pub fn clear_finished(&self, class: TransferClass) {
        let mut classes = self.classes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ledger) = classes.get_mut(&class) {
            ledger.finished.clear();
        }
    }

    /// Throughput over the trailing window in bytes per second.
    pub fn speed(&self, class: TransferClass) -> u64 {
        self.speed_at(class, Instant::now())
    }

    fn speed_at(&self, class: TransferClass, now: Instant) -> u64 {
        let mut classes = self.classes.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(ledger) = classes.get_mut(&class) else {
            return 0;
        };
        prune(&mut ledger.samples, now);
        let Some(&(oldest_at, oldest_bytes)) = ledger.samples.front() else {
            return 0;
        };
        let elapsed = now.saturating_duration_since(oldest_at).as_millis();
        if elapsed == 0 {
            return 0;
        }
        let delta = u128::from(ledger.moved_bytes.saturating_sub(oldest_bytes));
        u64::try_from(delta * 1000 / elapsed).unwrap_or(u64::MAX)
    }
}

fn prune(samples: &mut VecDeque<(Instant, u64)>, now: Instant) {
    while samples
        .front()
        .is_some_and(|(at, _)| now.saturating_duration_since(*at) > SPEED_WINDOW)
    {
        samples.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_uses_the_trailing_window() {
        let ledger = Ledger::default();
        let class = TransferClass::GeneralDownload;
        let start = Instant::now();
        ledger.record_bytes_at(class, 1_000, start);
        ledger.record_bytes_at(class, 2_000, start + Duration::from_secs(1));
        assert_eq!(ledger.speed_at(class, start + Duration::from_secs(2)), 1_000);
        assert_eq!(ledger.speed_at(class, start + Duration::from_secs(10)), 0);
        assert_eq!(ledger.speed_at(TransferClass::ChatUpload, start), 0);
    }

    #[test]
    fn clearing_only_touches_one_class() {
        let ledger = Ledger::default();
        ledger.mark_finished(TransferClass::GeneralDownload, 1);
        ledger.mark_finished(TransferClass::GeneralDownload, 2);
        ledger.mark_finished(TransferClass::ChatUpload, 3);
        ledger.clear_finished(TransferClass::GeneralDownload);
        assert_eq!(ledger.finished_count(TransferClass::GeneralDownload), 0);
        assert_eq!(ledger.finished_count(TransferClass::ChatUpload), 1);
    }
}
