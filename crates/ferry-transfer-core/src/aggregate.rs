//! Pure fold of engine events into [`ActiveTransferTotals`].
//!
//! Counters only move forward: repeated `Started`/`Finished` events for a tag
//! are ignored and progress never lowers a transfer's byte count, so
//! `completed + failed <= started <= total_transfers` holds after every fold.

use chrono::{DateTime, Utc};
use ferry_events::{ActiveTransferTotals, SlotState, SpeedSample, TransferSlot, TransferTag};

use crate::model::TransferEvent;

/// Length of the trailing speed window in milliseconds.
pub const SPEED_WINDOW_MS: i64 = 3_000;

/// Fold one event into a new totals value.
#[must_use]
pub fn fold(previous: &ActiveTransferTotals, event: &TransferEvent) -> ActiveTransferTotals {
    let mut next = previous.clone();
    apply(&mut next, event);
    next
}

/// Fold a batch of events in order.
///
/// The previous value is cloned once and the batch is applied to the copy,
/// so a batch costs one clone plus a map lookup per event.
#[must_use]
pub fn fold_all<'a, I>(previous: &ActiveTransferTotals, events: I) -> ActiveTransferTotals
where
    I: IntoIterator<Item = &'a TransferEvent>,
{
    let mut next = previous.clone();
    for event in events {
        apply(&mut next, event);
    }
    next
}

fn apply(totals: &mut ActiveTransferTotals, event: &TransferEvent) {
    match event {
        TransferEvent::Queued {
            tag,
            expected_bytes,
        } => tracked(totals, *tag, |totals| on_queued(totals, *tag, *expected_bytes)),
        TransferEvent::Started {
            tag,
            expected_bytes,
        } => tracked(totals, *tag, |totals| on_started(totals, *tag, *expected_bytes)),
        TransferEvent::Progress {
            tag,
            transferred_bytes,
            at,
        } => {
            if tracked(totals, *tag, |totals| {
                on_progress(totals, *tag, *transferred_bytes)
            }) {
                record_sample(totals, *at);
            }
        }
        TransferEvent::Finished { tag, error, at } => {
            if tracked(totals, *tag, |totals| {
                on_finished(totals, *tag, error.is_none())
            }) {
                record_sample(totals, *at);
            }
        }
        TransferEvent::AlreadyTransferred { tag, bytes } => {
            tracked(totals, *tag, |totals| on_already_transferred(totals, *tag, *bytes));
        }
        TransferEvent::AllUpdated => totals.all_enumerated = true,
        TransferEvent::InsufficientSpace | TransferEvent::QuotaExceeded { .. } => {}
    }
}

/// Run `change` against the slot of `tag` and move the aggregate byte counts
/// by the difference it made to that slot.
fn tracked<R>(
    totals: &mut ActiveTransferTotals,
    tag: TransferTag,
    change: impl FnOnce(&mut ActiveTransferTotals) -> R,
) -> R {
    let before = byte_share(totals, tag);
    let result = change(totals);
    let after = byte_share(totals, tag);
    totals.total_bytes = totals
        .total_bytes
        .saturating_sub(before.0)
        .saturating_add(after.0);
    totals.transferred_bytes = totals
        .transferred_bytes
        .saturating_sub(before.1)
        .saturating_add(after.1);
    result
}

/// Expected and transferred bytes `tag` contributes to the totals.
fn byte_share(totals: &ActiveTransferTotals, tag: TransferTag) -> (u64, u64) {
    totals.transfers.get(&tag).map_or((0, 0), |slot| {
        (
            slot.expected_bytes.max(slot.transferred_bytes),
            slot.transferred_bytes,
        )
    })
}

fn slot(state: SlotState, expected_bytes: u64, transferred_bytes: u64) -> TransferSlot {
    TransferSlot {
        state,
        expected_bytes,
        transferred_bytes,
    }
}

fn on_queued(totals: &mut ActiveTransferTotals, tag: TransferTag, expected_bytes: u64) {
    if totals.transfers.contains_key(&tag) {
        return;
    }
    totals
        .transfers
        .insert(tag, slot(SlotState::Queued, expected_bytes, 0));
    totals.total_transfers = totals.total_transfers.saturating_add(1);
}

fn on_started(totals: &mut ActiveTransferTotals, tag: TransferTag, expected_bytes: u64) {
    match totals.transfers.get_mut(&tag) {
        None => {
            totals
                .transfers
                .insert(tag, slot(SlotState::Started, expected_bytes, 0));
            totals.total_transfers = totals.total_transfers.saturating_add(1);
            totals.started = totals.started.saturating_add(1);
        }
        Some(existing) if existing.state == SlotState::Queued => {
            existing.state = SlotState::Started;
            existing.expected_bytes = expected_bytes;
            totals.started = totals.started.saturating_add(1);
        }
        Some(_) => {}
    }
}

/// Returns whether the event changed the slot.
fn on_progress(totals: &mut ActiveTransferTotals, tag: TransferTag, transferred_bytes: u64) -> bool {
    let Some(existing) = totals.transfers.get_mut(&tag) else {
        return false;
    };
    if existing.state.is_finished() {
        return false;
    }
    if existing.state == SlotState::Queued {
        existing.state = SlotState::Started;
        totals.started = totals.started.saturating_add(1);
    }
    existing.transferred_bytes = existing.transferred_bytes.max(transferred_bytes);
    true
}

/// Returns whether the event changed the slot.
fn on_finished(totals: &mut ActiveTransferTotals, tag: TransferTag, succeeded: bool) -> bool {
    let existing = totals.transfers.entry(tag).or_insert_with(|| {
        totals.total_transfers = totals.total_transfers.saturating_add(1);
        slot(SlotState::Queued, 0, 0)
    });
    if existing.state.is_finished() {
        return false;
    }
    if existing.state == SlotState::Queued {
        totals.started = totals.started.saturating_add(1);
    }
    if succeeded {
        existing.state = SlotState::Completed;
        existing.transferred_bytes = existing.transferred_bytes.max(existing.expected_bytes);
        totals.completed = totals.completed.saturating_add(1);
    } else {
        existing.state = SlotState::Failed;
        totals.failed = totals.failed.saturating_add(1);
    }
    true
}

fn on_already_transferred(totals: &mut ActiveTransferTotals, tag: TransferTag, bytes: u64) {
    let existing = totals.transfers.entry(tag).or_insert_with(|| {
        totals.total_transfers = totals.total_transfers.saturating_add(1);
        slot(SlotState::Queued, bytes, 0)
    });
    if existing.state.is_finished() {
        return;
    }
    if existing.state == SlotState::Queued {
        totals.started = totals.started.saturating_add(1);
    }
    existing.state = SlotState::Completed;
    existing.expected_bytes = existing.expected_bytes.max(bytes);
    existing.transferred_bytes = existing.expected_bytes;
    totals.completed = totals.completed.saturating_add(1);
    totals.already_transferred = totals.already_transferred.saturating_add(1);
}

fn record_sample(totals: &mut ActiveTransferTotals, at: DateTime<Utc>) {
    if totals
        .speed_samples
        .back()
        .is_some_and(|latest| latest.at > at)
    {
        return;
    }
    totals.speed_samples.push_back(SpeedSample {
        at,
        transferred_bytes: totals.transferred_bytes,
    });

    let cutoff = at - chrono::Duration::milliseconds(SPEED_WINDOW_MS);
    while totals
        .speed_samples
        .front()
        .is_some_and(|oldest| oldest.at < cutoff)
    {
        let _ = totals.speed_samples.pop_front();
    }

    let (Some(oldest), Some(latest)) = (totals.speed_samples.front(), totals.speed_samples.back())
    else {
        return;
    };
    let elapsed_ms = (latest.at - oldest.at).num_milliseconds();
    totals.speed_bps = if elapsed_ms > 0 {
        let moved = latest
            .transferred_bytes
            .saturating_sub(oldest.transferred_bytes);
        moved.saturating_mul(1_000) / elapsed_ms.unsigned_abs()
    } else {
        0
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransferFailure;
    use chrono::TimeZone;
    use ferry_events::TransferClass;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms)
            .single()
            .expect("valid timestamp")
    }

    fn fresh() -> ActiveTransferTotals {
        ActiveTransferTotals::new(TransferClass::GeneralDownload)
    }

    fn assert_invariant(totals: &ActiveTransferTotals) {
        assert!(totals.completed + totals.failed <= totals.started);
        assert!(totals.started <= totals.total_transfers);
    }

    #[test]
    fn counters_are_monotone_across_duplicates() {
        let events = vec![
            TransferEvent::Started {
                tag: 1,
                expected_bytes: 100,
            },
            TransferEvent::Started {
                tag: 1,
                expected_bytes: 100,
            },
            TransferEvent::Progress {
                tag: 1,
                transferred_bytes: 60,
                at: at(0),
            },
            TransferEvent::Progress {
                tag: 1,
                transferred_bytes: 40,
                at: at(100),
            },
            TransferEvent::Finished {
                tag: 1,
                error: None,
                at: at(200),
            },
            TransferEvent::Finished {
                tag: 1,
                error: Some(TransferFailure::new(5, "late")),
                at: at(300),
            },
            TransferEvent::Queued {
                tag: 2,
                expected_bytes: 50,
            },
            TransferEvent::Finished {
                tag: 2,
                error: Some(TransferFailure::new(7, "io")),
                at: at(400),
            },
        ];

        let mut totals = fresh();
        let mut previous = totals.clone();
        for event in &events {
            totals = fold(&totals, event);
            assert_invariant(&totals);
            assert!(totals.started >= previous.started);
            assert!(totals.completed >= previous.completed);
            assert!(totals.failed >= previous.failed);
            previous = totals.clone();
        }

        assert_eq!(totals.total_transfers, 2);
        assert_eq!(totals.started, 2);
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.total_bytes, 150);
        assert_eq!(totals.transferred_bytes, 100);
    }

    #[test]
    fn progress_never_lowers_bytes() {
        let totals = fold_all(
            &fresh(),
            &[
                TransferEvent::Started {
                    tag: 9,
                    expected_bytes: 1_000,
                },
                TransferEvent::Progress {
                    tag: 9,
                    transferred_bytes: 700,
                    at: at(0),
                },
                TransferEvent::Progress {
                    tag: 9,
                    transferred_bytes: 300,
                    at: at(10),
                },
            ],
        );
        assert_eq!(totals.transferred_bytes, 700);
    }

    #[test]
    fn zero_transfers_complete_after_marker() {
        let scanning = fresh();
        assert!(!scanning.has_completed());
        let done = fold(&scanning, &TransferEvent::AllUpdated);
        assert!(done.has_completed());
        assert_eq!(done.total_transfers, 0);
        assert!(!done.has_ongoing_transfers());
    }

    #[test]
    fn unknown_finished_counts_as_started() {
        let totals = fold(
            &fresh(),
            &TransferEvent::Finished {
                tag: 3,
                error: None,
                at: at(0),
            },
        );
        assert_eq!(totals.total_transfers, 1);
        assert_eq!(totals.started, 1);
        assert_eq!(totals.completed, 1);
        assert_invariant(&totals);
    }

    #[test]
    fn already_transferred_counts_as_completed() {
        let totals = fold_all(
            &fresh(),
            &[
                TransferEvent::Queued {
                    tag: 1,
                    expected_bytes: 10,
                },
                TransferEvent::AlreadyTransferred { tag: 1, bytes: 10 },
                TransferEvent::AlreadyTransferred { tag: 2, bytes: 30 },
                TransferEvent::AllUpdated,
            ],
        );
        assert_eq!(totals.total_transfers, 2);
        assert_eq!(totals.started, 2);
        assert_eq!(totals.completed, 2);
        assert_eq!(totals.already_transferred, 2);
        assert_eq!(totals.transferred_bytes, 40);
        assert!(totals.has_completed());
    }

    #[test]
    fn speed_uses_trailing_window() {
        let mut totals = fold(
            &fresh(),
            &TransferEvent::Started {
                tag: 1,
                expected_bytes: 100_000,
            },
        );
        for (ms, bytes) in [(0, 0), (1_000, 1_000), (2_000, 2_000), (6_000, 10_000)] {
            totals = fold(
                &totals,
                &TransferEvent::Progress {
                    tag: 1,
                    transferred_bytes: bytes,
                    at: at(ms),
                },
            );
        }
        // Only the last sample is inside the window, so speed is unknown.
        assert_eq!(totals.speed_samples.len(), 1);
        assert_eq!(totals.speed_bps, 0);

        totals = fold(
            &totals,
            &TransferEvent::Progress {
                tag: 1,
                transferred_bytes: 14_000,
                at: at(8_000),
            },
        );
        assert_eq!(totals.speed_bps, 2_000);
    }

    #[test]
    fn out_of_order_samples_are_not_recorded() {
        let totals = fold_all(
            &fresh(),
            &[
                TransferEvent::Started {
                    tag: 1,
                    expected_bytes: 500,
                },
                TransferEvent::Progress {
                    tag: 1,
                    transferred_bytes: 100,
                    at: at(1_000),
                },
                TransferEvent::Progress {
                    tag: 1,
                    transferred_bytes: 200,
                    at: at(500),
                },
            ],
        );
        assert_eq!(totals.speed_samples.len(), 1);
        assert_eq!(totals.transferred_bytes, 200);
    }

    #[test]
    fn batches_match_event_by_event_folding() {
        let events = vec![
            TransferEvent::Queued {
                tag: 1,
                expected_bytes: 300,
            },
            TransferEvent::Started {
                tag: 2,
                expected_bytes: 100,
            },
            TransferEvent::Progress {
                tag: 2,
                transferred_bytes: 250,
                at: at(0),
            },
            TransferEvent::Finished {
                tag: 1,
                error: None,
                at: at(500),
            },
            TransferEvent::AlreadyTransferred { tag: 3, bytes: 40 },
            TransferEvent::AllUpdated,
        ];
        let stepwise = events.iter().fold(fresh(), |totals, event| fold(&totals, event));
        let previous = fresh();
        let batched = fold_all(&previous, &events);

        assert_eq!(batched, stepwise);
        assert_eq!(previous, fresh());
        // Tag 2 overshot its estimate, so its moved bytes count as expected.
        assert_eq!(batched.total_bytes, 300 + 250 + 40);
        assert_eq!(batched.transferred_bytes, 300 + 250 + 40);
    }

    #[test]
    fn large_batches_keep_byte_counts_exact() {
        let events: Vec<TransferEvent> = (0..20_000)
            .map(|tag| TransferEvent::Queued {
                tag,
                expected_bytes: 2,
            })
            .chain((0..10_000).map(|tag| TransferEvent::Finished {
                tag,
                error: None,
                at: at(1_000),
            }))
            .collect();
        let totals = fold_all(&fresh(), &events);
        assert_eq!(totals.total_transfers, 20_000);
        assert_eq!(totals.completed, 10_000);
        assert_eq!(totals.total_bytes, 40_000);
        assert_eq!(totals.transferred_bytes, 20_000);
    }

    #[test]
    fn fold_leaves_previous_untouched() {
        let previous = fresh();
        let _ = fold(
            &previous,
            &TransferEvent::Queued {
                tag: 1,
                expected_bytes: 5,
            },
        );
        assert_eq!(previous, fresh());
    }
}
