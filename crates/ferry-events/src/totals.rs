//! Aggregate totals for one transfer class.
//!
//! Values of [`ActiveTransferTotals`] are replaced, never edited, between
//! samples: the aggregator builds a new value for every folded batch.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payloads::TransferClass;

/// Engine-assigned identifier of an individual transfer.
pub type TransferTag = u64;

/// Lifecycle of a single transfer as seen by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Enumerated but not started.
    Queued,
    /// Moving bytes.
    Started,
    /// Finished without error.
    Completed,
    /// Finished with an error.
    Failed,
}

impl SlotState {
    /// Whether the transfer has finished, successfully or not.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Per-transfer bookkeeping kept inside the totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSlot {
    /// Current lifecycle state.
    pub state: SlotState,
    /// Bytes the transfer is expected to move.
    pub expected_bytes: u64,
    /// Bytes moved so far.
    pub transferred_bytes: u64,
}

/// Point on the transferred-bytes curve used for the trailing speed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedSample {
    /// Timestamp reported by the engine.
    pub at: DateTime<Utc>,
    /// Aggregate transferred bytes at that instant.
    pub transferred_bytes: u64,
}

/// Running totals for every transfer of one class within a supervisor run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTransferTotals {
    /// Class the totals describe.
    pub class: TransferClass,
    /// Transfers known so far (queued or started).
    pub total_transfers: u32,
    /// Transfers that started moving bytes.
    pub started: u32,
    /// Transfers that finished without error.
    pub completed: u32,
    /// Transfers that finished with an error.
    pub failed: u32,
    /// Completed transfers whose target already held the data.
    pub already_transferred: u32,
    /// Bytes expected across all known transfers.
    pub total_bytes: u64,
    /// Bytes moved across all known transfers.
    pub transferred_bytes: u64,
    /// Speed over the trailing window, in bytes per second.
    pub speed_bps: u64,
    /// Whether the engine has enumerated every transfer of the run.
    pub all_enumerated: bool,
    /// Per-transfer bookkeeping keyed by engine tag.
    #[serde(default)]
    pub transfers: BTreeMap<TransferTag, TransferSlot>,
    /// Samples inside the trailing speed window, oldest first.
    #[serde(default)]
    pub speed_samples: VecDeque<SpeedSample>,
}

impl ActiveTransferTotals {
    /// Empty totals for a fresh run.
    #[must_use]
    pub const fn new(class: TransferClass) -> Self {
        Self {
            class,
            total_transfers: 0,
            started: 0,
            completed: 0,
            failed: 0,
            already_transferred: 0,
            total_bytes: 0,
            transferred_bytes: 0,
            speed_bps: 0,
            all_enumerated: false,
            transfers: BTreeMap::new(),
            speed_samples: VecDeque::new(),
        }
    }

    /// Every transfer has been enumerated and has finished.
    ///
    /// A run that enumerated zero transfers has completed; a run that has not
    /// finished enumerating has not, whatever its counters say.
    #[must_use]
    pub const fn has_completed(&self) -> bool {
        self.all_enumerated && self.finished() == self.total_transfers
    }

    /// At least one known transfer has not finished.
    #[must_use]
    pub const fn has_ongoing_transfers(&self) -> bool {
        self.finished() < self.total_transfers
    }

    /// Transfers that finished, with or without error.
    #[must_use]
    pub const fn finished(&self) -> u32 {
        self.completed.saturating_add(self.failed)
    }

    /// Known transfers that have not finished.
    #[must_use]
    pub const fn pending(&self) -> u32 {
        self.total_transfers.saturating_sub(self.finished())
    }

    /// Byte progress as a percentage.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }

    /// Copy whose enumeration flag is cleared, used when more work joins a run.
    #[must_use]
    pub fn reopened(&self) -> Self {
        Self {
            all_enumerated: false,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_totals_are_not_completed() {
        let totals = ActiveTransferTotals::new(TransferClass::GeneralDownload);
        assert!(!totals.has_completed());
        assert!(!totals.has_ongoing_transfers());
        assert_eq!(totals.pending(), 0);
    }

    #[test]
    fn zero_transfers_complete_once_enumerated() {
        let mut totals = ActiveTransferTotals::new(TransferClass::GeneralDownload);
        totals.all_enumerated = true;
        assert!(totals.has_completed());
        assert_eq!(totals.total_transfers, 0);
    }

    #[test]
    fn reopened_clears_enumeration_only() {
        let mut totals = ActiveTransferTotals::new(TransferClass::ChatUpload);
        totals.all_enumerated = true;
        totals.total_transfers = 2;
        totals.completed = 2;
        let reopened = totals.reopened();
        assert!(!reopened.all_enumerated);
        assert_eq!(reopened.completed, 2);
        assert!(!reopened.has_completed());
    }

    #[test]
    fn percent_complete_handles_zero_total() {
        let mut totals = ActiveTransferTotals::new(TransferClass::GeneralDownload);
        assert!((totals.percent_complete() - 0.0).abs() < f64::EPSILON);
        totals.total_bytes = 200;
        totals.transferred_bytes = 50;
        assert!((totals.percent_complete() - 25.0).abs() < f64::EPSILON);
    }
}
