//! One-shot UI events and the messages they carry.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::trigger::TransferTrigger;

/// Value delivered to the UI at most once.
///
/// Consuming replaces the pending value with [`OneShot::Consumed`]; consuming
/// an already-consumed slot leaves it unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "event", rename_all = "snake_case")]
pub enum OneShot<T> {
    /// Event waiting for the UI.
    Pending(T),
    /// No event pending.
    #[default]
    Consumed,
}

impl<T> OneShot<T> {
    /// Whether an event is waiting.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Borrow the pending payload.
    #[must_use]
    pub const fn pending(&self) -> Option<&T> {
        match self {
            Self::Pending(event) => Some(event),
            Self::Consumed => None,
        }
    }

    /// Take the pending payload, leaving the slot consumed.
    pub fn take(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Self::Pending(event) => Some(event),
            Self::Consumed => None,
        }
    }
}

/// Short message shown once to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "snake_case")]
pub enum MessageKind {
    /// No network connection; nothing was started.
    NotConnected,
    /// The operation was cancelled before or while resolving.
    TransferCancelled,
    /// The destination ran out of space.
    InsufficientSpace,
    /// A node was saved for offline use.
    FinishedOffline,
    /// A number of files finished downloading.
    FinishedDownloadingPlural(u32),
    /// Account storage is over quota; uploads are blocked.
    StorageOverQuota,
}

impl Display for MessageKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => formatter.write_str("No network connection"),
            Self::TransferCancelled => formatter.write_str("Transfer cancelled"),
            Self::InsufficientSpace => formatter.write_str("Not enough storage space"),
            Self::FinishedOffline => formatter.write_str("Saved for offline use"),
            Self::FinishedDownloadingPlural(1) => formatter.write_str("1 file downloaded"),
            Self::FinishedDownloadingPlural(count) => write!(formatter, "{count} files downloaded"),
            Self::StorageOverQuota => formatter.write_str("Storage is full"),
        }
    }
}

/// Error attached to a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessingError {
    /// Some transfers of the run failed.
    PartialFailure {
        /// Transfers that failed.
        failed: u32,
        /// Transfers known to the run.
        total: u32,
    },
    /// The engine stopped reporting before every transfer finished.
    Incomplete {
        /// Transfers that never finished.
        pending: u32,
    },
}

impl Display for ProcessingError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartialFailure { failed, total } => {
                write!(formatter, "{failed} of {total} transfers failed")
            }
            Self::Incomplete { pending } => {
                write!(formatter, "{pending} transfers did not finish")
            }
        }
    }
}

/// Event surfaced to the UI once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OneShotEvent {
    /// The UI must show a folder picker and answer through the state machine.
    AskDestination {
        /// Trigger waiting for a destination.
        trigger: TransferTrigger,
    },
    /// The operation is large; the UI must confirm before anything starts.
    ConfirmLargeOperation {
        /// Human-readable payload size.
        size_label: String,
        /// Trigger to start once confirmed.
        trigger: TransferTrigger,
    },
    /// The run finished.
    FinishProcessing {
        /// Error of the run, if any transfers failed or never finished.
        error: Option<ProcessingError>,
        /// Top-level items the user selected.
        total_nodes: u32,
        /// Files the run transferred or found already present.
        total_files: u32,
        /// Files that were already present at the destination.
        already_downloaded: u32,
    },
    /// Short message.
    Message(MessageKind),
    /// Offer to remember the destination the user just picked.
    PromptSaveDestination {
        /// Picked location.
        path: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_consumes_once() {
        let mut slot = OneShot::Pending(MessageKind::NotConnected);
        assert!(slot.is_pending());
        assert_eq!(slot.take(), Some(MessageKind::NotConnected));
        assert_eq!(slot, OneShot::Consumed);
        assert_eq!(slot.take(), None);
        assert_eq!(slot, OneShot::Consumed);
    }

    #[test]
    fn plural_message_text() {
        assert_eq!(
            MessageKind::FinishedDownloadingPlural(1).to_string(),
            "1 file downloaded"
        );
        assert_eq!(
            MessageKind::FinishedDownloadingPlural(3).to_string(),
            "3 files downloaded"
        );
    }

    #[test]
    fn processing_error_text() {
        let error = ProcessingError::PartialFailure {
            failed: 1,
            total: 4,
        };
        assert_eq!(error.to_string(), "1 of 4 transfers failed");
    }
}
