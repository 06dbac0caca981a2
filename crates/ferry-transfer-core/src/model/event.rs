//! Events reported by a transfer engine.

use chrono::{DateTime, Utc};
use ferry_events::TransferTag;
use serde::{Deserialize, Serialize};

/// Reason a single transfer failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFailure {
    /// Engine-specific error code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl TransferFailure {
    /// Build a failure from a code and message.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Event emitted by the engine for a run of transfers.
///
/// Per-transfer events carry the engine-assigned tag; timestamps come from the
/// engine so folding stays independent of the wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// Transfer enumerated and waiting for a slot.
    Queued {
        /// Transfer tag.
        tag: TransferTag,
        /// Bytes the transfer is expected to move.
        expected_bytes: u64,
    },
    /// Transfer began moving bytes.
    Started {
        /// Transfer tag.
        tag: TransferTag,
        /// Bytes the transfer is expected to move.
        expected_bytes: u64,
    },
    /// Transfer progress sample.
    Progress {
        /// Transfer tag.
        tag: TransferTag,
        /// Bytes moved so far for this transfer.
        transferred_bytes: u64,
        /// Engine timestamp of the sample.
        at: DateTime<Utc>,
    },
    /// Transfer finished; `error` is set when it failed.
    Finished {
        /// Transfer tag.
        tag: TransferTag,
        /// Failure reason, if any.
        error: Option<TransferFailure>,
        /// Engine timestamp of completion.
        at: DateTime<Utc>,
    },
    /// Destination already held the data; nothing was moved.
    AlreadyTransferred {
        /// Transfer tag.
        tag: TransferTag,
        /// Size of the existing data.
        bytes: u64,
    },
    /// Every transfer of the request has been enumerated.
    AllUpdated,
    /// Destination medium ran out of space; the engine stops the request.
    InsufficientSpace,
    /// Account storage quota exceeded.
    QuotaExceeded {
        /// Whether the account is blocked behind a paywall.
        paywall: bool,
    },
}

impl TransferEvent {
    /// Tag of the transfer the event refers to, if any.
    #[must_use]
    pub const fn tag(&self) -> Option<TransferTag> {
        match self {
            Self::Queued { tag, .. }
            | Self::Started { tag, .. }
            | Self::Progress { tag, .. }
            | Self::Finished { tag, .. }
            | Self::AlreadyTransferred { tag, .. } => Some(*tag),
            Self::AllUpdated | Self::InsufficientSpace | Self::QuotaExceeded { .. } => None,
        }
    }

    /// Whether consumers should flush pending samples immediately.
    #[must_use]
    pub const fn is_urgent(&self) -> bool {
        matches!(self, Self::AllUpdated | Self::InsufficientSpace)
    }

    /// Short label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Finished { .. } => "finished",
            Self::AlreadyTransferred { .. } => "already_transferred",
            Self::AllUpdated => "all_updated",
            Self::InsufficientSpace => "insufficient_space",
            Self::QuotaExceeded { .. } => "quota_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_have_no_tag() {
        assert_eq!(TransferEvent::AllUpdated.tag(), None);
        assert_eq!(
            TransferEvent::Queued {
                tag: 4,
                expected_bytes: 1
            }
            .tag(),
            Some(4)
        );
        assert!(TransferEvent::InsufficientSpace.is_urgent());
        assert!(!TransferEvent::QuotaExceeded { paywall: true }.is_urgent());
    }

    #[test]
    fn events_serialise_with_type_tag() {
        let json = serde_json::to_value(TransferEvent::QuotaExceeded { paywall: false })
            .expect("serialise");
        assert_eq!(json["type"], "quota_exceeded");
        assert_eq!(json["paywall"], false);
    }
}
