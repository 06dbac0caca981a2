//! Trigger builders and canned engine event sequences.

use chrono::{DateTime, TimeZone, Utc};
use ferry_events::TransferTag;
use ferry_transfer_core::{ChatId, NodeRef, TransferEvent, TransferFailure, TransferTrigger};

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Fixed engine timestamp `offset_ms` after an arbitrary epoch.
#[must_use]
pub fn at(offset_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000 + offset_ms)
        .single()
        .unwrap_or_else(Utc::now)
}

/// File node named `name` directly under `/files`.
#[must_use]
pub fn file_node(id: u64, name: &str) -> NodeRef {
    NodeRef::file(id, name, "/files")
}

/// General download of `nodes`.
#[must_use]
pub const fn download(nodes: Vec<NodeRef>) -> TransferTrigger {
    TransferTrigger::DownloadNodes {
        nodes,
        high_priority: false,
    }
}

/// Offline save of `node`.
#[must_use]
pub const fn offline(node: NodeRef) -> TransferTrigger {
    TransferTrigger::DownloadForOffline {
        node,
        high_priority: false,
    }
}

/// Preview fetch of `node`.
#[must_use]
pub const fn preview(node: NodeRef) -> TransferTrigger {
    TransferTrigger::DownloadForPreview { node }
}

/// Chat attachment upload of `sources`.
#[must_use]
pub fn chat_upload(chat_id: u64, sources: &[&str]) -> TransferTrigger {
    TransferTrigger::UploadChatAttachment {
        chat_id: ChatId(chat_id),
        sources: sources.iter().map(ToString::to_string).collect(),
        is_voice_clip: false,
    }
}

/// Events of a transfer that starts and completes in one go.
#[must_use]
pub fn completed_transfer(tag: TransferTag, bytes: u64) -> Vec<TransferEvent> {
    vec![
        TransferEvent::Started {
            tag,
            expected_bytes: bytes,
        },
        TransferEvent::Progress {
            tag,
            transferred_bytes: bytes,
            at: at(i64::try_from(tag).unwrap_or_default() * 10),
        },
        TransferEvent::Finished {
            tag,
            error: None,
            at: at(i64::try_from(tag).unwrap_or_default() * 10 + 5),
        },
    ]
}

/// Events of a transfer that starts and fails.
#[must_use]
pub fn failed_transfer(tag: TransferTag, bytes: u64) -> Vec<TransferEvent> {
    vec![
        TransferEvent::Started {
            tag,
            expected_bytes: bytes,
        },
        TransferEvent::Finished {
            tag,
            error: Some(TransferFailure::new(-1, "scripted failure")),
            at: at(i64::try_from(tag).unwrap_or_default() * 10 + 5),
        },
    ]
}

/// Full request: every transfer completes, then enumeration ends.
#[must_use]
pub fn completed_request(tags: &[TransferTag], bytes: u64) -> Vec<TransferEvent> {
    let mut events: Vec<_> = tags
        .iter()
        .flat_map(|tag| completed_transfer(*tag, bytes))
        .collect();
    events.push(TransferEvent::AllUpdated);
    events
}
