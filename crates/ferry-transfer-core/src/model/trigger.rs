//! Triggers describing what the user asked to transfer.

use std::fmt::{self, Display, Formatter};

use ferry_events::{TransferClass, TriggerKind};
use serde::{Deserialize, Serialize};

/// Identifier of a remote node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl Display for NodeId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{:016x}", self.0)
    }
}

/// Identifier of a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub u64);

impl Display for ChatId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Handle on a remote node, carrying what destination resolution needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    /// Node identifier.
    pub id: NodeId,
    /// Display name; also the file or folder name on disk.
    pub name: String,
    /// Slash-separated path of the parent folder in the remote tree.
    pub parent_path: String,
    /// Whether the node is a folder.
    pub is_folder: bool,
}

impl NodeRef {
    /// Convenience constructor for a file node.
    #[must_use]
    pub fn file(id: u64, name: impl Into<String>, parent_path: impl Into<String>) -> Self {
        Self {
            id: NodeId(id),
            name: name.into(),
            parent_path: parent_path.into(),
            is_folder: false,
        }
    }

    /// Convenience constructor for a folder node.
    #[must_use]
    pub fn folder(id: u64, name: impl Into<String>, parent_path: impl Into<String>) -> Self {
        Self {
            id: NodeId(id),
            name: name.into(),
            parent_path: parent_path.into(),
            is_folder: true,
        }
    }

    /// Parent path components with empty segments removed.
    pub fn parent_components(&self) -> impl Iterator<Item = &str> {
        self.parent_path
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
    }

    /// Full slash-separated path of the node in the remote tree.
    #[must_use]
    pub fn remote_path(&self) -> String {
        let mut path = String::from("/");
        for component in self.parent_components() {
            path.push_str(component);
            path.push('/');
        }
        path.push_str(&self.name);
        path
    }
}

/// Immutable description of a requested transfer operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferTrigger {
    /// Download one or more nodes to a user-facing location.
    DownloadNodes {
        /// Nodes to download.
        nodes: Vec<NodeRef>,
        /// Whether the engine should put the transfers ahead of the queue.
        high_priority: bool,
    },
    /// Save a node for offline use.
    DownloadForOffline {
        /// Node to save.
        node: NodeRef,
        /// Whether the engine should put the transfer ahead of the queue.
        high_priority: bool,
    },
    /// Fetch a node into the ephemeral preview cache.
    DownloadForPreview {
        /// Node to preview.
        node: NodeRef,
    },
    /// Upload local files as attachments to a chat.
    UploadChatAttachment {
        /// Target chat.
        chat_id: ChatId,
        /// Local paths or content URIs of the files to upload.
        sources: Vec<String>,
        /// Whether the attachment is a recorded voice clip.
        is_voice_clip: bool,
    },
}

impl TransferTrigger {
    /// Discriminant used on the event bus and in persisted run state.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        match self {
            Self::DownloadNodes { .. } => TriggerKind::DownloadNodes,
            Self::DownloadForOffline { .. } => TriggerKind::DownloadForOffline,
            Self::DownloadForPreview { .. } => TriggerKind::DownloadForPreview,
            Self::UploadChatAttachment { .. } => TriggerKind::UploadChatAttachment,
        }
    }

    /// Class whose supervisor runs the transfers.
    #[must_use]
    pub const fn class(&self) -> TransferClass {
        match self {
            Self::DownloadNodes { .. }
            | Self::DownloadForOffline { .. }
            | Self::DownloadForPreview { .. } => TransferClass::GeneralDownload,
            Self::UploadChatAttachment { .. } => TransferClass::ChatUpload,
        }
    }

    /// Nodes referenced by the trigger; empty for uploads.
    #[must_use]
    pub fn nodes(&self) -> &[NodeRef] {
        match self {
            Self::DownloadNodes { nodes, .. } => nodes,
            Self::DownloadForOffline { node, .. } | Self::DownloadForPreview { node } => {
                std::slice::from_ref(node)
            }
            Self::UploadChatAttachment { .. } => &[],
        }
    }

    /// Number of top-level items the user selected.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        let count = match self {
            Self::UploadChatAttachment { sources, .. } => sources.len(),
            _ => self.nodes().len(),
        };
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Whether the transfers should be prioritised by the engine.
    #[must_use]
    pub const fn high_priority(&self) -> bool {
        match self {
            Self::DownloadNodes { high_priority, .. }
            | Self::DownloadForOffline { high_priority, .. } => *high_priority,
            Self::DownloadForPreview { .. } => true,
            Self::UploadChatAttachment { .. } => false,
        }
    }

    /// Whether the trigger moves bytes away from the device.
    #[must_use]
    pub const fn is_upload(&self) -> bool {
        self.class().is_upload()
    }
}
