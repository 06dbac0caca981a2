//! Concrete destinations handed to the engine.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use super::trigger::ChatId;

const CONTENT_SCHEME: &str = "content";
const EXTERNAL_STORAGE_AUTHORITY: &str = "com.android.externalstorage.documents";
const PRIMARY_VOLUMES: [&str; 2] = ["primary", "home"];

/// Storage medium behind a content URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UriKind {
    /// Tree on a removable volume (SD card, USB drive).
    RemovableStorage,
    /// Document tree on internal storage or a document provider.
    DocumentTree,
}

/// Destination the engine writes into, tagged so consumers can branch on the
/// medium without re-parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedDestination {
    /// Absolute filesystem directory.
    Path {
        /// Directory path.
        path: PathBuf,
    },
    /// Opaque content URI granted by the platform picker.
    Uri {
        /// Raw URI string as supplied by the picker.
        uri: String,
        /// Storage medium the URI points at.
        kind: UriKind,
    },
    /// Engine-managed upload folder of a chat.
    Chat {
        /// Target chat.
        chat_id: ChatId,
    },
}

impl ResolvedDestination {
    /// Destination for an absolute directory.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path { path: path.into() }
    }

    /// Parse a value returned by the picker or stored as the remembered
    /// location. Accepts absolute paths and `content://` URIs; anything else
    /// yields `None`.
    #[must_use]
    pub fn parse_location(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with("content://") {
            let kind = classify_content_uri(raw)?;
            return Some(Self::Uri {
                uri: raw.to_string(),
                kind,
            });
        }
        let candidate = Path::new(raw);
        candidate.is_absolute().then(|| Self::path(candidate))
    }

    /// Filesystem directory, when the destination is one.
    #[must_use]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path { path } => Some(path),
            _ => None,
        }
    }

    /// Whether the destination lives on a removable volume.
    #[must_use]
    pub const fn is_removable(&self) -> bool {
        matches!(
            self,
            Self::Uri {
                kind: UriKind::RemovableStorage,
                ..
            }
        )
    }
}

impl Display for ResolvedDestination {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { path } => write!(formatter, "{}", path.display()),
            Self::Uri { uri, .. } => formatter.write_str(uri),
            Self::Chat { chat_id } => write!(formatter, "chat:{chat_id}"),
        }
    }
}

/// Tag a content URI by storage medium.
///
/// External-storage tree URIs name their volume before the first `:` of the
/// tree document id; any volume other than the primary one is removable.
/// Other document providers are treated as plain document trees.
fn classify_content_uri(raw: &str) -> Option<UriKind> {
    let parsed = Url::parse(raw).ok()?;
    if parsed.scheme() != CONTENT_SCHEME {
        return None;
    }
    if parsed.host_str() != Some(EXTERNAL_STORAGE_AUTHORITY) {
        return Some(UriKind::DocumentTree);
    }

    let mut segments = parsed.path_segments()?;
    let volume = loop {
        match segments.next() {
            Some("tree" | "document") => {
                let document_id = segments.next()?;
                let decoded = percent_decode_str(document_id).decode_utf8().ok()?;
                break decoded.split(':').next().map(str::to_owned)?;
            }
            Some(_) => {}
            None => return Some(UriKind::DocumentTree),
        }
    };

    if volume.is_empty() || PRIMARY_VOLUMES.contains(&volume.as_str()) {
        Some(UriKind::DocumentTree)
    } else {
        Some(UriKind::RemovableStorage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_parse_as_paths() {
        let parsed = ResolvedDestination::parse_location(" /storage/Download ").expect("path");
        assert_eq!(parsed.as_path(), Some(Path::new("/storage/Download")));
        assert!(!parsed.is_removable());
    }

    #[test]
    fn relative_and_empty_locations_are_rejected() {
        assert!(ResolvedDestination::parse_location("").is_none());
        assert!(ResolvedDestination::parse_location("   ").is_none());
        assert!(ResolvedDestination::parse_location("Download/here").is_none());
    }

    #[test]
    fn primary_volume_tree_is_document_tree() {
        let raw = "content://com.android.externalstorage.documents/tree/primary%3ADownload";
        let parsed = ResolvedDestination::parse_location(raw).expect("uri");
        assert_eq!(
            parsed,
            ResolvedDestination::Uri {
                uri: raw.to_string(),
                kind: UriKind::DocumentTree,
            }
        );
    }

    #[test]
    fn secondary_volume_tree_is_removable() {
        let raw = "content://com.android.externalstorage.documents/tree/1A2B-3C4D%3AMusic";
        let parsed = ResolvedDestination::parse_location(raw).expect("uri");
        assert!(parsed.is_removable());
    }

    #[test]
    fn document_ids_are_fully_percent_decoded() {
        for raw in [
            "content://com.android.externalstorage.documents/tree/primary%3aDownload",
            "content://com.android.externalstorage.documents/tree/%70rimary%3ADownload%2FSub",
        ] {
            let parsed = ResolvedDestination::parse_location(raw).expect("uri");
            assert!(!parsed.is_removable(), "{raw}");
        }
    }

    #[test]
    fn other_providers_are_document_trees() {
        let raw = "content://com.example.provider/tree/root";
        let parsed = ResolvedDestination::parse_location(raw).expect("uri");
        assert!(!parsed.is_removable());
    }

    #[test]
    fn display_renders_each_variant() {
        assert_eq!(
            ResolvedDestination::path("/tmp/out").to_string(),
            "/tmp/out"
        );
        assert_eq!(
            ResolvedDestination::Chat {
                chat_id: ChatId(42)
            }
            .to_string(),
            "chat:42"
        );
    }
}
