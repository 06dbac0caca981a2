//! Notification values produced by the builder and handed to the poster.

use ferry_events::TransferClass;
use serde::{Deserialize, Serialize};

/// Stable channel identifier; re-posting under the same id replaces the
/// previous notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub u32);

impl NotificationId {
    /// Over-quota warning, shared by every class.
    pub const OVER_QUOTA: Self = Self(1_000);

    /// Progress and completion channel of a class.
    #[must_use]
    pub const fn for_class(class: TransferClass) -> Self {
        match class {
            TransferClass::GeneralDownload => Self(1_001),
            TransferClass::GeneralUpload => Self(1_002),
            TransferClass::ChatUpload => Self(1_003),
        }
    }
}

/// Determinate progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationProgress {
    /// Current value.
    pub current: u64,
    /// Maximum value.
    pub max: u64,
}

/// Rendered notification content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Title line.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Progress bar, absent for indeterminate or finished notifications.
    pub progress: Option<NotificationProgress>,
    /// Whether the notification is tied to ongoing work.
    pub ongoing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_channels_are_distinct() {
        let ids: Vec<_> = TransferClass::ALL
            .iter()
            .map(|class| NotificationId::for_class(*class))
            .collect();
        for (index, id) in ids.iter().enumerate() {
            assert_ne!(*id, NotificationId::OVER_QUOTA);
            assert!(!ids[index + 1..].contains(id));
        }
    }
}
