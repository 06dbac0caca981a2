//! Host-side collaborators used by the command-line binary.
//!
//! Notifications are rendered as plain text and written to the log; the
//! terminal is assumed online with unlimited account storage.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ferry_events::{ActiveTransferTotals, RunOutcome};
use ferry_transfer_core::{
    ConnectivityOracle, Notification, NotificationBuilder, NotificationId, NotificationPoster,
    NotificationProgress, QuotaOracle, RatingPolicy,
};
use tracing::info;

use crate::guard::format_size;

/// Renders totals into short text notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextNotificationBuilder;

impl NotificationBuilder for TextNotificationBuilder {
    fn build(&self, totals: &ActiveTransferTotals, is_upload: bool) -> Notification {
        let verb = if is_upload { "Uploading" } else { "Downloading" };
        let title = format!("{verb} {}", plural_files(totals.total_transfers));
        let body = format!(
            "{} of {} ({} of {})",
            totals.finished(),
            totals.total_transfers,
            format_size(totals.transferred_bytes),
            format_size(totals.total_bytes)
        );
        Notification {
            title,
            body,
            progress: Some(NotificationProgress {
                current: totals.transferred_bytes,
                max: totals.total_bytes,
            }),
            ongoing: true,
        }
    }

    fn build_finished(&self, totals: &ActiveTransferTotals, outcome: RunOutcome) -> Notification {
        let title = match outcome {
            RunOutcome::Completed { failed: 0 } => "Transfers finished".to_string(),
            RunOutcome::Completed { failed } => format!("{} failed", plural_files(failed)),
            RunOutcome::Incomplete => "Transfers interrupted".to_string(),
            RunOutcome::Cancelled => "Transfers cancelled".to_string(),
            RunOutcome::InsufficientSpace => "Not enough storage space".to_string(),
        };
        let body = format!(
            "{} transferred, {} already present",
            plural_files(totals.completed.saturating_sub(totals.already_transferred)),
            totals.already_transferred
        );
        Notification {
            title,
            body,
            progress: None,
            ongoing: false,
        }
    }

    fn build_over_quota(&self, is_paywall: bool) -> Notification {
        let body = if is_paywall {
            "Your account is locked until storage is freed"
        } else {
            "Free up space to keep transferring"
        };
        Notification {
            title: "Storage is full".to_string(),
            body: body.to_string(),
            progress: None,
            ongoing: false,
        }
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationPoster;

impl NotificationPoster for LogNotificationPoster {
    fn post(&self, id: NotificationId, notification: Notification) {
        info!(
            notification_id = id.0,
            title = %notification.title,
            body = %notification.body,
            ongoing = notification.ongoing,
            "notification"
        );
    }
}

/// Connectivity oracle for hosts without a network monitor.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConnected;

impl ConnectivityOracle for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }
}

/// Quota oracle for hosts without an account quota.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverOverQuota;

#[async_trait]
impl QuotaOracle for NeverOverQuota {
    async fn is_storage_over_quota(&self) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Rating heuristic that asks once a fast, sizeable download is seen.
#[derive(Debug)]
pub struct SpeedRatingPolicy {
    min_speed_bps: u64,
    min_total_bytes: u64,
    shown: AtomicBool,
}

impl SpeedRatingPolicy {
    /// Prompt when speed and payload both reach the given floors.
    #[must_use]
    pub const fn new(min_speed_bps: u64, min_total_bytes: u64) -> Self {
        Self {
            min_speed_bps,
            min_total_bytes,
            shown: AtomicBool::new(false),
        }
    }
}

impl RatingPolicy for SpeedRatingPolicy {
    fn should_prompt(&self, speed_bps: u64, total_bytes: u64) -> bool {
        !self.shown.load(Ordering::SeqCst)
            && speed_bps >= self.min_speed_bps
            && total_bytes >= self.min_total_bytes
    }

    fn show_prompt(&self) {
        if !self.shown.swap(true, Ordering::SeqCst) {
            info!("enjoying fast transfers? consider rating ferry");
        }
    }
}

fn plural_files(count: u32) -> String {
    if count == 1 {
        "1 file".to_string()
    } else {
        format!("{count} files")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_events::TransferClass;

    #[test]
    fn progress_notifications_carry_byte_progress() {
        let mut totals = ActiveTransferTotals::new(TransferClass::GeneralDownload);
        totals.total_transfers = 3;
        totals.started = 3;
        totals.completed = 1;
        totals.total_bytes = 3 * 1024 * 1024;
        totals.transferred_bytes = 1024 * 1024;

        let notification = TextNotificationBuilder.build(&totals, false);
        assert_eq!(notification.title, "Downloading 3 files");
        assert_eq!(notification.body, "1 of 3 (1 MB of 3 MB)");
        assert_eq!(
            notification.progress,
            Some(NotificationProgress {
                current: 1024 * 1024,
                max: 3 * 1024 * 1024,
            })
        );
        assert!(notification.ongoing);
        assert!(TextNotificationBuilder.build(&totals, true).title.starts_with("Uploading"));
    }

    #[test]
    fn finished_notifications_report_failures() {
        let mut totals = ActiveTransferTotals::new(TransferClass::GeneralDownload);
        totals.total_transfers = 2;
        totals.completed = 1;
        totals.failed = 1;
        let notification =
            TextNotificationBuilder.build_finished(&totals, RunOutcome::Completed { failed: 1 });
        assert_eq!(notification.title, "1 file failed");
        assert!(!notification.ongoing);
        assert!(notification.progress.is_none());
    }

    #[test]
    fn finished_notifications_follow_the_outcome() {
        let mut totals = ActiveTransferTotals::new(TransferClass::GeneralDownload);
        totals.total_transfers = 2;
        totals.completed = 1;
        let title = |outcome| TextNotificationBuilder.build_finished(&totals, outcome).title;
        assert_eq!(title(RunOutcome::Completed { failed: 0 }), "Transfers finished");
        assert_eq!(title(RunOutcome::Cancelled), "Transfers cancelled");
        assert_eq!(title(RunOutcome::InsufficientSpace), "Not enough storage space");
        assert_eq!(title(RunOutcome::Incomplete), "Transfers interrupted");
    }

    #[test]
    fn rating_prompts_only_once() {
        let policy = SpeedRatingPolicy::new(100, 1_000);
        assert!(!policy.should_prompt(99, 5_000));
        assert!(!policy.should_prompt(500, 999));
        assert!(policy.should_prompt(500, 5_000));
        policy.show_prompt();
        assert!(!policy.should_prompt(500, 5_000));
    }
}
