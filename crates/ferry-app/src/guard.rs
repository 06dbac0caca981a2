//! Large-operation confirmation gate.

use std::sync::Arc;

use ferry_transfer_core::{
    PreferenceStore, SizeCalculator, TransferError, TransferResult, TransferTrigger,
};
use tracing::debug;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Decides whether a trigger needs explicit confirmation before it starts.
pub struct LargeOperationGuard {
    threshold_bytes: u64,
    sizes: Arc<dyn SizeCalculator>,
    preferences: Arc<dyn PreferenceStore>,
}

impl LargeOperationGuard {
    /// Gate anything strictly larger than `threshold_bytes`.
    #[must_use]
    pub fn new(
        threshold_bytes: u64,
        sizes: Arc<dyn SizeCalculator>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            threshold_bytes,
            sizes,
            preferences,
        }
    }

    /// Size label of the payload when confirmation is required, `None` otherwise.
    ///
    /// Previews and uploads are never gated; neither is anything once the
    /// user opted out of large-download confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Engine`] when the preference store or the
    /// size calculator fails.
    pub async fn should_confirm(&self, trigger: &TransferTrigger) -> TransferResult<Option<String>> {
        if !matches!(
            trigger,
            TransferTrigger::DownloadNodes { .. } | TransferTrigger::DownloadForOffline { .. }
        ) {
            return Ok(None);
        }
        let ask = self
            .preferences
            .ask_before_large_downloads()
            .await
            .map_err(|err| TransferError::engine("preferences.ask_before_large_downloads", err))?;
        if !ask {
            return Ok(None);
        }
        let size = self
            .sizes
            .total_size(trigger.nodes())
            .await
            .map_err(|err| TransferError::engine("size_calculator.total_size", err))?;
        debug!(size, threshold = self.threshold_bytes, "large operation check");
        Ok((size > self.threshold_bytes).then(|| format_size(size)))
    }

    /// Persist the "don't ask again" choice.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Engine`] when the preference cannot be written.
    pub async fn remember_opt_out(&self) -> TransferResult<()> {
        self.preferences
            .set_ask_before_large_downloads(false)
            .await
            .map_err(|err| TransferError::engine("preferences.set_ask_before_large_downloads", err))
    }
}

/// Human-readable size with binary units: "500 MB", "1.5 GB".
#[must_use]
pub fn format_size(bytes: u64) -> String {
    let mut unit = 0;
    let mut whole = bytes;
    while whole >= 1024 && unit + 1 < UNITS.len() {
        whole /= 1024;
        unit += 1;
    }
    let divisor = 1024_u64.pow(u32::try_from(unit).unwrap_or_default());
    let tenths = (u128::from(bytes) * 10 + u128::from(divisor) / 2) / u128::from(divisor);
    if tenths % 10 == 0 {
        format!("{} {}", tenths / 10, UNITS[unit])
    } else {
        format!("{}.{} {}", tenths / 10, tenths % 10, UNITS[unit])
    }
}
