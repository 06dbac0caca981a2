//! Error types for transfer orchestration.

use std::error::Error;

use thiserror::Error;

use crate::model::MessageKind;

/// Primary error type for orchestration passes.
#[derive(Debug, Error)]
pub enum TransferError {
    /// No network connection; nothing was started.
    #[error("not connected")]
    NotConnected,
    /// The pass was aborted before or while resolving.
    #[error("transfer cancelled")]
    TransferCancelled,
    /// The destination medium lacks capacity.
    #[error("insufficient space at destination")]
    InsufficientSpace,
    /// No destination could be resolved.
    #[error("destination unresolved")]
    DestinationUnresolved {
        /// Why resolution failed.
        reason: &'static str,
        /// Offending location, when one was supplied.
        value: Option<String>,
    },
    /// Some transfers of the run failed.
    #[error("some transfers failed")]
    PartialFailure {
        /// Transfers that failed.
        failed: u32,
        /// Transfers known to the run.
        total: u32,
    },
    /// Account storage is over quota.
    #[error("storage over quota")]
    StorageOverQuota,
    /// A collaborator call failed.
    #[error("collaborator operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl TransferError {
    /// Wrap a collaborator failure.
    #[must_use]
    pub fn engine(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Engine {
            operation,
            source: source.into(),
        }
    }

    /// Message shown when the error ends a pass; `None` for outcomes reported
    /// through `FinishProcessing`.
    #[must_use]
    pub const fn message_kind(&self) -> Option<MessageKind> {
        match self {
            Self::NotConnected => Some(MessageKind::NotConnected),
            Self::TransferCancelled | Self::DestinationUnresolved { .. } | Self::Engine { .. } => {
                Some(MessageKind::TransferCancelled)
            }
            Self::InsufficientSpace => Some(MessageKind::InsufficientSpace),
            Self::StorageOverQuota => Some(MessageKind::StorageOverQuota),
            Self::PartialFailure { .. } => None,
        }
    }
}

/// Convenience alias for orchestration results.
pub type TransferResult<T> = Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_dispatch_errors_map_to_messages() {
        assert_eq!(
            TransferError::NotConnected.message_kind(),
            Some(MessageKind::NotConnected)
        );
        assert_eq!(
            TransferError::DestinationUnresolved {
                reason: "picker cancelled",
                value: None,
            }
            .message_kind(),
            Some(MessageKind::TransferCancelled)
        );
        assert_eq!(
            TransferError::StorageOverQuota.message_kind(),
            Some(MessageKind::StorageOverQuota)
        );
        assert_eq!(
            TransferError::PartialFailure {
                failed: 1,
                total: 3
            }
            .message_kind(),
            None
        );
    }

    #[test]
    fn engine_errors_keep_their_source() {
        let error = TransferError::engine("size_calculator.total_size", anyhow::anyhow!("boom"));
        let source = error.source().expect("source present");
        assert_eq!(source.to_string(), "boom");
        assert_eq!(error.message_kind(), Some(MessageKind::TransferCancelled));
    }
}
