//! # Design
//!
//! - Keep error messages constant; store operational context in fields.
//! - Convert into per-transfer failures so one bad file never aborts a request.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::PathBuf;

use ferry_transfer_core::TransferFailure;

const CODE_SOURCE_MISSING: i32 = -2;
const CODE_UNSUPPORTED_SOURCE: i32 = -3;
const CODE_UNSAFE_NAME: i32 = -4;
const CODE_IO: i32 = -5;

/// Internal error details used by the local engine.
#[derive(Debug)]
pub enum LocalEngineError {
    /// The destination cannot be written by a local engine.
    UnsupportedDestination {
        /// Destination description.
        destination: String,
    },
    /// A source was not a local path.
    UnsupportedSource {
        /// Offending source.
        source: String,
    },
    /// A node name that is not a single path component.
    UnsafeName {
        /// Name as received.
        name: String,
    },
    /// A source file or folder does not exist.
    SourceMissing {
        /// Missing path.
        path: PathBuf,
    },
    /// A filesystem operation failed.
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
}

impl LocalEngineError {
    /// Whether the error means the destination medium is full.
    #[must_use]
    pub fn is_storage_full(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::StorageFull)
    }

    /// Per-transfer failure reported on the event stream.
    #[must_use]
    pub fn to_failure(&self) -> TransferFailure {
        let code = match self {
            Self::UnsupportedDestination { .. } | Self::UnsupportedSource { .. } => {
                CODE_UNSUPPORTED_SOURCE
            }
            Self::UnsafeName { .. } => CODE_UNSAFE_NAME,
            Self::SourceMissing { .. } => CODE_SOURCE_MISSING,
            Self::Io { source, .. } => source.raw_os_error().unwrap_or(CODE_IO),
        };
        let message = match self {
            Self::Io {
                operation, path, ..
            } => format!("{self} ({operation}: {})", path.display()),
            Self::SourceMissing { path } => format!("{self}: {}", path.display()),
            Self::UnsupportedSource { source } => format!("{self}: {source}"),
            Self::UnsafeName { name } => format!("{self}: {name:?}"),
            Self::UnsupportedDestination { destination } => format!("{self}: {destination}"),
        };
        TransferFailure::new(code, message)
    }
}

impl Display for LocalEngineError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedDestination { .. } => {
                formatter.write_str("destination not supported by the local engine")
            }
            Self::UnsupportedSource { .. } => {
                formatter.write_str("source not supported by the local engine")
            }
            Self::UnsafeName { .. } => formatter.write_str("node name escapes its folder"),
            Self::SourceMissing { .. } => formatter.write_str("source does not exist"),
            Self::Io { .. } => formatter.write_str("filesystem operation failed"),
        }
    }
}

impl Error for LocalEngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::UnsupportedDestination { .. }
            | Self::UnsupportedSource { .. }
            | Self::UnsafeName { .. }
            | Self::SourceMissing { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_full_is_detected() {
        let err = LocalEngineError::Io {
            operation: "copy.write",
            path: PathBuf::from("/tmp/out"),
            source: io::Error::from(io::ErrorKind::StorageFull),
        };
        assert!(err.is_storage_full());
        assert!(err.source().is_some());

        let missing = LocalEngineError::SourceMissing {
            path: PathBuf::from("/nope"),
        };
        assert!(!missing.is_storage_full());
        let failure = missing.to_failure();
        assert_eq!(failure.code, CODE_SOURCE_MISSING);
        assert_eq!(failure.message, "source does not exist: /nope");
    }
}
