//! Telemetry failures.

use prometheus::Error as PrometheusError;
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while installing logging or maintaining transfer metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured log level is not a valid filter directive.
    #[error("invalid log filter")]
    InvalidFilter {
        /// Directive as configured.
        directive: String,
        /// Parser failure.
        #[source]
        source: ParseError,
    },
    /// A global tracing subscriber is already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying tracing error.
        #[source]
        source: TryInitError,
    },
    /// A metric family could not be created or added to the registry.
    #[error("metric family unavailable")]
    MetricFamily {
        /// Family name.
        name: &'static str,
        /// Step that failed (`metrics.build` or `metrics.register`).
        operation: &'static str,
        /// Prometheus failure.
        #[source]
        source: PrometheusError,
    },
    /// The registry could not be encoded as exposition text.
    #[error("failed to encode metrics")]
    RenderEncode {
        /// Prometheus failure.
        #[source]
        source: PrometheusError,
    },
    /// Encoded exposition text was not UTF-8.
    #[error("metrics output was not valid utf-8")]
    RenderUtf8 {
        /// Conversion failure.
        #[source]
        source: std::string::FromUtf8Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_stay_constant_and_keep_sources() {
        let utf8 = String::from_utf8(vec![0, 159]).expect_err("invalid utf-8");
        let family = TelemetryError::MetricFamily {
            name: "transfers_total",
            operation: "metrics.register",
            source: PrometheusError::AlreadyReg,
        };
        assert_eq!(family.to_string(), "metric family unavailable");
        assert!(family.source().is_some());

        let render = TelemetryError::RenderUtf8 { source: utf8 };
        assert_eq!(render.to_string(), "metrics output was not valid utf-8");
        assert!(render.source().is_some());
    }
}
