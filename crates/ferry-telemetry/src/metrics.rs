//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Labels are derived from typed classes and outcomes, never free text.

use std::sync::Arc;

use ferry_events::{RunOutcome, TransferClass};
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared by supervisors.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    runs_started_total: IntCounterVec,
    runs_joined_total: IntCounterVec,
    runs_finished_total: IntCounterVec,
    transfers_total: IntCounterVec,
    bytes_transferred: IntGaugeVec,
    events_emitted_total: IntCounterVec,
}

/// Per-class snapshot of the most relevant counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Runs started.
    pub runs_started_total: u64,
    /// Requests that joined an active run.
    pub runs_joined_total: u64,
    /// Runs finished, whatever the outcome.
    pub runs_finished_total: u64,
    /// Transfers that completed.
    pub transfers_completed_total: u64,
    /// Transfers that failed.
    pub transfers_failed_total: u64,
    /// Transfers skipped because the destination held the data.
    pub transfers_already_present_total: u64,
    /// Bytes moved by the current or last run.
    pub bytes_transferred: i64,
}

/// Final status of a transfer, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Finished without error.
    Completed,
    /// Finished with an error.
    Failed,
    /// Destination already held the data.
    AlreadyPresent,
}

impl TransferStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::AlreadyPresent => "already_present",
        }
    }
}

const OUTCOME_LABELS: [&str; 5] = [
    "completed",
    "partial_failure",
    "incomplete",
    "cancelled",
    "insufficient_space",
];

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let runs_started_total = counter_vec(
            &registry,
            "transfer_runs_started_total",
            "Supervisor runs started by class",
            &["class"],
        )?;
        let runs_joined_total = counter_vec(
            &registry,
            "transfer_runs_joined_total",
            "Requests that joined an active run by class",
            &["class"],
        )?;
        let runs_finished_total = counter_vec(
            &registry,
            "transfer_runs_finished_total",
            "Supervisor runs finished by class and outcome",
            &["class", "outcome"],
        )?;
        let transfers_total = counter_vec(
            &registry,
            "transfers_total",
            "Individual transfers finished by class and status",
            &["class", "status"],
        )?;
        let events_emitted_total = counter_vec(
            &registry,
            "events_emitted_total",
            "Bus events emitted by type",
            &["type"],
        )?;
        let bytes_transferred = register(
            &registry,
            "transfer_bytes_transferred",
            IntGaugeVec::new(
                Opts::new(
                    "transfer_bytes_transferred",
                    "Bytes moved by the current run of a class",
                ),
                &["class"],
            ),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                runs_started_total,
                runs_joined_total,
                runs_finished_total,
                transfers_total,
                bytes_transferred,
                events_emitted_total,
            }),
        })
    }

    /// Count a started run.
    pub fn inc_run_started(&self, class: TransferClass) {
        self.inner
            .runs_started_total
            .with_label_values(&[class.as_str()])
            .inc();
    }

    /// Count a request that joined an active run.
    pub fn inc_run_joined(&self, class: TransferClass) {
        self.inner
            .runs_joined_total
            .with_label_values(&[class.as_str()])
            .inc();
    }

    /// Count a finished run.
    pub fn inc_run_finished(&self, class: TransferClass, outcome: RunOutcome) {
        self.inner
            .runs_finished_total
            .with_label_values(&[class.as_str(), outcome.as_str()])
            .inc();
    }

    /// Add finished transfers of one status.
    pub fn add_transfers(&self, class: TransferClass, status: TransferStatus, count: u32) {
        if count == 0 {
            return;
        }
        self.inner
            .transfers_total
            .with_label_values(&[class.as_str(), status.as_str()])
            .inc_by(u64::from(count));
    }

    /// Record bytes moved by the current run of a class.
    pub fn set_bytes_transferred(&self, class: TransferClass, bytes: u64) {
        self.inner
            .bytes_transferred
            .with_label_values(&[class.as_str()])
            .set(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::RenderEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::RenderUtf8 { source })
    }

    /// Take a point-in-time snapshot of the counters of one class.
    #[must_use]
    pub fn snapshot(&self, class: TransferClass) -> MetricsSnapshot {
        let label = class.as_str();
        let transfers = |status: TransferStatus| {
            self.inner
                .transfers_total
                .with_label_values(&[label, status.as_str()])
                .get()
        };
        MetricsSnapshot {
            runs_started_total: self.inner.runs_started_total.with_label_values(&[label]).get(),
            runs_joined_total: self.inner.runs_joined_total.with_label_values(&[label]).get(),
            runs_finished_total: OUTCOME_LABELS
                .iter()
                .map(|outcome| {
                    self.inner
                        .runs_finished_total
                        .with_label_values(&[label, *outcome])
                        .get()
                })
                .sum(),
            transfers_completed_total: transfers(TransferStatus::Completed),
            transfers_failed_total: transfers(TransferStatus::Failed),
            transfers_already_present_total: transfers(TransferStatus::AlreadyPresent),
            bytes_transferred: self.inner.bytes_transferred.with_label_values(&[label]).get(),
        }
    }
}

fn counter_vec(
    registry: &Registry,
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec> {
    register(registry, name, IntCounterVec::new(Opts::new(name, help), labels))
}

fn register<C>(
    registry: &Registry,
    name: &'static str,
    built: prometheus::Result<C>,
) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    let collector = built.map_err(|source| TelemetryError::MetricFamily {
        name,
        operation: "metrics.build",
        source,
    })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricFamily {
            name,
            operation: "metrics.register",
            source,
        })?;
    Ok(collector)
}
