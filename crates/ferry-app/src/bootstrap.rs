//! Service wiring for the binary and the integration tests.
//!
//! # Design
//! - Logging is installed separately from wiring so tests can build several
//!   apps in one process.
//! - Interrupted runs are recovered before the orchestrator is handed out.

use std::path::Path;
use std::sync::Arc;

use ferry_config::{FilePreferenceStore, LogFormatSetting, OrchestratorConfig, TelemetrySettings};
use ferry_engine_local::{LocalEngine, LocalEngineConfig, LocalSizeCalculator};
use ferry_events::EventBus;
use ferry_runtime::RunStateStore;
use ferry_telemetry::{LogFormat, LoggingConfig, Metrics};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::host::{
    AlwaysConnected, LogNotificationPoster, NeverOverQuota, SpeedRatingPolicy,
    TextNotificationBuilder,
};
use crate::orchestrator::{OrchestratorDeps, TransferOrchestrator};
use crate::supervisor::{RunTicket, SupervisorDeps, TransferSupervisor};

/// Folder under the source root that receives chat uploads.
pub const CHAT_UPLOAD_DIR: &str = "chats";
/// Download speed at which the rating prompt may appear.
pub const RATING_MIN_SPEED_BPS: u64 = 1024 * 1024;
/// Payload size at which the rating prompt may appear.
pub const RATING_MIN_TOTAL_BYTES: u64 = 10 * 1024 * 1024;

/// Fully wired application.
pub struct App {
    /// Effective configuration.
    pub config: OrchestratorConfig,
    /// Event bus shared by supervisor and orchestrator.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Persisted run records.
    pub store: RunStateStore,
    /// Local copy engine.
    pub engine: LocalEngine,
    /// Run supervisor.
    pub supervisor: TransferSupervisor,
    /// Orchestrator driving user triggers.
    pub orchestrator: TransferOrchestrator,
    /// Tickets of runs resumed from a previous process.
    pub recovered: Vec<RunTicket>,
}

/// Install the global tracing subscriber from telemetry settings.
///
/// # Errors
///
/// Returns [`AppError::Telemetry`] if a subscriber is already installed.
pub fn init_logging(settings: &TelemetrySettings) -> AppResult<()> {
    let format = match settings.log_format {
        LogFormatSetting::Auto => LogFormat::infer(),
        LogFormatSetting::Json => LogFormat::Json,
        LogFormatSetting::Pretty => LogFormat::Pretty,
    };
    ferry_telemetry::init_logging(&LoggingConfig {
        level: &settings.log_level,
        format,
        build_sha: ferry_telemetry::build_sha(),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))
}

/// Wire every service for `config`, reading remote nodes from `source_root`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the metrics registry cannot be built, the state
/// directory cannot be created, or the preference document is unreadable.
pub async fn build_app(config: OrchestratorConfig, source_root: &Path) -> AppResult<App> {
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
    let events = EventBus::with_capacity(config.transfers.event_replay_capacity);

    tokio::fs::create_dir_all(&config.storage.state_dir)
        .await
        .map_err(|err| {
            AppError::io(
                "state_dir.create",
                Some(config.storage.state_dir.clone()),
                err,
            )
        })?;
    let store = RunStateStore::new(&config.storage.state_dir);
    let preferences = Arc::new(
        FilePreferenceStore::open(&config.storage.preferences_path)
            .await
            .map_err(|err| AppError::config("preferences.open", err))?,
    );

    let engine = LocalEngine::new(LocalEngineConfig::new(
        source_root,
        source_root.join(CHAT_UPLOAD_DIR),
    ));
    let engine_handle = Arc::new(engine.clone());

    let supervisor = TransferSupervisor::new(SupervisorDeps {
        engine: engine_handle.clone(),
        notifications: Arc::new(TextNotificationBuilder),
        poster: Arc::new(LogNotificationPoster),
        store: store.clone(),
        events: events.clone(),
        metrics: metrics.clone(),
        sampling_interval: config.sampling_interval(),
    });
    let recovered = supervisor
        .recover(config.transfers.resume_interrupted_runs)
        .await;
    if !recovered.is_empty() {
        info!(runs = recovered.len(), "resumed interrupted requests");
    }

    let orchestrator = TransferOrchestrator::new(OrchestratorDeps {
        supervisor: supervisor.clone(),
        events: events.clone(),
        engine: engine_handle,
        preferences,
        sizes: Arc::new(LocalSizeCalculator::new(source_root)),
        connectivity: Arc::new(AlwaysConnected),
        quota: Arc::new(NeverOverQuota),
        rating: Arc::new(SpeedRatingPolicy::new(
            RATING_MIN_SPEED_BPS,
            RATING_MIN_TOTAL_BYTES,
        )),
        storage: config.storage.clone(),
        large_operation_threshold_bytes: config.transfers.large_operation_threshold_bytes,
        rating_sample_interval: config.rating_sample_interval(),
    });

    info!(
        source_root = %source_root.display(),
        state_dir = %config.storage.state_dir.display(),
        "ferry services ready"
    );
    Ok(App {
        config,
        events,
        metrics,
        store,
        engine,
        supervisor,
        orchestrator,
        recovered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_events::TransferClass;
    use ferry_runtime::{PersistedRequest, RunRecord};
    use ferry_test_support::fixtures::{download, file_node};
    use ferry_transfer_core::ResolvedDestination;
    use uuid::Uuid;

    #[tokio::test]
    async fn build_app_creates_state_and_discards_interrupted_runs() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let mut config = OrchestratorConfig::under_root(root.path());
        config.transfers.resume_interrupted_runs = false;

        let store = RunStateStore::new(&config.storage.state_dir);
        store
            .save(&RunRecord::new(
                Uuid::new_v4(),
                TransferClass::GeneralDownload,
                PersistedRequest {
                    trigger: download(vec![file_node(1, "a.txt")]),
                    destination: ResolvedDestination::path(root.path().join("out")),
                },
            ))
            .await?;

        let app = build_app(config, root.path()).await?;
        assert!(app.config.storage.state_dir.is_dir());
        assert!(app.recovered.is_empty());
        assert!(app.store.load_all().await.is_empty());
        assert_eq!(app.engine.config().upload_root, root.path().join(CHAT_UPLOAD_DIR));
        Ok(())
    }
}
