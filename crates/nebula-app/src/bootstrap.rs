use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use nebula_api::{ApiDependencies, ApiServer};
use nebula_config::{AdmissionConfig, ApiSecret, ServerSettings, SettingsService};
use nebula_events::{ProgressHub, ProgressReporter};
use nebula_runtime::{JsonFileStore, StateStore};
use nebula_telemetry::{LogFormat, LoggingConfig, Metrics, init_logging};
use nebula_transfer_core::{
    JobRequest, JobStatus, JobWorkflow, SimulatedEngine, TransferEngine, TransferRateLimit,
};
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::supervisor::JobSupervisor;

/// Upper bound on waiting for supervised jobs to finish during shutdown.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Long-lived collaborators opened once at startup.
struct Services {
    telemetry: Metrics,
    store: StateStore,
    settings: Arc<SettingsService>,
    secret: ApiSecret,
    hub: ProgressHub,
    engine: Arc<SimulatedEngine>,
    supervisor: Arc<JobSupervisor>,
}

impl Services {
    async fn open(server: &ServerSettings) -> AppResult<Self> {
        let telemetry =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let backend = JsonFileStore::open(server.data_dir.clone())
            .await
            .map_err(|err| AppError::store("json_file_store.open", err))?;
        let store = StateStore::open(Arc::new(backend), telemetry.clone())
            .await
            .map_err(|err| AppError::store("state_store.open", err))?;
        let settings = SettingsService::open(&server.data_dir)
            .await
            .map_err(|err| AppError::config("settings_service.open", err))?;
        let secret = ApiSecret::load_or_create(&server.data_dir)
            .await
            .map_err(|err| AppError::config("api_secret.load_or_create", err))?;
        let engine = Arc::new(SimulatedEngine::new());
        let supervisor = Arc::new(JobSupervisor::new(
            engine.clone(),
            store.clone(),
            telemetry.clone(),
        ));
        Ok(Self {
            telemetry,
            store,
            settings: Arc::new(settings),
            secret,
            hub: ProgressHub::new(),
            engine,
            supervisor,
        })
    }

    async fn apply_limits(&self) {
        let settings = self.settings.snapshot().await;
        let limits = TransferRateLimit {
            download_bps: settings.download_limit_bps(),
            upload_bps: settings.upload_limit_bps(),
        };
        if let Err(err) = self.engine.update_limits(limits).await {
            warn!(error = %err, "failed to apply persisted bandwidth limits");
        }
    }
}

/// Entry point for the Nebula boot sequence.
///
/// # Errors
///
/// Returns an error if the environment is invalid or startup fails.
pub async fn run_app() -> AppResult<()> {
    let server =
        ServerSettings::from_env().map_err(|err| AppError::config("server_settings.env", err))?;
    Box::pin(run_app_with(server, shutdown_signal())).await
}

/// Boot sequence driven by explicit settings and a shutdown trigger.
///
/// Serves until `shutdown` resolves, then stops the supervisor, waits up to
/// [`SHUTDOWN_DRAIN`] for jobs to settle, and flushes the store.
///
/// # Errors
///
/// Returns an error if a collaborator cannot be opened or the listener fails.
pub async fn run_app_with<F>(server: ServerSettings, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    install_logging(&server);
    info!(data_dir = %server.data_dir.display(), "Nebula bootstrap starting");

    let services = Services::open(&server).await?;
    services.apply_limits().await;
    if server.dev_mode {
        warn!("development mode enabled; API authentication is disabled");
    }

    let restarted = recover_downloads(&services.supervisor, &services.store, &services.hub).await;
    if restarted > 0 {
        info!(count = restarted, "restarted interrupted downloads");
    }

    let workflow: Arc<dyn JobWorkflow> = services.supervisor.clone();
    let engine: Arc<dyn TransferEngine> = services.engine.clone();
    let api = ApiServer::new(ApiDependencies {
        workflow,
        engine,
        store: services.store.clone(),
        settings: Arc::clone(&services.settings),
        hub: services.hub.clone(),
        telemetry: services.telemetry.clone(),
        secret: services.secret.clone(),
        dev_mode: server.dev_mode,
        admission: AdmissionConfig::default(),
    });

    let serve_result = api.serve(server.bind_addr, shutdown).await;

    info!("stopping supervised jobs");
    services.supervisor.shutdown();
    if !services.supervisor.drain(SHUTDOWN_DRAIN).await {
        warn!(bound = ?SHUTDOWN_DRAIN, "jobs still running after shutdown bound");
    }
    if let Err(err) = services.store.close().await {
        error!(error = %err, "final state flush failed");
    }

    serve_result.map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("Nebula shutdown complete");
    Ok(())
}

fn install_logging(server: &ServerSettings) {
    let parsed = server.log_format.as_deref().map(str::parse::<LogFormat>);
    let format = match &parsed {
        Some(Ok(format)) => *format,
        Some(Err(_)) | None => LogFormat::infer(),
    };
    let mut logging = LoggingConfig {
        format,
        ..LoggingConfig::default()
    };
    if let Some(level) = server.log_level.as_deref() {
        logging.level = level;
    }
    // A subscriber installed by an embedding process or an earlier boot stays in place.
    if let Err(err) = init_logging(&logging) {
        warn!(error = %err, "tracing subscriber already installed");
    }
    if let Some(Err(reason)) = parsed {
        warn!(%reason, "ignoring log format override");
    }
}

/// Restart every persisted job that was mid-transfer, returning how many resumed.
///
/// Pending records count too: nothing is live at boot, so a pending record
/// belongs to a job stopped before its metadata resolved.
pub(crate) async fn recover_downloads(
    supervisor: &JobSupervisor,
    store: &StateStore,
    hub: &ProgressHub,
) -> usize {
    let mut interrupted = store.downloads_with_status(JobStatus::Downloading).await;
    interrupted.extend(store.downloads_with_status(JobStatus::Pending).await);

    let mut restarted = 0;
    for record in interrupted {
        let request = JobRequest::from_record(&record);
        let sink = Arc::new(ProgressReporter::new(hub.clone()));
        match supervisor
            .start_with_id(record.id.clone(), request, sink)
            .await
        {
            Ok(()) => restarted += 1,
            Err(err) => {
                warn!(job_id = %record.id, error = %err, "could not restart download");
                let message = err.terminal_message();
                store
                    .modify_download(&record.id, move |stored| stored.mark_failed(message))
                    .await;
            }
        }
    }
    restarted
}

/// Resolve on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}
