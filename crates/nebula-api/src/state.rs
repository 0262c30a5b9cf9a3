//! API application state and the dependencies it is built from.

use std::sync::Arc;

use nebula_config::{AdmissionConfig, ApiSecret, SettingsService};
use nebula_events::{ProgressHub, ProgressReporter, ProgressSink};
use nebula_runtime::StateStore;
use nebula_telemetry::Metrics;
use nebula_transfer_core::{JobWorkflow, TransferEngine, TransferRateLimit};
use tracing::warn;

use crate::http::admission::Admission;

/// Collaborators the HTTP surface routes requests into.
pub struct ApiDependencies {
    /// Job control.
    pub workflow: Arc<dyn JobWorkflow>,
    /// Transfer engine, used directly for analysis and file priorities.
    pub engine: Arc<dyn TransferEngine>,
    /// Durable job, history, and favorite state.
    pub store: StateStore,
    /// User settings.
    pub settings: Arc<SettingsService>,
    /// Live progress fan-out.
    pub hub: ProgressHub,
    /// Metrics registry.
    pub telemetry: Metrics,
    /// Shared secret clients must present.
    pub secret: ApiSecret,
    /// Skip shared-secret authentication.
    pub dev_mode: bool,
    /// Admission-control rate tables.
    pub admission: AdmissionConfig,
}

pub(crate) struct ApiState {
    pub(crate) workflow: Arc<dyn JobWorkflow>,
    pub(crate) engine: Arc<dyn TransferEngine>,
    pub(crate) store: StateStore,
    pub(crate) settings: Arc<SettingsService>,
    pub(crate) hub: ProgressHub,
    pub(crate) telemetry: Metrics,
    pub(crate) secret: ApiSecret,
    pub(crate) dev_mode: bool,
    pub(crate) admission: Arc<Admission>,
}

impl ApiState {
    pub(crate) fn new(deps: ApiDependencies) -> Self {
        Self {
            workflow: deps.workflow,
            engine: deps.engine,
            store: deps.store,
            settings: deps.settings,
            hub: deps.hub,
            telemetry: deps.telemetry,
            secret: deps.secret,
            dev_mode: deps.dev_mode,
            admission: Arc::new(Admission::new(deps.admission)),
        }
    }

    /// Fresh reporter for a newly started job.
    pub(crate) fn reporter(&self) -> Arc<dyn ProgressSink> {
        Arc::new(ProgressReporter::new(self.hub.clone()))
    }

    /// Push the current bandwidth caps to the engine; failures are logged.
    pub(crate) async fn push_limits(&self) {
        let settings = self.settings.snapshot().await;
        let limits = TransferRateLimit {
            download_bps: settings.download_limit_bps(),
            upload_bps: settings.upload_limit_bps(),
        };
        if let Err(err) = self.engine.update_limits(limits).await {
            warn!(error = %err, "failed to apply bandwidth limits to engine");
        }
    }
}
