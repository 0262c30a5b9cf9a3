//! Router construction and server host for the API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, Method, Request, header::AUTHORIZATION, header::CONTENT_TYPE},
    middleware,
    routing::{delete, get, post, put},
};
use nebula_telemetry::{REQUEST_ID_HEADER, build_sha};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::Span;

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::admission::{Admission, enforce_admission};
use crate::http::auth::require_api_key;
use crate::http::constants::{HEADER_API_KEY, MAX_BODY_BYTES};
use crate::http::downloads::{
    cancel_download, delete_download_files, download_status, list_downloads, pause_download,
    resume_download,
};
use crate::http::health::{health, metrics};
use crate::http::library::{
    add_favorite, check_favorite, list_favorites, list_history, remove_favorite, search_history,
};
use crate::http::magnet::{analyze_magnet, analyze_metainfo, start_download};
use crate::http::priority::{get_file_priority, set_file_priority};
use crate::http::settings::{
    get_settings, reset_settings, set_default_dir, set_download_speed, set_upload_speed,
};
use crate::http::sse::stream_progress;
use crate::http::telemetry::record_http_metrics;
use crate::state::{ApiDependencies, ApiState};

/// Axum router wrapper that hosts the Nebula API services.
pub struct ApiServer {
    router: Router,
    sweeper: JoinHandle<()>,
}

impl ApiServer {
    /// Construct the API from its collaborators.
    ///
    /// Spawns the admission sweeper, so it must run inside a Tokio runtime.
    #[must_use]
    pub fn new(deps: ApiDependencies) -> Self {
        let state = Arc::new(ApiState::new(deps));
        let sweeper = Admission::spawn_sweeper(&state.admission);
        let router = Self::build_router(&state);
        Self { router, sweeper }
    }

    fn build_router(state: &Arc<ApiState>) -> Router {
        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                CONTENT_TYPE,
                AUTHORIZATION,
                HeaderName::from_static(HEADER_API_KEY),
            ]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(nebula_telemetry::set_request_id_layer())
            .layer(nebula_telemetry::propagate_request_id_layer())
            .layer(trace_layer)
            .layer(middleware::from_fn_with_state(
                Arc::clone(state),
                record_http_metrics,
            ))
            .layer(cors_layer)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(middleware::from_fn_with_state(
                Arc::clone(state),
                enforce_admission,
            ))
            .layer(middleware::from_fn_with_state(
                Arc::clone(state),
                require_api_key,
            ));

        Self::routes().layer(layered).with_state(Arc::clone(state))
    }

    fn routes() -> Router<Arc<ApiState>> {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route("/api/progress", get(stream_progress))
            .route("/api/magnet/analyze", post(analyze_magnet))
            .route("/api/magnet/download", post(start_download))
            .route("/api/torrent/analyze-file", post(analyze_metainfo))
            .route("/api/download", get(list_downloads))
            .route("/api/download/{id}", delete(cancel_download))
            .route("/api/download/{id}/status", get(download_status))
            .route("/api/download/{id}/pause", post(pause_download))
            .route("/api/download/{id}/resume", post(resume_download))
            .route("/api/download/{id}/delete-files", delete(delete_download_files))
            .route(
                "/api/file/priority",
                get(get_file_priority).put(set_file_priority),
            )
            .route("/api/history", get(list_history))
            .route("/api/history/search", get(search_history))
            .route(
                "/api/favorites",
                get(list_favorites)
                    .post(add_favorite)
                    .delete(remove_favorite),
            )
            .route("/api/favorites/check", get(check_favorite))
            .route("/api/config", get(get_settings))
            .route("/api/config/download-speed", put(set_download_speed))
            .route("/api/config/upload-speed", put(set_upload_speed))
            .route("/api/config/default-dir", put(set_default_dir))
            .route("/api/config/reset", post(reset_settings))
    }

    /// Serve the API on `addr` until `shutdown` resolves, then drain in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server terminates unexpectedly.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self { router, sweeper } = self;
        let result = Self::run(router, addr, shutdown).await;
        sweeper.abort();
        result
    }

    async fn run<F>(router: Router, addr: SocketAddr, shutdown: F) -> ApiServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| ApiServerError::LocalAddr { addr, source })?;
        tracing::info!(addr = %local, "starting API");
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|source| ApiServerError::Serve {
            addr: local,
            source,
        })
    }

    #[cfg(test)]
    pub(crate) fn router(&self) -> Router {
        self.router.clone()
    }
}
