//! RFC9457-style API error wrapper.

use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nebula_config::ConfigError;
use nebula_runtime::StoreError;
use nebula_transfer_core::JobError;
use tracing::{error, warn};

use crate::http::constants::{
    PROBLEM_BAD_REQUEST, PROBLEM_CONFIG_INVALID, PROBLEM_CONFLICT, PROBLEM_ENGINE,
    PROBLEM_INTERNAL, PROBLEM_NOT_FOUND, PROBLEM_RATE_LIMITED, PROBLEM_SERVICE_UNAVAILABLE,
    PROBLEM_TIMEOUT, PROBLEM_UNAUTHORIZED,
};
use crate::http::rate_limit::insert_rate_limit_headers;
use crate::models::{ProblemDetails, ProblemInvalidParam};

/// Structured API error with optional RFC9457 fields.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) kind: &'static str,
    title: &'static str,
    pub(crate) detail: Option<String>,
    pub(crate) invalid_params: Option<Vec<ProblemInvalidParam>>,
    pub(crate) rate_limit: Option<ErrorRateLimitContext>,
}

#[derive(Debug)]
pub(crate) struct ErrorRateLimitContext {
    pub(crate) limit: u32,
    pub(crate) remaining: u32,
    pub(crate) retry_after: Option<Duration>,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, title: &'static str) -> Self {
        Self {
            status,
            kind,
            title,
            detail: None,
            invalid_params: None,
            rate_limit: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn with_invalid_params(mut self, params: Vec<ProblemInvalidParam>) -> Self {
        self.invalid_params = Some(params);
        self
    }

    pub(crate) const fn with_rate_limit_headers(
        mut self,
        limit: u32,
        remaining: u32,
        retry_after: Option<Duration>,
    ) -> Self {
        self.rate_limit = Some(ErrorRateLimitContext {
            limit,
            remaining,
            retry_after,
        });
        self
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PROBLEM_INTERNAL,
            "internal server error",
        )
        .with_detail(message)
    }

    pub(crate) fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            PROBLEM_UNAUTHORIZED,
            "authentication required",
        )
        .with_detail(detail)
    }

    pub(crate) fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, PROBLEM_BAD_REQUEST, "bad request").with_detail(detail)
    }

    pub(crate) fn not_found(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            PROBLEM_NOT_FOUND,
            "resource not found",
        )
        .with_detail(detail)
    }

    pub(crate) fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, PROBLEM_CONFLICT, "conflict").with_detail(detail)
    }

    pub(crate) fn config_invalid(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            PROBLEM_CONFIG_INVALID,
            "configuration invalid",
        )
        .with_detail(detail)
    }

    pub(crate) fn timeout(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            PROBLEM_TIMEOUT,
            "upstream timed out",
        )
        .with_detail(detail)
    }

    pub(crate) fn engine(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            PROBLEM_ENGINE,
            "transfer engine failure",
        )
        .with_detail(detail)
    }

    pub(crate) fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            PROBLEM_SERVICE_UNAVAILABLE,
            "service unavailable",
        )
        .with_detail(detail)
    }

    pub(crate) fn too_many_requests(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            PROBLEM_RATE_LIMITED,
            "rate limit exceeded",
        )
        .with_detail(detail)
    }
}

pub(crate) fn pointer_for(field: &str) -> String {
    format!("/{}", field.replace('~', "~0").replace('/', "~1"))
}

fn invalid_param(field: &str, reason: &str, value: Option<&str>) -> ProblemInvalidParam {
    ProblemInvalidParam {
        pointer: pointer_for(field),
        message: value.map_or_else(|| reason.to_string(), |value| format!("{reason}: {value}")),
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match &err {
            JobError::InvalidArgument {
                field,
                reason,
                value,
            } => Self::bad_request(err.terminal_message())
                .with_invalid_params(vec![invalid_param(field, reason, value.as_deref())]),
            JobError::NotFound { last_status, .. } => Self::not_found(
                last_status.map_or_else(
                    || "job is not running".to_string(),
                    |status| format!("job is not running (last known status: {status})"),
                ),
            ),
            JobError::Timeout { .. } => Self::timeout(err.terminal_message()),
            JobError::Canceled { .. } => Self::conflict(err.terminal_message()),
            JobError::Invariant { .. } => {
                error!(error = %err, detail = %err.terminal_message(), "job invariant violated");
                Self::internal(err.terminal_message())
            }
            JobError::Engine { operation, .. } => {
                warn!(error = %err, detail = %err.terminal_message(), "transfer engine call failed");
                Self::engine(format!("{operation} failed"))
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match &err {
            ConfigError::InvalidField {
                field,
                value,
                reason,
                ..
            } => {
                warn!(error = %err, field, reason, "rejected settings change");
                Self::config_invalid(format!("{field} is invalid: {reason}"))
                    .with_invalid_params(vec![invalid_param(field, reason, value.as_deref())])
            }
            ConfigError::Parse { .. } | ConfigError::Encode { .. } | ConfigError::Io { .. } => {
                error!(error = %err, "settings persistence failed");
                Self::internal("failed to persist settings")
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "state store operation failed");
        Self::service_unavailable("state store is currently unavailable")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail,
            invalid_params: self.invalid_params,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(rate) = self.rate_limit {
            insert_rate_limit_headers(
                response.headers_mut(),
                rate.limit,
                rate.remaining,
                rate.retry_after,
            );
        }
        response
    }
}
