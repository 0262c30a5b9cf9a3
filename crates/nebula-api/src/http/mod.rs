//! HTTP surface modules (routers, handlers, middleware).

/// Three-layer request admission control.
pub(crate) mod admission;
/// Shared-secret authentication middleware.
pub(crate) mod auth;
/// Shared constants and header names for HTTP surfaces.
pub(crate) mod constants;
/// Job listing and control handlers.
pub(crate) mod downloads;
/// Problem response helpers and error types.
pub(crate) mod errors;
/// Destination validation and download cleanup.
pub(crate) mod filesystem;
/// Health and metrics endpoints.
pub(crate) mod health;
/// History and favorites handlers.
pub(crate) mod library;
/// Source analysis and job creation.
pub(crate) mod magnet;
/// Per-file priority handlers.
pub(crate) mod priority;
/// Token buckets and rate-limit headers.
pub(crate) mod rate_limit;
/// Router construction and server host.
pub(crate) mod router;
/// Settings handlers.
pub(crate) mod settings;
/// Server-sent progress stream.
pub(crate) mod sse;
/// Metrics middleware for HTTP requests.
pub(crate) mod telemetry;
