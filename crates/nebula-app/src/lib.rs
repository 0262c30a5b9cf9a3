#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Nebula application wiring.
//!
//! Layout: `supervisor.rs` (job lifecycle), `pause.rs` (per-job pause gate),
//! `bootstrap.rs` (service wiring, restart recovery, graceful shutdown).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application error types.
pub mod error;
/// Cooperative pause gate.
pub mod pause;
/// Supervised job execution.
pub mod supervisor;

pub use bootstrap::{SHUTDOWN_DRAIN, run_app, run_app_with};
pub use error::{AppError, AppResult};
pub use pause::{PAUSE_POLL_INTERVAL, PauseGate, PauseInterrupted};
pub use supervisor::{JobSupervisor, SupervisorConfig};
