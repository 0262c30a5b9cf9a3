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

//! Engine-agnostic transfer interfaces and job model.
//!
//! The [`TransferEngine`] trait is the only seam to the component that moves
//! bytes; everything above it (supervision, persistence, HTTP) speaks in
//! [`JobRecord`]s, [`JobError`]s and the [`JobWorkflow`] control surface.

pub mod error;
pub mod model;
pub mod service;
pub mod simulated;

pub use error::{CANCELED_MESSAGE, JobError, JobResult, TIMEOUT_MESSAGE};
pub use model::{
    FilePriority, FileSelection, JobRecord, JobRequest, JobSpec, JobStatus, PENDING_DISPLAY_NAME,
    PeerStats, SourceDescriptor, TransferFile, TransferMetadata, TransferRateLimit,
};
pub use service::{JobWorkflow, TransferEngine};
pub use simulated::{DEFAULT_BYTES_PER_SECOND, SimulatedEngine};
