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

//! HTTP surface for the Nebula download service.
//!
//! Requests pass through admission control and shared-secret authentication
//! before reaching handlers that route into the job workflow, the state
//! store, and the settings service. Live progress is exposed as a
//! server-sent event stream fed by the progress hub.

pub mod models;

mod error;
mod http;
mod state;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
pub use state::ApiDependencies;
