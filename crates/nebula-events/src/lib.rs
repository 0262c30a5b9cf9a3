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

//! Live progress delivery for the Nebula platform.
//!
//! Jobs report through a [`ProgressSink`]; the standard sink,
//! [`ProgressReporter`], throttles per job and hands JSON frames to the
//! [`ProgressHub`], which fans them out to every streaming subscriber without
//! ever blocking on a slow one. Progress is a best-effort live view: durable
//! job state lives in the runtime store.

pub mod error;
pub mod hub;
pub mod payloads;
pub mod reporter;

pub use error::HubError;
pub use hub::{Frame, ProgressHub, SubscriberId, Subscription};
pub use payloads::{
    DEFAULT_PUBLISH_CAPACITY, DEFAULT_SUBSCRIBER_CAPACITY, ProgressEnvelope, ProgressPayload,
};
pub use reporter::{ProgressReporter, ProgressSink, estimate_eta};
