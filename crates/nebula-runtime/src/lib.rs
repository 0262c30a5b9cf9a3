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

//! Persistence layer for job records, history, and favorites.
//!
//! [`StateStore`] is the single owner of durable job state. Job record writes
//! are debounced; history and favorite writes are eager. Storage itself sits
//! behind [`DocumentStore`] so tests can swap the filesystem for memory.

pub mod backend;
pub mod collections;
pub mod error;
pub mod store;

pub use backend::{Document, DocumentStore, JsonFileStore, MemoryDocumentStore};
pub use collections::{FavoriteEntry, HistoryAccess, HistoryEntry, NewFavorite, SEARCH_LIMIT};
pub use error::{StoreError, StoreResult};
pub use store::{DEFAULT_DEBOUNCE, StateStore};
