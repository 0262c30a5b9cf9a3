//! Durable document backends.
//!
//! # Design
//! - Each collection is one whole JSON document, replaced atomically.
//! - A document that does not exist yet loads as `None`, never as an error.
//! - [`JsonFileStore`] writes to a sibling temp file and renames it into place.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Named documents persisted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Document {
    /// Job records keyed by id.
    Downloads,
    /// History entries.
    History,
    /// Favorite entries.
    Favorites,
}

impl Document {
    /// File name used by [`JsonFileStore`].
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Downloads => "downloads.json",
            Self::History => "history.json",
            Self::Favorites => "favorites.json",
        }
    }
}

impl Display for Document {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.file_name())
    }
}

/// Atomic read/replace access to whole documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document; `None` when it has never been written.
    async fn load(&self, document: Document) -> StoreResult<Option<Value>>;

    /// Replace a document in full.
    async fn replace(&self, document: Document, value: &Value) -> StoreResult<()>;
}

/// Documents stored as pretty-printed JSON files in one directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Store documents under `root`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| StoreError::Io {
                operation: "create_dir",
                path: root.clone(),
                source,
            })?;
        Ok(Self { root })
    }

    /// Directory holding the documents.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, document: Document) -> PathBuf {
        self.root.join(document.file_name())
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn load(&self, document: Document) -> StoreResult<Option<Value>> {
        let path = self.path(document);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    operation: "read",
                    path,
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Serde { document, source })
    }

    async fn replace(&self, document: Document, value: &Value) -> StoreResult<()> {
        let path = self.path(document);
        let staging = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|source| StoreError::Serde { document, source })?;
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|source| StoreError::Io {
                operation: "write",
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| StoreError::Io {
                operation: "rename",
                path,
                source,
            })
    }
}

/// In-memory backend that counts writes; used by tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<Document, Value>>,
    writes: Mutex<HashMap<Document, usize>>,
    failing: AtomicBool,
}

impl MemoryDocumentStore {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-seeded with one document.
    #[must_use]
    pub fn with_document(document: Document, value: Value) -> Self {
        let store = Self::default();
        store.lock_documents().insert(document, value);
        store
    }

    fn lock_documents(&self) -> MutexGuard<'_, HashMap<Document, Value>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writes(&self) -> MutexGuard<'_, HashMap<Document, usize>> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of successful replacements of `document`.
    #[must_use]
    pub fn writes(&self, document: Document) -> usize {
        self.lock_writes().get(&document).copied().unwrap_or_default()
    }

    /// Current stored value of `document`.
    #[must_use]
    pub fn document(&self, document: Document) -> Option<Value> {
        self.lock_documents().get(&document).cloned()
    }

    /// Make every subsequent write fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load(&self, document: Document) -> StoreResult<Option<Value>> {
        Ok(self.document(document))
    }

    async fn replace(&self, document: Document, value: &Value) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable { document });
        }
        self.lock_documents().insert(document, value.clone());
        *self.lock_writes().entry(document).or_default() += 1;
        Ok(())
    }
}
