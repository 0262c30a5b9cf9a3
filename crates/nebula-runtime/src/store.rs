//! Authoritative job state with debounced persistence.
//!
//! # Design
//! - Job records, history, and favorites each sit behind their own `RwLock`.
//! - Job record saves set a pending flag and push a single flush deadline out by
//!   the debounce window; one background flusher owns the timer, so a burst of
//!   saves collapses into one write.
//! - Deletes and [`StateStore::close`] flush synchronously.
//! - History and favorite mutations persist on every call while holding their
//!   write lock, so the durable copy matches the last committed mutation.
//! - Reads always return owned copies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use nebula_telemetry::Metrics;
use nebula_transfer_core::{JobRecord, JobStatus};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::backend::{Document, DocumentStore};
use crate::collections::{
    FavoriteEntry, HistoryAccess, HistoryEntry, NewFavorite, search_history, upsert_favorite,
    upsert_history,
};
use crate::error::{StoreError, StoreResult};

/// Delay between the last job record save and its durable flush.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Shared handle to the state store.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Arc<dyn DocumentStore>,
    metrics: Metrics,
    debounce: Duration,
    downloads: RwLock<HashMap<String, JobRecord>>,
    history: RwLock<Vec<HistoryEntry>>,
    favorites: RwLock<Vec<FavoriteEntry>>,
    pending: AtomicBool,
    deadline: watch::Sender<Option<Instant>>,
    flush_gate: Mutex<()>,
}

async fn load_document<T>(backend: &dyn DocumentStore, document: Document) -> StoreResult<T>
where
    T: DeserializeOwned + Default,
{
    match backend.load(document).await? {
        Some(value) => {
            serde_json::from_value(value).map_err(|source| StoreError::Serde { document, source })
        }
        None => Ok(T::default()),
    }
}

fn encode<T: Serialize>(document: Document, value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|source| StoreError::Serde { document, source })
}

impl StateStore {
    /// Load every document and start the debounce flusher.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing document cannot be read or decoded.
    pub async fn open(backend: Arc<dyn DocumentStore>, metrics: Metrics) -> StoreResult<Self> {
        Self::open_with_debounce(backend, metrics, DEFAULT_DEBOUNCE).await
    }

    /// Variant of [`StateStore::open`] with a custom debounce window.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing document cannot be read or decoded.
    pub async fn open_with_debounce(
        backend: Arc<dyn DocumentStore>,
        metrics: Metrics,
        debounce: Duration,
    ) -> StoreResult<Self> {
        let downloads: HashMap<String, JobRecord> =
            load_document(backend.as_ref(), Document::Downloads).await?;
        let history: Vec<HistoryEntry> =
            load_document(backend.as_ref(), Document::History).await?;
        let favorites: Vec<FavoriteEntry> =
            load_document(backend.as_ref(), Document::Favorites).await?;
        debug!(
            downloads = downloads.len(),
            history = history.len(),
            favorites = favorites.len(),
            "state store loaded"
        );

        let (deadline, receiver) = watch::channel(None);
        let inner = Arc::new(StoreInner {
            backend,
            metrics,
            debounce,
            downloads: RwLock::new(downloads),
            history: RwLock::new(history),
            favorites: RwLock::new(favorites),
            pending: AtomicBool::new(false),
            deadline,
            flush_gate: Mutex::new(()),
        });
        tokio::spawn(run_flusher(Arc::downgrade(&inner), receiver));
        Ok(Self { inner })
    }

    /// Insert or replace a job record, stamping `updated_at`, and schedule a flush.
    pub async fn save_download(&self, mut record: JobRecord) {
        record.updated_at = Utc::now();
        self.inner
            .downloads
            .write()
            .await
            .insert(record.id.clone(), record);
        self.schedule_flush();
    }

    /// Apply `update` to an existing record and schedule a flush.
    ///
    /// Returns the updated copy, or `None` when no record exists.
    pub async fn modify_download<F>(&self, job_id: &str, update: F) -> Option<JobRecord>
    where
        F: FnOnce(&mut JobRecord) + Send,
    {
        let updated = {
            let mut downloads = self.inner.downloads.write().await;
            let record = downloads.get_mut(job_id)?;
            update(record);
            record.updated_at = Utc::now();
            record.clone()
        };
        self.schedule_flush();
        Some(updated)
    }

    /// Remove a record and persist the removal immediately.
    ///
    /// # Errors
    ///
    /// Returns an error when the synchronous flush fails; the in-memory removal
    /// stands regardless.
    pub async fn delete_download(&self, job_id: &str) -> StoreResult<Option<JobRecord>> {
        let removed = self.inner.downloads.write().await.remove(job_id);
        if removed.is_some() {
            self.flush_now().await?;
        }
        Ok(removed)
    }

    /// Copy of one record.
    pub async fn get_download(&self, job_id: &str) -> Option<JobRecord> {
        self.inner.downloads.read().await.get(job_id).cloned()
    }

    /// Copies of every record, most recently updated first.
    pub async fn all_downloads(&self) -> Vec<JobRecord> {
        self.collect_downloads(|_| true).await
    }

    /// Copies of records in `status`, most recently updated first.
    pub async fn downloads_with_status(&self, status: JobStatus) -> Vec<JobRecord> {
        self.collect_downloads(|record| record.status == status)
            .await
    }

    /// Copies of paused, downloading, and failed records, most recently updated first.
    pub async fn incomplete_downloads(&self) -> Vec<JobRecord> {
        self.collect_downloads(|record| record.status.is_incomplete())
            .await
    }

    async fn collect_downloads<P>(&self, keep: P) -> Vec<JobRecord>
    where
        P: Fn(&JobRecord) -> bool + Send,
    {
        let mut records: Vec<JobRecord> = self
            .inner
            .downloads
            .read()
            .await
            .values()
            .filter(|record| keep(record))
            .cloned()
            .collect();
        records.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        records
    }

    /// Record an access to a source, refreshing an existing entry in place.
    ///
    /// # Errors
    ///
    /// Returns an error when the history document cannot be written.
    pub async fn add_to_history(&self, access: HistoryAccess) -> StoreResult<HistoryEntry> {
        let mut history = self.inner.history.write().await;
        let entry = upsert_history(&mut history, access, Utc::now());
        let value = encode(Document::History, &*history)?;
        self.inner.backend.replace(Document::History, &value).await?;
        Ok(entry)
    }

    /// Up to `limit` history entries, most recently accessed first.
    pub async fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        let mut entries = self.inner.history.read().await.clone();
        entries.sort_by(|left, right| right.accessed_at.cmp(&left.accessed_at));
        entries.truncate(limit);
        entries
    }

    /// Case-insensitive search over names and sources, capped at 50 results.
    pub async fn search_history(&self, query: &str) -> Vec<HistoryEntry> {
        search_history(&self.inner.history.read().await, query)
    }

    /// Add or refresh a favorite.
    ///
    /// # Errors
    ///
    /// Returns an error when the favorites document cannot be written.
    pub async fn add_favorite(&self, favorite: NewFavorite) -> StoreResult<FavoriteEntry> {
        let mut favorites = self.inner.favorites.write().await;
        let entry = upsert_favorite(&mut favorites, favorite, Utc::now());
        let value = encode(Document::Favorites, &*favorites)?;
        self.inner
            .backend
            .replace(Document::Favorites, &value)
            .await?;
        Ok(entry)
    }

    /// Remove the favorite for `magnet_link`; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns an error when the favorites document cannot be written.
    pub async fn remove_favorite(&self, magnet_link: &str) -> StoreResult<bool> {
        let mut favorites = self.inner.favorites.write().await;
        let before = favorites.len();
        favorites.retain(|entry| entry.magnet_link != magnet_link);
        if favorites.len() == before {
            return Ok(false);
        }
        let value = encode(Document::Favorites, &*favorites)?;
        self.inner
            .backend
            .replace(Document::Favorites, &value)
            .await?;
        Ok(true)
    }

    /// Favorites, most recently added first.
    pub async fn favorites(&self) -> Vec<FavoriteEntry> {
        let mut entries = self.inner.favorites.read().await.clone();
        entries.sort_by(|left, right| right.added_at.cmp(&left.added_at));
        entries
    }

    /// Whether `magnet_link` is a favorite.
    pub async fn is_favorite(&self, magnet_link: &str) -> bool {
        self.inner
            .favorites
            .read()
            .await
            .iter()
            .any(|entry| entry.magnet_link == magnet_link)
    }

    /// Flush any pending job record changes and stop the debounce timer.
    ///
    /// # Errors
    ///
    /// Returns an error when the final flush fails.
    pub async fn close(&self) -> StoreResult<()> {
        self.flush_now().await.inspect_err(|err| {
            warn!(error = %err, "final state flush failed");
        })
    }

    /// Whether job record changes are waiting for the debounce timer.
    #[must_use]
    pub fn has_pending_flush(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    fn schedule_flush(&self) {
        self.inner.pending.store(true, Ordering::SeqCst);
        self.inner
            .deadline
            .send_replace(Some(Instant::now() + self.inner.debounce));
    }

    async fn flush_now(&self) -> StoreResult<()> {
        self.inner.deadline.send_replace(None);
        self.inner.pending.store(true, Ordering::SeqCst);
        self.inner.flush().await
    }
}

impl StoreInner {
    async fn flush(&self) -> StoreResult<()> {
        let _gate = self.flush_gate.lock().await;
        if !self.pending.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let value = {
            let downloads = self.downloads.read().await;
            encode(Document::Downloads, &*downloads)
        };
        let outcome = match value {
            Ok(value) => self.backend.replace(Document::Downloads, &value).await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(()) => {
                self.metrics.inc_store_flush();
                Ok(())
            }
            Err(err) => {
                self.pending.store(true, Ordering::SeqCst);
                Err(err)
            }
        }
    }
}

async fn run_flusher(store: Weak<StoreInner>, mut deadline: watch::Receiver<Option<Instant>>) {
    loop {
        let next = *deadline.borrow_and_update();
        let Some(at) = next else {
            if deadline.changed().await.is_err() {
                return;
            }
            continue;
        };
        tokio::select! {
            () = sleep_until(at) => {
                let Some(inner) = store.upgrade() else {
                    return;
                };
                inner.deadline.send_if_modified(|current| {
                    if *current == Some(at) {
                        *current = None;
                        true
                    } else {
                        false
                    }
                });
                if let Err(err) = inner.flush().await {
                    warn!(error = %err, "debounced state flush failed");
                }
            }
            changed = deadline.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
