//! In-process transfer engine that fabricates deterministic progress.
//!
//! # Design
//! - Metadata comes from [`SimulatedEngine::register`] or is synthesised from
//!   the info-hash, so the same source always yields the same file list.
//! - Files start skipped. Each enabled file accrues bytes at the configured
//!   rate measured on the tokio clock, which lets paused-clock tests drive it.
//! - Engine state per source is shared by every holder. Each successful
//!   resolve adds a hold and each release drops one; the state, file progress
//!   included, goes away with the last hold.
//! - Metainfo bytes map to a source through a digest of the payload, then
//!   resolve like that source's magnet link.
//! - Test hooks inject completed bytes and make sources unresolvable.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use crate::model::{
    FilePriority, PeerStats, SourceDescriptor, TransferFile, TransferMetadata, TransferRateLimit,
};
use crate::service::TransferEngine;

/// Default per-file transfer rate.
pub const DEFAULT_BYTES_PER_SECOND: u64 = 256 * 1024;

const SYNTHETIC_FILE_UNIT: u64 = 1024 * 1024;

/// Deterministic engine used by the binary and by tests.
pub struct SimulatedEngine {
    bytes_per_second: u64,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    registered: HashMap<String, TransferMetadata>,
    unresolvable: HashSet<String>,
    injected: HashMap<(String, usize), u64>,
    transfers: HashMap<String, SimulatedTransfer>,
    limits: TransferRateLimit,
}

struct SimulatedTransfer {
    metadata: TransferMetadata,
    files: Vec<SimulatedFile>,
    holders: usize,
}

struct SimulatedFile {
    priority: FilePriority,
    banked: u64,
    enabled_since: Option<Instant>,
}

impl SimulatedFile {
    fn progressed(&self, rate: u64, now: Instant) -> u64 {
        let running = self.enabled_since.map_or(0, |since| {
            let millis = now.saturating_duration_since(since).as_millis();
            u64::try_from(millis * u128::from(rate) / 1000).unwrap_or(u64::MAX)
        });
        self.banked.saturating_add(running)
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    /// Engine transferring each enabled file at [`DEFAULT_BYTES_PER_SECOND`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate(DEFAULT_BYTES_PER_SECOND)
    }

    /// Engine transferring each enabled file at `bytes_per_second`.
    #[must_use]
    pub fn with_rate(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `metadata` for `source` instead of synthesising it.
    pub fn register(&self, source: &SourceDescriptor, metadata: TransferMetadata) {
        self.inner().registered.insert(source.info_hash(), metadata);
    }

    /// Make metadata resolution for `source` wait forever.
    pub fn mark_unresolvable(&self, source: &SourceDescriptor) {
        self.inner().unresolvable.insert(source.info_hash());
    }

    /// Report `bytes` extra completed bytes for one file, whatever its priority.
    pub fn inject_completed(&self, source: &SourceDescriptor, index: usize, bytes: u64) {
        *self
            .inner()
            .injected
            .entry((source.info_hash(), index))
            .or_default() += bytes;
    }

    /// Limits most recently pushed through [`TransferEngine::update_limits`].
    #[must_use]
    pub fn limits(&self) -> TransferRateLimit {
        self.inner().limits
    }

    /// Whether `source` currently has engine state.
    #[must_use]
    pub fn is_tracking(&self, source: &SourceDescriptor) -> bool {
        self.inner().transfers.contains_key(&source.info_hash())
    }

    /// Outstanding holds on `source`'s engine state.
    #[must_use]
    pub fn holders(&self, source: &SourceDescriptor) -> usize {
        self.inner()
            .transfers
            .get(&source.info_hash())
            .map_or(0, |transfer| transfer.holders)
    }
}

/// Magnet descriptor standing in for a metainfo payload.
fn metainfo_source(metainfo: &[u8]) -> anyhow::Result<SourceDescriptor> {
    if metainfo.is_empty() {
        bail!("metainfo is empty");
    }
    let digest = Sha256::digest(metainfo);
    let hash = hex::encode(&digest[..20]);
    Ok(SourceDescriptor::parse(&format!("magnet:?xt=urn:btih:{hash}"))?)
}

/// Build a stable file list from the info-hash digits.
fn synthesize(source: &SourceDescriptor) -> TransferMetadata {
    let hash = source.info_hash();
    let digits: Vec<u64> = hash
        .chars()
        .filter_map(|ch| ch.to_digit(16))
        .map(u64::from)
        .collect();
    let count = digits
        .first()
        .and_then(|digit| usize::try_from(digit % 4 + 1).ok())
        .unwrap_or(1);
    let files = (0..count)
        .map(|index| TransferFile {
            index,
            path: format!("file-{index}.bin"),
            size: (digits.get(index + 1).copied().unwrap_or(1) + 1) * SYNTHETIC_FILE_UNIT,
        })
        .collect();
    TransferMetadata {
        name: format!("transfer-{}", hash.get(..8).unwrap_or(&hash)),
        files,
    }
}

#[async_trait]
impl TransferEngine for SimulatedEngine {
    async fn resolve_metadata(
        &self,
        source: &SourceDescriptor,
    ) -> anyhow::Result<TransferMetadata> {
        let key = source.info_hash();
        let metadata = {
            let mut inner = self.inner();
            if inner.unresolvable.contains(&key) {
                None
            } else {
                let metadata = inner
                    .registered
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| synthesize(source));
                let transfer = inner
                    .transfers
                    .entry(key.clone())
                    .or_insert_with(|| SimulatedTransfer {
                        files: metadata
                            .files
                            .iter()
                            .map(|_| SimulatedFile {
                                priority: FilePriority::Skip,
                                banked: 0,
                                enabled_since: None,
                            })
                            .collect(),
                        metadata: metadata.clone(),
                        holders: 0,
                    });
                transfer.holders += 1;
                Some(metadata)
            }
        };
        match metadata {
            Some(metadata) => {
                debug!(info_hash = %key, files = metadata.files.len(), "metadata resolved");
                Ok(metadata)
            }
            None => std::future::pending().await,
        }
    }

    async fn resolve_from_bytes(
        &self,
        metainfo: &[u8],
    ) -> anyhow::Result<(SourceDescriptor, TransferMetadata)> {
        let source = metainfo_source(metainfo)?;
        let metadata = self.resolve_metadata(&source).await?;
        Ok((source, metadata))
    }

    async fn set_file_priority(
        &self,
        source: &SourceDescriptor,
        index: usize,
        priority: FilePriority,
    ) -> anyhow::Result<()> {
        let now = Instant::now();
        let rate = self.bytes_per_second;
        let mut inner = self.inner();
        let transfer = inner
            .transfers
            .get_mut(&source.info_hash())
            .ok_or_else(|| anyhow!("source has not been resolved"))?;
        let Some(file) = transfer.files.get_mut(index) else {
            bail!("file index {index} out of range");
        };
        match (file.priority.is_enabled(), priority.is_enabled()) {
            (false, true) => file.enabled_since = Some(now),
            (true, false) => {
                file.banked = file.progressed(rate, now);
                file.enabled_since = None;
            }
            _ => {}
        }
        file.priority = priority;
        Ok(())
    }

    async fn file_priority(
        &self,
        source: &SourceDescriptor,
        index: usize,
    ) -> anyhow::Result<FilePriority> {
        let inner = self.inner();
        let transfer = inner
            .transfers
            .get(&source.info_hash())
            .ok_or_else(|| anyhow!("source has not been resolved"))?;
        transfer
            .files
            .get(index)
            .map(|file| file.priority)
            .ok_or_else(|| anyhow!("file index {index} out of range"))
    }

    async fn bytes_completed(&self, source: &SourceDescriptor) -> anyhow::Result<Vec<u64>> {
        let now = Instant::now();
        let key = source.info_hash();
        let inner = self.inner();
        let transfer = inner
            .transfers
            .get(&key)
            .ok_or_else(|| anyhow!("source has not been resolved"))?;
        Ok(transfer
            .files
            .iter()
            .zip(&transfer.metadata.files)
            .map(|(file, meta)| {
                let injected = inner
                    .injected
                    .get(&(key.clone(), meta.index))
                    .copied()
                    .unwrap_or_default();
                file.progressed(self.bytes_per_second, now)
                    .saturating_add(injected)
                    .min(meta.size)
            })
            .collect())
    }

    async fn peer_stats(&self, source: &SourceDescriptor) -> anyhow::Result<PeerStats> {
        let key = source.info_hash();
        if !self.inner().transfers.contains_key(&key) {
            bail!("source has not been resolved");
        }
        let peers = key
            .chars()
            .last()
            .and_then(|ch| ch.to_digit(16))
            .map_or(1, |digit| digit + 1);
        Ok(PeerStats {
            peers,
            bytes_uploaded: 0,
        })
    }

    async fn release(&self, source: &SourceDescriptor) -> anyhow::Result<()> {
        let key = source.info_hash();
        let mut inner = self.inner();
        let Some(transfer) = inner.transfers.get_mut(&key) else {
            return Ok(());
        };
        transfer.holders = transfer.holders.saturating_sub(1);
        if transfer.holders == 0 {
            inner.transfers.remove(&key);
            inner.injected.retain(|(hash, _), _| hash != &key);
            debug!(info_hash = %key, "engine state dropped with last hold");
        }
        Ok(())
    }

    async fn update_limits(&self, limits: TransferRateLimit) -> anyhow::Result<()> {
        self.inner().limits = limits;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn source(hash_char: char) -> SourceDescriptor {
        SourceDescriptor::parse(&format!(
            "magnet:?xt=urn:btih:{}",
            hash_char.to_string().repeat(40)
        ))
        .expect("valid descriptor")
    }

    fn three_files() -> TransferMetadata {
        TransferMetadata {
            name: "set".to_string(),
            files: [400, 5_000, 600]
                .into_iter()
                .enumerate()
                .map(|(index, size)| TransferFile {
                    index,
                    path: format!("f{index}"),
                    size,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn synthesised_metadata_is_stable() -> anyhow::Result<()> {
        let engine = SimulatedEngine::new();
        let first = engine.resolve_metadata(&source('c')).await?;
        let second = engine.resolve_metadata(&source('c')).await?;
        assert_eq!(first, second);
        assert_eq!(first.files.len(), 1);
        assert_eq!(first.name, "transfer-cccccccc");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn only_enabled_files_progress() -> anyhow::Result<()> {
        let engine = SimulatedEngine::with_rate(100);
        let src = source('a');
        engine.register(&src, three_files());
        engine.resolve_metadata(&src).await?;
        engine.set_file_priority(&src, 0, FilePriority::Normal).await?;
        engine.set_file_priority(&src, 2, FilePriority::Now).await?;

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(engine.bytes_completed(&src).await?, vec![300, 0, 300]);

        engine.set_file_priority(&src, 0, FilePriority::Skip).await?;
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(engine.bytes_completed(&src).await?, vec![300, 0, 600]);
        assert_eq!(engine.file_priority(&src, 2).await?, FilePriority::Now);
        Ok(())
    }

    #[tokio::test]
    async fn injection_and_release() -> anyhow::Result<()> {
        let engine = SimulatedEngine::with_rate(0);
        let src = source('b');
        engine.register(&src, three_files());
        engine.inject_completed(&src, 1, 64);
        engine.resolve_metadata(&src).await?;
        assert_eq!(engine.bytes_completed(&src).await?, vec![0, 64, 0]);

        engine.release(&src).await?;
        assert!(!engine.is_tracking(&src));
        assert!(engine.bytes_completed(&src).await.is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn state_survives_until_the_last_holder_releases() -> anyhow::Result<()> {
        let engine = SimulatedEngine::with_rate(100);
        let src = source('e');
        engine.register(&src, three_files());
        engine.resolve_metadata(&src).await?;
        engine.set_file_priority(&src, 0, FilePriority::Normal).await?;
        tokio::time::advance(Duration::from_secs(2)).await;

        engine.resolve_metadata(&src).await?;
        assert_eq!(engine.holders(&src), 2);
        assert_eq!(engine.bytes_completed(&src).await?, vec![200, 0, 0]);

        engine.release(&src).await?;
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(engine.bytes_completed(&src).await?, vec![300, 0, 0]);
        assert!(engine.peer_stats(&src).await.is_ok());

        engine.release(&src).await?;
        assert!(!engine.is_tracking(&src));
        engine.release(&src).await?;
        assert_eq!(engine.holders(&src), 0);
        Ok(())
    }

    #[tokio::test]
    async fn metainfo_bytes_resolve_to_a_stable_source() -> anyhow::Result<()> {
        let engine = SimulatedEngine::new();
        let payload = b"d4:infod6:lengthi1024e4:name8:demo.isoee";
        let (first, metadata) = engine.resolve_from_bytes(payload).await?;
        let (second, again) = engine.resolve_from_bytes(payload).await?;

        assert_eq!(first, second);
        assert_eq!(metadata, again);
        assert_eq!(first.info_hash().len(), 40);
        assert_eq!(metadata, engine.resolve_metadata(&first).await?);
        assert_eq!(engine.holders(&first), 3);

        let (other, _) = engine.resolve_from_bytes(b"d4:infod4:name1:xee").await?;
        assert_ne!(other, first);
        assert!(engine.resolve_from_bytes(&[]).await.is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_sources_never_resolve() {
        let engine = SimulatedEngine::new();
        let src = source('d');
        engine.mark_unresolvable(&src);
        let outcome =
            tokio::time::timeout(Duration::from_secs(30), engine.resolve_metadata(&src)).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn records_pushed_limits() -> anyhow::Result<()> {
        let engine = SimulatedEngine::new();
        let limits = TransferRateLimit {
            download_bps: Some(1024),
            upload_bps: None,
        };
        engine.update_limits(limits).await?;
        assert_eq!(engine.limits(), limits);
        Ok(())
    }
}
