//! Engine and workflow traits implemented by transfer adapters.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use nebula_events::ProgressSink;

use crate::error::JobResult;
use crate::model::{
    FilePriority, JobRequest, PeerStats, SourceDescriptor, TransferMetadata, TransferRateLimit,
};

/// Opaque transfer engine the supervisor drives.
///
/// Implementations must tolerate concurrent calls from many jobs.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Resolve the file list and display name for a source.
    ///
    /// May wait indefinitely; callers apply their own bound. Every successful
    /// resolve takes a hold on the source's engine state that the caller gives
    /// back with one [`TransferEngine::release`].
    async fn resolve_metadata(&self, source: &SourceDescriptor)
    -> anyhow::Result<TransferMetadata>;

    /// Resolve raw torrent metainfo into its source descriptor and metadata.
    ///
    /// Takes the same hold as [`TransferEngine::resolve_metadata`]. The
    /// default implementation reports lack of support.
    async fn resolve_from_bytes(
        &self,
        metainfo: &[u8],
    ) -> anyhow::Result<(SourceDescriptor, TransferMetadata)> {
        let _ = metainfo;
        bail!("metainfo analysis not supported by this engine");
    }

    /// Apply a priority to one file of a resolved source.
    async fn set_file_priority(
        &self,
        source: &SourceDescriptor,
        index: usize,
        priority: FilePriority,
    ) -> anyhow::Result<()>;

    /// Read back the priority of one file; default implementation reports lack of support.
    async fn file_priority(
        &self,
        source: &SourceDescriptor,
        index: usize,
    ) -> anyhow::Result<FilePriority> {
        let _ = (source, index);
        bail!("priority inspection not supported by this engine");
    }

    /// Completed bytes for every file, in index order.
    async fn bytes_completed(&self, source: &SourceDescriptor) -> anyhow::Result<Vec<u64>>;

    /// Swarm statistics for a source.
    async fn peer_stats(&self, source: &SourceDescriptor) -> anyhow::Result<PeerStats>;

    /// Give back one hold taken by a successful resolve; state goes with the last hold.
    async fn release(&self, source: &SourceDescriptor) -> anyhow::Result<()> {
        let _ = source;
        Ok(())
    }

    /// Update global bandwidth caps; default implementation reports lack of support.
    async fn update_limits(&self, limits: TransferRateLimit) -> anyhow::Result<()> {
        let _ = limits;
        bail!("rate limit updates not supported by this engine");
    }
}

/// Job control façade exposed to the API layer.
#[async_trait]
pub trait JobWorkflow: Send + Sync {
    /// Validate and launch a job, returning its freshly allocated id.
    async fn start(&self, request: JobRequest, sink: Arc<dyn ProgressSink>) -> JobResult<String>;

    /// Launch a job under a caller-supplied id; used for restart recovery.
    async fn start_with_id(
        &self,
        job_id: String,
        request: JobRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> JobResult<()>;

    /// Signal cancellation without waiting for the job to observe it.
    async fn cancel(&self, job_id: &str) -> JobResult<()>;

    /// Close the job's pause gate.
    async fn pause(&self, job_id: &str) -> JobResult<()>;

    /// Open the job's pause gate.
    async fn resume(&self, job_id: &str) -> JobResult<()>;

    /// Whether a live session exists for the job.
    fn is_active(&self, job_id: &str) -> bool;

    /// Number of live sessions.
    fn active_jobs(&self) -> usize;

    /// Signal cancellation to every live session.
    ///
    /// Jobs stopped this way keep their persisted record instead of writing a
    /// terminal status, so the next start can resume them.
    fn shutdown(&self);
}
