//! Job supervisor: one cancellable, pausable background task per job.
//!
//! # Design
//! - The session table is the only authority on whether a job is live. A
//!   drop guard removes the session on every exit path of the task.
//! - Control calls copy the handle out of the table and act on it after the
//!   lock is released.
//! - Terminal records are written by the task wrapper, never by control calls.
//!   Records deleted while the job was running stay deleted.
//! - Session tokens are children of the supervisor's stop token. A job stopped
//!   by [`JobWorkflow::shutdown`] rather than by its own cancel leaves its
//!   record as it was, so restart recovery picks it up.
//! - Engine state is released only by jobs whose metadata resolved, one
//!   release per resolve.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nebula_events::ProgressSink;
use nebula_runtime::StateStore;
use nebula_telemetry::Metrics;
use nebula_transfer_core::{
    FilePriority, JobError, JobRecord, JobRequest, JobResult, JobSpec, JobStatus, JobWorkflow,
    PeerStats, TransferEngine, TransferMetadata,
};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pause::PauseGate;

/// Bound on metadata resolution.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between progress samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Timing knobs for supervised jobs.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Bound on metadata resolution.
    pub metadata_timeout: Duration,
    /// Interval between progress samples.
    pub sample_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: METADATA_TIMEOUT,
            sample_interval: SAMPLE_INTERVAL,
        }
    }
}

#[derive(Clone)]
struct Session {
    cancel: CancellationToken,
    gate: Arc<PauseGate>,
    requested: Arc<AtomicBool>,
}

type SessionTable = Arc<Mutex<HashMap<String, Session>>>;

fn lock_sessions(sessions: &SessionTable) -> MutexGuard<'_, HashMap<String, Session>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a job's session when the supervised task ends, however it ends.
struct SessionGuard {
    sessions: SessionTable,
    job_id: String,
    telemetry: Metrics,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let remaining = {
            let mut sessions = lock_sessions(&self.sessions);
            sessions.remove(&self.job_id);
            sessions.len()
        };
        self.telemetry.set_active_jobs(remaining);
    }
}

/// Runs transfers as supervised background tasks and exposes job control.
pub struct JobSupervisor {
    engine: Arc<dyn TransferEngine>,
    store: StateStore,
    telemetry: Metrics,
    config: SupervisorConfig,
    sessions: SessionTable,
    tasks: TaskTracker,
    stopping: CancellationToken,
}

impl JobSupervisor {
    /// Supervisor with default timings.
    #[must_use]
    pub fn new(engine: Arc<dyn TransferEngine>, store: StateStore, telemetry: Metrics) -> Self {
        Self::with_config(engine, store, telemetry, SupervisorConfig::default())
    }

    /// Supervisor with explicit timings.
    #[must_use]
    pub fn with_config(
        engine: Arc<dyn TransferEngine>,
        store: StateStore,
        telemetry: Metrics,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            engine,
            store,
            telemetry,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            tasks: TaskTracker::new(),
            stopping: CancellationToken::new(),
        }
    }

    fn session(&self, job_id: &str) -> Option<Session> {
        lock_sessions(&self.sessions).get(job_id).cloned()
    }

    async fn not_found(&self, job_id: &str) -> JobError {
        JobError::NotFound {
            job_id: job_id.to_string(),
            last_status: self
                .store
                .get_download(job_id)
                .await
                .map(|record| record.status),
        }
    }

    /// Wait for every supervised task, including its terminal write, bounded by `bound`.
    ///
    /// Returns `false` when tasks were still running at the deadline. No new
    /// jobs can be started afterwards.
    pub async fn drain(&self, bound: Duration) -> bool {
        self.tasks.close();
        timeout(bound, self.tasks.wait()).await.is_ok()
    }

    async fn launch(
        &self,
        job_id: String,
        request: JobRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> JobResult<()> {
        let spec = JobSpec::from_request(&request)?;
        if self.tasks.is_closed() || self.stopping.is_cancelled() {
            return Err(JobError::Canceled { job_id });
        }

        let session = Session {
            cancel: self.stopping.child_token(),
            gate: Arc::new(PauseGate::new()),
            requested: Arc::new(AtomicBool::new(false)),
        };
        let active = {
            let mut sessions = lock_sessions(&self.sessions);
            if sessions.contains_key(&job_id) {
                return Err(JobError::invalid_argument(
                    "job_id",
                    "already_running",
                    Some(job_id),
                ));
            }
            sessions.insert(job_id.clone(), session.clone());
            sessions.len()
        };
        self.telemetry.set_active_jobs(active);
        let guard = SessionGuard {
            sessions: Arc::clone(&self.sessions),
            job_id: job_id.clone(),
            telemetry: self.telemetry.clone(),
        };

        if self.store.get_download(&job_id).await.is_none() {
            self.store
                .save_download(JobRecord::pending(job_id.clone(), &spec, Utc::now()))
                .await;
        }

        let job = SupervisedJob {
            job_id,
            spec,
            engine: Arc::clone(&self.engine),
            store: self.store.clone(),
            telemetry: self.telemetry.clone(),
            sink,
            session,
            config: self.config,
        };
        self.tasks.spawn(job.run(guard));
        Ok(())
    }
}

#[async_trait]
impl JobWorkflow for JobSupervisor {
    async fn start(&self, request: JobRequest, sink: Arc<dyn ProgressSink>) -> JobResult<String> {
        let job_id = Uuid::new_v4().to_string();
        self.launch(job_id.clone(), request, sink).await?;
        info!(job_id = %job_id, "job started");
        Ok(job_id)
    }

    async fn start_with_id(
        &self,
        job_id: String,
        request: JobRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> JobResult<()> {
        self.launch(job_id.clone(), request, sink).await?;
        info!(job_id = %job_id, "job restarted");
        Ok(())
    }

    async fn cancel(&self, job_id: &str) -> JobResult<()> {
        let Some(session) = self.session(job_id) else {
            return Err(self.not_found(job_id).await);
        };
        session.requested.store(true, Ordering::SeqCst);
        session.cancel.cancel();
        info!(job_id = %job_id, "job cancellation requested");
        Ok(())
    }

    async fn pause(&self, job_id: &str) -> JobResult<()> {
        let Some(session) = self.session(job_id) else {
            return Err(self.not_found(job_id).await);
        };
        session.gate.pause();
        self.store
            .modify_download(job_id, |record| {
                if !record.status.is_terminal() {
                    record.set_paused(true);
                }
            })
            .await;
        info!(job_id = %job_id, "job paused");
        Ok(())
    }

    async fn resume(&self, job_id: &str) -> JobResult<()> {
        let Some(session) = self.session(job_id) else {
            return Err(self.not_found(job_id).await);
        };
        session.gate.resume();
        self.store
            .modify_download(job_id, |record| {
                if record.status == JobStatus::Paused {
                    record.set_paused(false);
                }
            })
            .await;
        info!(job_id = %job_id, "job resumed");
        Ok(())
    }

    fn is_active(&self, job_id: &str) -> bool {
        lock_sessions(&self.sessions).contains_key(job_id)
    }

    fn active_jobs(&self) -> usize {
        lock_sessions(&self.sessions).len()
    }

    fn shutdown(&self) {
        let live = lock_sessions(&self.sessions).len();
        info!(jobs = live, "stopping live jobs");
        self.stopping.cancel();
    }
}

struct SupervisedJob {
    job_id: String,
    spec: JobSpec,
    engine: Arc<dyn TransferEngine>,
    store: StateStore,
    telemetry: Metrics,
    sink: Arc<dyn ProgressSink>,
    session: Session,
    config: SupervisorConfig,
}

/// Byte counts from the previous sample.
struct Sample {
    at: Instant,
    downloaded: u64,
    uploaded: u64,
}

impl SupervisedJob {
    async fn run(self, guard: SessionGuard) {
        let (outcome, resolved) = match self.resolve().await {
            Ok(metadata) => (self.transfer(&metadata).await, true),
            Err(err) => (Err(err), false),
        };
        drop(guard);

        match &outcome {
            Err(JobError::Canceled { .. }) if self.interrupted_by_shutdown() => {
                self.telemetry.inc_job_finished("interrupted");
                info!(job_id = %self.job_id, "job stopped by shutdown; record kept for recovery");
            }
            Ok(()) => {
                self.store
                    .modify_download(&self.job_id, JobRecord::mark_completed)
                    .await;
                self.telemetry.inc_job_finished("completed");
                info!(job_id = %self.job_id, "job completed");
            }
            Err(err) => {
                let message = err.terminal_message();
                self.store
                    .modify_download(&self.job_id, |record| record.mark_failed(message.clone()))
                    .await;
                self.telemetry.inc_job_finished(err.kind());
                self.sink.on_log(&self.job_id, &format!("Error: {message}"));
                self.telemetry.inc_progress_event("log");
                warn!(job_id = %self.job_id, error = %err, detail = %message, "job failed");
            }
        }

        if resolved && let Err(err) = self.engine.release(&self.spec.source).await {
            warn!(job_id = %self.job_id, error = %err, "failed to release transfer");
        }
        self.sink.on_finished(&self.job_id);
    }

    /// Canceled, but not through this job's own cancel call.
    fn interrupted_by_shutdown(&self) -> bool {
        self.session.cancel.is_cancelled() && !self.session.requested.load(Ordering::SeqCst)
    }

    fn canceled(&self) -> JobError {
        JobError::Canceled {
            job_id: self.job_id.clone(),
        }
    }

    fn checkpoint(&self) -> JobResult<()> {
        if self.session.cancel.is_cancelled() {
            Err(self.canceled())
        } else {
            Ok(())
        }
    }

    fn engine_error(&self, operation: &'static str, err: anyhow::Error) -> JobError {
        JobError::engine(operation, Some(&self.job_id), err)
    }

    async fn transfer(&self, metadata: &TransferMetadata) -> JobResult<()> {
        self.check_metadata(metadata)?;
        self.select_files(metadata).await?;

        let paused = self.session.gate.is_paused();
        self.store
            .modify_download(&self.job_id, |record| {
                record.mark_downloading(&metadata.name);
                if paused {
                    record.set_paused(true);
                }
            })
            .await;
        let total = metadata.selected_size(&self.spec.selection);
        self.sink.set_meta(&self.job_id, &metadata.name, total, 0);
        debug!(job_id = %self.job_id, total_bytes = total, "files selected; sampling progress");

        self.sample_until_complete(metadata, total).await
    }

    async fn resolve(&self) -> JobResult<TransferMetadata> {
        let resolved = tokio::select! {
            biased;
            () = self.session.cancel.cancelled() => return Err(self.canceled()),
            resolved = timeout(
                self.config.metadata_timeout,
                self.engine.resolve_metadata(&self.spec.source),
            ) => resolved,
        };
        resolved
            .map_err(|_| JobError::Timeout {
                job_id: self.job_id.clone(),
                waited: self.config.metadata_timeout,
            })?
            .map_err(|err| self.engine_error("resolve_metadata", err))
    }

    fn check_metadata(&self, metadata: &TransferMetadata) -> JobResult<()> {
        if metadata.files.is_empty() {
            return Err(JobError::invalid_argument(
                "magnet_link",
                "no_files",
                Some(self.spec.source.as_str().to_string()),
            ));
        }
        self.spec.selection.check_bounds(metadata.files.len())
    }

    async fn select_files(&self, metadata: &TransferMetadata) -> JobResult<()> {
        let selection = &self.spec.selection;
        for file in &metadata.files {
            self.checkpoint()?;
            let priority = if selection.contains(file.index) {
                if self.spec.sequential && file.index == selection.first() {
                    FilePriority::Now
                } else {
                    FilePriority::Normal
                }
            } else {
                FilePriority::Skip
            };
            self.engine
                .set_file_priority(&self.spec.source, file.index, priority)
                .await
                .map_err(|err| self.engine_error("set_file_priority", err))?;
        }
        Ok(())
    }

    async fn sample_until_complete(
        &self,
        metadata: &TransferMetadata,
        total: u64,
    ) -> JobResult<()> {
        let period = self.config.sample_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous = Sample {
            at: Instant::now(),
            downloaded: 0,
            uploaded: 0,
        };

        loop {
            tokio::select! {
                biased;
                () = self.session.cancel.cancelled() => return Err(self.canceled()),
                _ = ticker.tick() => {}
            }
            self.session
                .gate
                .wait_while_paused(&self.session.cancel)
                .await
                .map_err(|_| self.canceled())?;

            let completed = self
                .engine
                .bytes_completed(&self.spec.source)
                .await
                .map_err(|err| self.engine_error("bytes_completed", err))?;
            self.checkpoint()?;
            let downloaded = self.selected_bytes(&completed)?.min(total);

            let stats = match self.engine.peer_stats(&self.spec.source).await {
                Ok(stats) => stats,
                Err(err) => {
                    debug!(job_id = %self.job_id, error = %err, "peer stats unavailable");
                    PeerStats::default()
                }
            };
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(previous.at).as_secs_f64();
            let rate = |current: u64, before: u64| {
                if elapsed > 0.0 {
                    bytes_to_f64(current.saturating_sub(before)) / elapsed
                } else {
                    0.0
                }
            };
            let download_speed = rate(downloaded, previous.downloaded);
            let upload_speed = rate(stats.bytes_uploaded, previous.uploaded);
            previous = Sample {
                at: now,
                downloaded,
                uploaded: stats.bytes_uploaded,
            };

            let done = downloaded >= total;
            let percentage = if done {
                100.0
            } else {
                bytes_to_f64(downloaded) / bytes_to_f64(total) * 100.0
            };

            self.sink
                .set_meta(&self.job_id, &metadata.name, total, stats.peers);
            self.sink
                .on_progress(&self.job_id, percentage, download_speed, upload_speed);
            self.telemetry.inc_progress_event("progress");

            if done {
                self.sink.on_log(&self.job_id, "Completed");
                self.telemetry.inc_progress_event("log");
                return Ok(());
            }
            self.store
                .modify_download(&self.job_id, |record| {
                    record.record_sample(percentage, download_speed);
                })
                .await;
        }
    }

    /// Completed bytes across selected files, failing when any unselected file has data.
    fn selected_bytes(&self, completed: &[u64]) -> JobResult<u64> {
        let selection = &self.spec.selection;
        let (stray_indices, stray_bytes) = completed
            .iter()
            .enumerate()
            .filter(|&(index, &bytes)| bytes > 0 && !selection.contains(index))
            .fold((Vec::new(), 0_u64), |(mut indices, sum), (index, &bytes)| {
                indices.push(index);
                (indices, sum.saturating_add(bytes))
            });
        if !stray_indices.is_empty() {
            return Err(JobError::Invariant {
                job_id: self.job_id.clone(),
                file_indices: stray_indices,
                unselected_bytes: stray_bytes,
            });
        }
        Ok(selection
            .indices()
            .iter()
            .filter_map(|&index| completed.get(index))
            .fold(0_u64, |sum, &bytes| sum.saturating_add(bytes)))
    }
}

const fn bytes_to_f64(value: u64) -> f64 {
    #[expect(
        clippy::cast_precision_loss,
        reason = "byte counts are only reported as percentages and rates"
    )]
    {
        value as f64
    }
}

#[cfg(test)]
mod tests;
