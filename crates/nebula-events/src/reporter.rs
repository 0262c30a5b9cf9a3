//! Throttled progress reporting on top of the fan-out hub.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::hub::ProgressHub;
use crate::payloads::ProgressPayload;

/// Minimum spacing between two delivered progress events for one job.
pub const MIN_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Percentage movement that bypasses [`MIN_REPORT_INTERVAL`].
pub const MIN_REPORT_DELTA: f64 = 0.5;

/// Percentage marking a finished transfer; always delivered.
pub const COMPLETE_PERCENTAGE: f64 = 100.0;

/// Receiver of job progress produced by a supervised transfer.
pub trait ProgressSink: Send + Sync {
    /// Record display metadata attached to subsequent progress events.
    fn set_meta(&self, job_id: &str, name: &str, total_size: u64, peers: u32);

    /// Report a progress sample.
    fn on_progress(&self, job_id: &str, percentage: f64, download_speed: f64, upload_speed: f64);

    /// Report a human-readable log line.
    fn on_log(&self, job_id: &str, message: &str);

    /// Release any per-job state once the job has finished.
    fn on_finished(&self, job_id: &str) {
        let _ = job_id;
    }
}

/// Sink that throttles progress per job and forwards it to a [`ProgressHub`].
pub struct ProgressReporter {
    hub: ProgressHub,
    jobs: Mutex<HashMap<String, JobReport>>,
}

#[derive(Default)]
struct JobReport {
    name: String,
    total_size: u64,
    peers: u32,
    last_sent: Option<Instant>,
    last_percentage: Option<f64>,
}

impl JobReport {
    fn should_send(&self, percentage: f64, now: Instant) -> bool {
        if percentage >= COMPLETE_PERCENTAGE {
            return true;
        }
        let (Some(sent_at), Some(last)) = (self.last_sent, self.last_percentage) else {
            return true;
        };
        now.saturating_duration_since(sent_at) >= MIN_REPORT_INTERVAL
            || (percentage - last).abs() >= MIN_REPORT_DELTA
    }
}

impl ProgressReporter {
    /// Build a reporter that publishes through `hub`.
    #[must_use]
    pub fn new(hub: ProgressHub) -> Self {
        Self {
            hub,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobReport>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, job_id: &str, payload: ProgressPayload) {
        if let Err(err) = self.hub.publish_event(job_id, payload) {
            warn!(error = %err, job_id = %job_id, "dropping progress event");
        }
    }
}

/// Estimate seconds remaining from the current rate and the bytes still missing.
///
/// Returns `None` when the rate is zero, the size is unknown, or the transfer
/// is already complete.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn estimate_eta(total_size: u64, percentage: f64, download_speed: f64) -> Option<u64> {
    if download_speed <= 0.0 || total_size == 0 || percentage >= COMPLETE_PERCENTAGE {
        return None;
    }
    let remaining = total_size as f64 * (1.0 - percentage / 100.0);
    Some((remaining / download_speed).max(0.0) as u64)
}

impl ProgressSink for ProgressReporter {
    fn set_meta(&self, job_id: &str, name: &str, total_size: u64, peers: u32) {
        let mut jobs = self.jobs();
        let report = jobs.entry(job_id.to_string()).or_default();
        name.clone_into(&mut report.name);
        report.total_size = total_size;
        report.peers = peers;
    }

    fn on_progress(&self, job_id: &str, percentage: f64, download_speed: f64, upload_speed: f64) {
        let now = Instant::now();
        let payload = {
            let mut jobs = self.jobs();
            let report = jobs.entry(job_id.to_string()).or_default();
            if !report.should_send(percentage, now) {
                return;
            }
            report.last_sent = Some(now);
            report.last_percentage = Some(percentage);
            ProgressPayload::Progress {
                percentage,
                download_speed,
                upload_speed,
                name: report.name.clone(),
                total_size: report.total_size,
                peers: report.peers,
                eta: estimate_eta(report.total_size, percentage, download_speed),
            }
        };
        self.publish(job_id, payload);
    }

    fn on_log(&self, job_id: &str, message: &str) {
        self.publish(
            job_id,
            ProgressPayload::Log {
                message: message.to_string(),
            },
        );
    }

    fn on_finished(&self, job_id: &str) {
        self.jobs().remove(job_id);
    }
}
