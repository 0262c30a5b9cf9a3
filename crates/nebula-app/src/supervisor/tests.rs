use std::error::Error;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use nebula_events::ProgressSink;
use nebula_runtime::{MemoryDocumentStore, StateStore};
use nebula_telemetry::Metrics;
use nebula_transfer_core::{
    CANCELED_MESSAGE, FilePriority, JobError, JobRecord, JobRequest, JobSpec, JobStatus,
    JobWorkflow, SimulatedEngine, SourceDescriptor, TIMEOUT_MESSAGE, TransferEngine, TransferFile,
    TransferMetadata,
};
use tokio::time::{Instant, sleep};

use super::{JobSupervisor, METADATA_TIMEOUT, SAMPLE_INTERVAL};

type TestResult = Result<(), Box<dyn Error>>;

const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

#[derive(Debug, Clone, PartialEq)]
enum Reported {
    Progress(f64),
    Log(String),
    Finished,
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<Reported>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<Reported> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn progress(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Reported::Progress(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Reported) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl ProgressSink for RecordingSink {
    fn set_meta(&self, _job_id: &str, _name: &str, _total_size: u64, _peers: u32) {}

    fn on_progress(&self, _job_id: &str, percentage: f64, _download: f64, _upload: f64) {
        self.push(Reported::Progress(percentage));
    }

    fn on_log(&self, _job_id: &str, message: &str) {
        self.push(Reported::Log(message.to_string()));
    }

    fn on_finished(&self, _job_id: &str) {
        self.push(Reported::Finished);
    }
}

struct Fixture {
    supervisor: JobSupervisor,
    engine: Arc<SimulatedEngine>,
    store: StateStore,
    source: SourceDescriptor,
}

async fn fixture(bytes_per_second: u64, sizes: &[u64]) -> Result<Fixture, Box<dyn Error>> {
    let telemetry = Metrics::new()?;
    let store = StateStore::open(Arc::new(MemoryDocumentStore::new()), telemetry.clone()).await?;
    let engine = Arc::new(SimulatedEngine::with_rate(bytes_per_second));
    let source = SourceDescriptor::parse(&format!("magnet:?xt=urn:btih:{HASH}"))?;
    engine.register(
        &source,
        TransferMetadata {
            name: "fixture".to_string(),
            files: sizes
                .iter()
                .enumerate()
                .map(|(index, &size)| TransferFile {
                    index,
                    path: format!("part-{index}.bin"),
                    size,
                })
                .collect(),
        },
    );
    let supervisor = JobSupervisor::new(engine.clone(), store.clone(), telemetry);
    Ok(Fixture {
        supervisor,
        engine,
        store,
        source,
    })
}

fn request(source: &SourceDescriptor, selected: &[i64], sequential: bool) -> JobRequest {
    JobRequest {
        source: source.as_str().to_string(),
        destination: "/srv/downloads".to_string(),
        selected_indices: selected.to_vec(),
        sequential,
    }
}

async fn wait_for<F>(store: &StateStore, job_id: &str, done: F) -> Result<JobRecord, Box<dyn Error>>
where
    F: Fn(&JobRecord) -> bool,
{
    for _ in 0..2_000 {
        if let Some(record) = store.get_download(job_id).await
            && done(&record)
        {
            return Ok(record);
        }
        sleep(Duration::from_millis(50)).await;
    }
    Err(format!("job {job_id} never reached the expected state").into())
}

#[tokio::test(start_paused = true)]
async fn selected_files_complete_and_unselected_stay_empty() -> TestResult {
    let fx = fixture(250, &[400, 5_000, 600]).await?;
    let sink = Arc::new(RecordingSink::default());
    let job_id = fx
        .supervisor
        .start(request(&fx.source, &[0, 2], false), sink.clone())
        .await?;
    assert!(fx.supervisor.is_active(&job_id));

    let record = wait_for(&fx.store, &job_id, |record| record.status.is_terminal()).await?;
    assert_eq!(record.status, JobStatus::Completed);
    assert!((record.progress - 100.0).abs() < f64::EPSILON);
    assert_eq!(record.torrent_name, "fixture");
    assert_eq!(record.error_message, None);
    assert!(!fx.supervisor.is_active(&job_id));

    assert!(fx.supervisor.drain(Duration::from_secs(1)).await);
    let progress = sink.progress();
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(
        progress
            .last()
            .is_some_and(|last| (last - 100.0).abs() < f64::EPSILON)
    );
    let events = sink.events();
    assert!(events.contains(&Reported::Log("Completed".to_string())));
    assert_eq!(events.last(), Some(&Reported::Finished));
    assert!(!fx.engine.is_tracking(&fx.source));
    Ok(())
}

#[tokio::test]
async fn invalid_selection_fails_before_a_session_exists() -> TestResult {
    let fx = fixture(250, &[400, 600]).await?;
    for selected in [&[][..], &[0, 0][..], &[-1][..]] {
        let sink = Arc::new(RecordingSink::default());
        let err = fx
            .supervisor
            .start(request(&fx.source, selected, false), sink)
            .await;
        assert!(matches!(err, Err(JobError::InvalidArgument { .. })));
    }
    let bad_source = JobRequest {
        source: "not-a-magnet".to_string(),
        ..request(&fx.source, &[0], false)
    };
    let err = fx
        .supervisor
        .start(bad_source, Arc::new(RecordingSink::default()))
        .await;
    assert!(matches!(err, Err(JobError::InvalidArgument { .. })));

    assert_eq!(fx.supervisor.active_jobs(), 0);
    assert!(fx.store.all_downloads().await.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn out_of_range_selection_fails_the_job() -> TestResult {
    let fx = fixture(250, &[400, 5_000, 600]).await?;
    let job_id = fx
        .supervisor
        .start(
            request(&fx.source, &[0, 5], false),
            Arc::new(RecordingSink::default()),
        )
        .await?;
    let record = wait_for(&fx.store, &job_id, |record| record.status.is_terminal()).await?;
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(
        record.error_message.as_deref(),
        Some("invalid selected_indices: out_of_range: 5 (transfer has 3 files)")
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unresolved_metadata_times_out() -> TestResult {
    let fx = fixture(250, &[400]).await?;
    fx.engine.mark_unresolvable(&fx.source);
    let started = Instant::now();
    let job_id = fx
        .supervisor
        .start(
            request(&fx.source, &[0], false),
            Arc::new(RecordingSink::default()),
        )
        .await?;
    let record = wait_for(&fx.store, &job_id, |record| record.status.is_terminal()).await?;
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.error_message.as_deref(), Some(TIMEOUT_MESSAGE));
    assert!(started.elapsed() >= METADATA_TIMEOUT);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_reaches_a_live_job_within_one_interval() -> TestResult {
    let fx = fixture(100, &[1_000_000]).await?;
    let unknown = fx.supervisor.cancel("missing").await;
    assert!(matches!(
        unknown,
        Err(JobError::NotFound {
            last_status: None,
            ..
        })
    ));

    let job_id = fx
        .supervisor
        .start(
            request(&fx.source, &[0], false),
            Arc::new(RecordingSink::default()),
        )
        .await?;
    wait_for(&fx.store, &job_id, |record| {
        record.status == JobStatus::Downloading
    })
    .await?;

    let requested = Instant::now();
    fx.supervisor.cancel(&job_id).await?;
    let record = wait_for(&fx.store, &job_id, |record| record.status.is_terminal()).await?;
    assert!(requested.elapsed() < SAMPLE_INTERVAL);
    assert_eq!(record.status, JobStatus::Error);
    assert_eq!(record.error_message.as_deref(), Some(CANCELED_MESSAGE));

    let after = fx.supervisor.cancel(&job_id).await;
    assert!(matches!(
        after,
        Err(JobError::NotFound {
            last_status: Some(JobStatus::Error),
            ..
        })
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn pause_holds_sampling_until_resume() -> TestResult {
    let fx = fixture(100, &[10_000]).await?;
    let sink = Arc::new(RecordingSink::default());
    let job_id = fx
        .supervisor
        .start(request(&fx.source, &[0], false), sink.clone())
        .await?;
    wait_for(&fx.store, &job_id, |record| {
        record.status == JobStatus::Downloading
    })
    .await?;

    sleep(SAMPLE_INTERVAL + Duration::from_millis(500)).await;
    let before_pause = sink.progress().len();
    assert!(before_pause >= 1);

    fx.supervisor.pause(&job_id).await?;
    fx.supervisor.pause(&job_id).await?;
    let paused = fx.store.get_download(&job_id).await;
    assert_eq!(paused.map(|record| record.status), Some(JobStatus::Paused));

    sleep(SAMPLE_INTERVAL * 5).await;
    assert_eq!(sink.progress().len(), before_pause);

    fx.supervisor.resume(&job_id).await?;
    sleep(SAMPLE_INTERVAL).await;
    let progress = sink.progress();
    assert!(progress.len() > before_pause);
    let latest = progress.last().copied().unwrap_or_default();
    assert!(latest > 12.0, "sample after resume should include paused time: {latest}");

    let resumed = fx.store.get_download(&job_id).await;
    assert_eq!(
        resumed.map(|record| record.status),
        Some(JobStatus::Downloading)
    );

    fx.supervisor.cancel(&job_id).await?;
    assert!(fx.supervisor.drain(Duration::from_secs(1)).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn data_on_unselected_files_is_an_invariant_failure() -> TestResult {
    let fx = fixture(100, &[1_000, 1_000]).await?;
    let sink = Arc::new(RecordingSink::default());
    let job_id = fx
        .supervisor
        .start(request(&fx.source, &[0], false), sink.clone())
        .await?;
    wait_for(&fx.store, &job_id, |record| {
        record.status == JobStatus::Downloading
    })
    .await?;
    fx.engine.inject_completed(&fx.source, 1, 64);

    let record = wait_for(&fx.store, &job_id, |record| record.status.is_terminal()).await?;
    assert_eq!(record.status, JobStatus::Error);
    assert!(
        record
            .error_message
            .as_deref()
            .is_some_and(|message| message.starts_with("unselected files are being downloaded"))
    );
    assert!(fx.supervisor.drain(Duration::from_secs(1)).await);
    assert!(sink.progress().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sequential_mode_prioritises_first_selected_file() -> TestResult {
    let fx = fixture(10, &[1_000_000, 1_000_000, 1_000_000]).await?;
    let job_id = fx
        .supervisor
        .start(
            request(&fx.source, &[2, 0], true),
            Arc::new(RecordingSink::default()),
        )
        .await?;
    wait_for(&fx.store, &job_id, |record| {
        record.status == JobStatus::Downloading
    })
    .await?;

    assert_eq!(
        fx.engine.file_priority(&fx.source, 2).await?,
        FilePriority::Now
    );
    assert_eq!(
        fx.engine.file_priority(&fx.source, 0).await?,
        FilePriority::Normal
    );
    assert_eq!(
        fx.engine.file_priority(&fx.source, 1).await?,
        FilePriority::Skip
    );
    fx.supervisor.shutdown();
    assert!(fx.supervisor.drain(Duration::from_secs(1)).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn restart_reuses_the_persisted_record() -> TestResult {
    let fx = fixture(100, &[1_000_000]).await?;
    let job_request = request(&fx.source, &[0], false);
    let created_at = Utc::now();
    let mut record = JobRecord::pending("job-7", &JobSpec::from_request(&job_request)?, created_at);
    record.mark_downloading("fixture");
    record.record_sample(40.0, 0.0);
    fx.store.save_download(record.clone()).await;

    fx.supervisor
        .start_with_id(
            "job-7".to_string(),
            JobRequest::from_record(&record),
            Arc::new(RecordingSink::default()),
        )
        .await?;
    let duplicate = fx
        .supervisor
        .start_with_id(
            "job-7".to_string(),
            JobRequest::from_record(&record),
            Arc::new(RecordingSink::default()),
        )
        .await;
    assert!(matches!(duplicate, Err(JobError::InvalidArgument { .. })));

    let current = fx.store.get_download("job-7").await;
    assert_eq!(current.as_ref().map(|record| record.created_at), Some(created_at));
    assert!(current.is_some_and(|record| record.progress >= 40.0));

    fx.supervisor.shutdown();
    assert!(fx.supervisor.drain(Duration::from_secs(1)).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_keeps_interrupted_records_for_recovery() -> TestResult {
    let fx = fixture(100, &[1_000_000]).await?;
    let other = SourceDescriptor::parse(&format!("magnet:?xt=urn:btih:{}", "f".repeat(40)))?;
    let mut job_ids = Vec::new();
    for source in [&fx.source, &other, &other] {
        let job_id = fx
            .supervisor
            .start(
                request(source, &[0], false),
                Arc::new(RecordingSink::default()),
            )
            .await?;
        wait_for(&fx.store, &job_id, |record| {
            record.status == JobStatus::Downloading
        })
        .await?;
        job_ids.push(job_id);
    }
    let [running, paused, canceled] = job_ids.as_slice() else {
        return Err("expected three jobs".into());
    };
    fx.supervisor.pause(paused).await?;
    fx.supervisor.cancel(canceled).await?;

    fx.supervisor.shutdown();
    assert!(fx.supervisor.drain(Duration::from_secs(5)).await);
    assert_eq!(fx.supervisor.active_jobs(), 0);

    let running = fx.store.get_download(running).await.ok_or("record missing")?;
    assert_eq!(running.status, JobStatus::Downloading);
    assert_eq!(running.error_message, None);
    let paused = fx.store.get_download(paused).await.ok_or("record missing")?;
    assert_eq!(paused.status, JobStatus::Paused);
    let canceled = fx.store.get_download(canceled).await.ok_or("record missing")?;
    assert_eq!(canceled.error_message, Some(CANCELED_MESSAGE.to_string()));
    assert!(!fx.engine.is_tracking(&fx.source));
    assert!(!fx.engine.is_tracking(&other));

    let refused = fx
        .supervisor
        .start(
            request(&fx.source, &[0], false),
            Arc::new(RecordingSink::default()),
        )
        .await;
    assert!(matches!(refused, Err(JobError::Canceled { .. })));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn jobs_sharing_a_source_outlive_each_other() -> TestResult {
    let fx = fixture(100, &[1_000]).await?;
    let first = fx
        .supervisor
        .start(
            request(&fx.source, &[0], false),
            Arc::new(RecordingSink::default()),
        )
        .await?;
    let sink = Arc::new(RecordingSink::default());
    let second = fx
        .supervisor
        .start(request(&fx.source, &[0], false), sink.clone())
        .await?;
    for job_id in [&first, &second] {
        wait_for(&fx.store, job_id, |record| {
            record.status == JobStatus::Downloading
        })
        .await?;
    }
    assert_eq!(fx.engine.holders(&fx.source), 2);

    let rejected = fx
        .supervisor
        .start(
            request(&fx.source, &[5], false),
            Arc::new(RecordingSink::default()),
        )
        .await?;
    wait_for(&fx.store, &rejected, |record| {
        record.status == JobStatus::Error
    })
    .await?;
    assert_eq!(fx.engine.holders(&fx.source), 2);

    fx.supervisor.cancel(&first).await?;
    wait_for(&fx.store, &first, |record| record.status == JobStatus::Error).await?;
    assert_eq!(fx.engine.holders(&fx.source), 1);

    let record = wait_for(&fx.store, &second, |record| {
        record.status == JobStatus::Completed
    })
    .await?;
    assert_eq!(record.error_message, None);
    assert!(sink.progress().last().is_some_and(|&last| last >= 100.0));
    assert!(fx.supervisor.drain(Duration::from_secs(1)).await);
    assert!(!fx.engine.is_tracking(&fx.source));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deleted_records_are_not_resurrected() -> TestResult {
    let fx = fixture(100, &[1_000_000]).await?;
    let job_id = fx
        .supervisor
        .start(
            request(&fx.source, &[0], false),
            Arc::new(RecordingSink::default()),
        )
        .await?;
    fx.supervisor.cancel(&job_id).await?;
    fx.store.delete_download(&job_id).await?;
    assert!(fx.supervisor.drain(Duration::from_secs(1)).await);
    assert!(fx.store.get_download(&job_id).await.is_none());
    Ok(())
}
