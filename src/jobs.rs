//! Job scheduling: an in-memory job table plus a bounded render worker pool.
//!
//! The table is the single source of truth for job state. Admission is FIFO,
//! concurrency is capped by a semaphore sized to leave one core free, and
//! terminal states (completed, failed, cancelled) are final.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, Semaphore};

use crate::config::RenderSettings;
use crate::render::{self, RenderOutcome};
use crate::types::{JobState, MixPlan, RenderJob};

#[derive(Debug)]
pub enum SubmitError {
    /// Queued (not yet running) jobs already at the configured limit.
    QueueFull { limit: usize },
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull { limit } => {
                write!(f, "render queue is full ({limit} queued jobs)")
            }
        }
    }
}

struct JobEntry {
    job: RenderJob,
    /// Submission order, for stable listing.
    seq: u64,
    cancel_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
}

/// A submitted render waiting for the dispatcher to grant it a slot.
struct QueuedRender {
    id: String,
    plan: MixPlan,
    cancel_rx: watch::Receiver<bool>,
}

/// Result of a cancel request for a known job.
#[derive(Debug)]
pub enum CancelOutcome {
    /// The cancel took effect; snapshot of the resulting terminal state.
    Cancelled(RenderJob),
    /// The job was already terminal; unchanged snapshot.
    AlreadyTerminal(RenderJob),
}

impl CancelOutcome {
    pub fn already_terminal(&self) -> bool {
        matches!(self, Self::AlreadyTerminal(_))
    }

    pub fn into_job(self) -> RenderJob {
        match self {
            Self::Cancelled(job) | Self::AlreadyTerminal(job) => job,
        }
    }
}

pub struct JobScheduler {
    settings: RenderSettings,
    queue_tx: mpsc::UnboundedSender<QueuedRender>,
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    next_seq: AtomicU64,
}

impl JobScheduler {
    /// Must be called from within a tokio runtime: the scheduler spawns its
    /// dispatcher task here.
    pub fn new(settings: RenderSettings) -> Self {
        let slots = settings.worker_slots();
        tracing::info!(
            slots,
            max_workers = settings.max_workers,
            "render worker pool sized"
        );
        let jobs = Arc::new(Mutex::new(HashMap::new()));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(
            queue_rx,
            Arc::new(Semaphore::new(slots)),
            Arc::clone(&jobs),
            settings.clone(),
        ));
        Self {
            settings,
            queue_tx,
            jobs,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Admit a job and return its initial (queued) snapshot. The render runs
    /// on the worker pool; submission itself never blocks on a slot.
    pub fn submit(&self, plan: MixPlan) -> Result<RenderJob, SubmitError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("job-{seq}");
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);
        let job = RenderJob::new(id.clone(), plan.clone());

        {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(limit) = self.settings.queue_limit {
                let queued = jobs
                    .values()
                    .filter(|e| e.job.state == JobState::Queued)
                    .count();
                if queued >= limit {
                    return Err(SubmitError::QueueFull { limit });
                }
            }
            jobs.insert(
                id.clone(),
                JobEntry {
                    job: job.clone(),
                    seq,
                    cancel_tx,
                    done_tx,
                },
            );
        }
        tracing::info!(job_id = %id, tracks = plan.tracks.len(), "render job queued");

        // Fails only when the dispatcher is gone, i.e. runtime shutdown.
        if self
            .queue_tx
            .send(QueuedRender { id, plan, cancel_rx })
            .is_err()
        {
            tracing::error!("render dispatcher is not running; job will never start");
        }

        Ok(job)
    }

    pub fn get(&self, id: &str) -> Option<RenderJob> {
        self.jobs.lock().unwrap().get(id).map(|e| e.job.clone())
    }

    /// All jobs in submission order.
    pub fn list(&self) -> Vec<RenderJob> {
        let jobs = self.jobs.lock().unwrap();
        let mut entries: Vec<_> = jobs.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.iter().map(|e| e.job.clone()).collect()
    }

    /// Cancel a job. Returns only after the job is in a terminal state and
    /// its worker slot (if any) has been released. Idempotent: cancelling a
    /// terminal job reports `AlreadyTerminal` with the unchanged snapshot.
    pub async fn cancel(&self, id: &str) -> Option<CancelOutcome> {
        let mut done_rx = {
            let mut jobs = self.jobs.lock().unwrap();
            let entry = jobs.get_mut(id)?;
            if entry.job.state.is_terminal() {
                return Some(CancelOutcome::AlreadyTerminal(entry.job.clone()));
            }
            if entry.job.state == JobState::Queued {
                // Never ran; no child process to reap.
                entry.job.state = JobState::Cancelled;
                let _ = entry.cancel_tx.send(true);
                let _ = entry.done_tx.send(true);
                tracing::info!(job_id = id, "queued job cancelled");
                return Some(CancelOutcome::Cancelled(entry.job.clone()));
            }
            let _ = entry.cancel_tx.send(true);
            entry.done_tx.subscribe()
        };
        while !*done_rx.borrow() {
            if done_rx.changed().await.is_err() {
                break;
            }
        }
        self.get(id).map(CancelOutcome::Cancelled)
    }

    /// Wait for a job to reach a terminal state and return its snapshot.
    pub async fn wait_terminal(&self, id: &str) -> Option<RenderJob> {
        let mut done_rx = {
            let jobs = self.jobs.lock().unwrap();
            let entry = jobs.get(id)?;
            if entry.job.state.is_terminal() {
                return Some(entry.job.clone());
            }
            entry.done_tx.subscribe()
        };
        while !*done_rx.borrow() {
            if done_rx.changed().await.is_err() {
                break;
            }
        }
        self.get(id)
    }
}

/// Grants worker slots strictly in submission order. A single dispatcher
/// draining one queue is what makes admission FIFO; independent `acquire()`
/// calls racing on the semaphore would not preserve it.
async fn dispatch(
    mut queue_rx: mpsc::UnboundedReceiver<QueuedRender>,
    semaphore: Arc<Semaphore>,
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    settings: RenderSettings,
) {
    while let Some(next) = queue_rx.recv().await {
        // Closed semaphore is unreachable; treat it as shutdown.
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            return;
        };
        let jobs = Arc::clone(&jobs);
        let settings = settings.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_job(jobs, settings, next.id, next.plan, next.cancel_rx).await;
        });
    }
}

async fn run_job(
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    settings: RenderSettings,
    id: String,
    plan: MixPlan,
    cancel_rx: watch::Receiver<bool>,
) {
    // The job may have been cancelled while waiting for a slot.
    {
        let mut jobs = jobs.lock().unwrap();
        let Some(entry) = jobs.get_mut(&id) else { return };
        if entry.job.state.is_terminal() {
            return;
        }
        entry.job.state = JobState::Running;
    }
    tracing::info!(job_id = %id, "render started");

    let progress_jobs = Arc::clone(&jobs);
    let progress_id = id.clone();
    let outcome = render::run(&settings, &id, &plan, cancel_rx, move |percent| {
        let mut jobs = progress_jobs.lock().unwrap();
        if let Some(entry) = jobs.get_mut(&progress_id) {
            if entry.job.state == JobState::Running && percent > entry.job.progress_percent {
                entry.job.progress_percent = percent;
            }
        }
    })
    .await;

    let mut jobs = jobs.lock().unwrap();
    let Some(entry) = jobs.get_mut(&id) else { return };
    if !entry.job.state.is_terminal() {
        match outcome {
            RenderOutcome::Completed(artifact) => {
                entry.job.state = JobState::Completed;
                entry.job.progress_percent = 100;
                entry.job.artifact_ref = Some(artifact);
                tracing::info!(job_id = %id, "render completed");
            }
            RenderOutcome::Failed(detail) => {
                entry.job.state = JobState::Failed;
                tracing::warn!(job_id = %id, reason = detail.reason.as_str(), "render failed");
                entry.job.error_detail = Some(detail);
            }
            RenderOutcome::Cancelled => {
                entry.job.state = JobState::Cancelled;
                tracing::info!(job_id = %id, "render cancelled");
            }
        }
    }
    let _ = entry.done_tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::types::{FailureReason, Track};

    fn test_plan() -> MixPlan {
        MixPlan {
            tracks: vec![Track {
                id: "t1".to_string(),
                title: "Only".to_string(),
                artist: "Artist".to_string(),
                genre: "Techno".to_string(),
                duration_secs: 300.0,
                tag_bpm: Some(128.0),
                analysis_bpm: None,
                tag_key: "8A".to_string(),
                analysis_key: None,
                energy: None,
                spectral_profile: None,
            }],
            transitions: vec![],
            annotations: vec![],
        }
    }

    fn scheduler_with_script(dir: &tempfile::TempDir, body: &str) -> JobScheduler {
        use std::os::unix::fs::PermissionsExt;
        let script_path = dir.path().join("fake-renderer.sh");
        std::fs::write(&script_path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
        JobScheduler::new(RenderSettings {
            renderer_cmd: script_path.to_string_lossy().to_string(),
            output_dir: dir.path().join("out"),
            render_timeout: Duration::from_secs(10),
            max_workers: 1,
            queue_limit: None,
            ..RenderSettings::default()
        })
    }

    async fn wait_for_state(scheduler: &JobScheduler, id: &str, state: JobState) {
        for _ in 0..500 {
            if scheduler.get(id).map(|j| j.state) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {state:?}");
    }

    #[tokio::test]
    async fn job_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler =
            scheduler_with_script(&dir, "echo 'progress 1/1'\necho 'artifact /tmp/mix.flac'");

        let job = scheduler.submit(test_plan()).unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.progress_percent, 0);

        let done = scheduler.wait_terminal(&job.id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress_percent, 100);
        assert_eq!(done.artifact_ref.as_deref(), Some("/tmp/mix.flac"));
        assert!(done.error_detail.is_none());
    }

    #[tokio::test]
    async fn failed_render_keeps_the_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with_script(&dir, "echo 'bad plan' >&2\nexit 1");

        let job = scheduler.submit(test_plan()).unwrap();
        let done = scheduler.wait_terminal(&job.id).await.unwrap();
        assert_eq!(done.state, JobState::Failed);
        let detail = done.error_detail.expect("failed job carries error detail");
        assert_eq!(detail.reason, FailureReason::RenderFailure);
        assert!(detail.message.contains("bad plan"));
        assert!(done.artifact_ref.is_none());
    }

    #[tokio::test]
    async fn single_slot_pool_keeps_excess_jobs_queued() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with_script(&dir, "sleep 30");

        let first = scheduler.submit(test_plan()).unwrap();
        let second = scheduler.submit(test_plan()).unwrap();
        wait_for_state(&scheduler, &first.id, JobState::Running).await;

        // With one slot the second job must still be waiting.
        assert_eq!(scheduler.get(&second.id).unwrap().state, JobState::Queued);

        scheduler.cancel(&first.id).await;
        scheduler.cancel(&second.id).await;
    }

    #[tokio::test]
    async fn queue_limit_rejects_excess_submissions() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler_with_script(&dir, "sleep 30");
        scheduler.settings.queue_limit = Some(2);

        let first = scheduler.submit(test_plan()).unwrap();
        wait_for_state(&scheduler, &first.id, JobState::Running).await;

        let second = scheduler.submit(test_plan()).unwrap();
        let third = scheduler.submit(test_plan()).unwrap();
        let rejected = scheduler.submit(test_plan());
        assert!(matches!(
            rejected,
            Err(SubmitError::QueueFull { limit: 2 })
        ));

        for id in [&first.id, &second.id, &third.id] {
            scheduler.cancel(id).await;
        }
    }

    #[tokio::test]
    async fn cancelling_a_running_job_returns_after_terminal_state() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with_script(&dir, "sleep 30");

        let job = scheduler.submit(test_plan()).unwrap();
        wait_for_state(&scheduler, &job.id, JobState::Running).await;

        let outcome = scheduler.cancel(&job.id).await.unwrap();
        assert!(!outcome.already_terminal());
        assert_eq!(outcome.into_job().state, JobState::Cancelled);
        // The table agrees after cancel returns, with no transient state.
        assert_eq!(scheduler.get(&job.id).unwrap().state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn cancelling_a_running_job_frees_its_slot() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with_script(&dir, "sleep 30");

        let first = scheduler.submit(test_plan()).unwrap();
        let second = scheduler.submit(test_plan()).unwrap();
        wait_for_state(&scheduler, &first.id, JobState::Running).await;
        assert_eq!(scheduler.get(&second.id).unwrap().state, JobState::Queued);

        scheduler.cancel(&first.id).await;
        // The freed slot must go to the queued successor.
        wait_for_state(&scheduler, &second.id, JobState::Running).await;

        scheduler.cancel(&second.id).await;
    }

    #[tokio::test]
    async fn queued_jobs_start_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with_script(&dir, "sleep 30");

        let blocker = scheduler.submit(test_plan()).unwrap();
        wait_for_state(&scheduler, &blocker.id, JobState::Running).await;
        let older = scheduler.submit(test_plan()).unwrap();
        let newer = scheduler.submit(test_plan()).unwrap();

        scheduler.cancel(&blocker.id).await;
        wait_for_state(&scheduler, &older.id, JobState::Running).await;
        // The single slot went to the earlier submission; the later one is
        // still waiting its turn.
        assert_eq!(scheduler.get(&newer.id).unwrap().state, JobState::Queued);

        scheduler.cancel(&older.id).await;
        wait_for_state(&scheduler, &newer.id, JobState::Running).await;
        scheduler.cancel(&newer.id).await;
    }

    #[tokio::test]
    async fn cancelling_a_queued_job_frees_its_queue_entry() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with_script(&dir, "sleep 30");

        let running = scheduler.submit(test_plan()).unwrap();
        wait_for_state(&scheduler, &running.id, JobState::Running).await;
        let queued = scheduler.submit(test_plan()).unwrap();

        let cancelled = scheduler.cancel(&queued.id).await.unwrap().into_job();
        assert_eq!(cancelled.state, JobState::Cancelled);
        assert_eq!(cancelled.progress_percent, 0);

        scheduler.cancel(&running.id).await;
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_unknown_ids_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler =
            scheduler_with_script(&dir, "echo 'artifact /tmp/mix.flac'");

        let job = scheduler.submit(test_plan()).unwrap();
        let done = scheduler.wait_terminal(&job.id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);

        // Cancel after completion must not clobber the terminal state.
        let after = scheduler.cancel(&job.id).await.unwrap();
        assert!(after.already_terminal());
        let after = after.into_job();
        assert_eq!(after.state, JobState::Completed);
        assert_eq!(after.artifact_ref.as_deref(), Some("/tmp/mix.flac"));

        assert!(scheduler.cancel("job-999").await.is_none());
        assert!(scheduler.get("job-999").is_none());
    }

    #[tokio::test]
    async fn list_returns_jobs_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler =
            scheduler_with_script(&dir, "echo 'artifact /tmp/mix.flac'");

        let a = scheduler.submit(test_plan()).unwrap();
        let b = scheduler.submit(test_plan()).unwrap();
        let c = scheduler.submit(test_plan()).unwrap();

        let ids: Vec<String> = scheduler.list().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone(), c.id.clone()]);

        for id in [&a.id, &b.id, &c.id] {
            scheduler.wait_terminal(id).await;
        }
    }
}
