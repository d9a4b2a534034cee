//! In-memory registry of generation jobs.
//!
//! Each job sits behind its own mutex so updates to one job never wait
//! on another. Finished jobs are swept once they are older than the
//! retention window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{TimelineError, TimelineResult};
use crate::models::{GenerationJob, GenerationMode, GenerationStep, JobStatus};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

type JobEntry = Arc<Mutex<GenerationJob>>;

fn lock_job(entry: &JobEntry) -> MutexGuard<'_, GenerationJob> {
    match entry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Sweeper {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
    retention: Duration,
    sweeper: Arc<tokio::sync::Mutex<Option<Sweeper>>>,
}

impl JobTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention,
            sweeper: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn entry(&self, id: Uuid) -> Option<JobEntry> {
        let jobs = match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        jobs.get(&id).cloned()
    }

    /// Apply `f` to the job; `false` if the job is unknown (e.g. swept).
    fn update<F>(&self, id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut GenerationJob),
    {
        match self.entry(id) {
            Some(entry) => {
                f(&mut lock_job(&entry));
                true
            }
            None => false,
        }
    }

    pub fn create(&self, user_id: &str, mode: GenerationMode) -> Uuid {
        let job = GenerationJob::new(user_id, mode, Utc::now());
        let id = job.id;

        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        jobs.insert(id, Arc::new(Mutex::new(job)));
        id
    }

    pub fn start(&self, id: Uuid) {
        self.update(id, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        });
    }

    /// Move to `step` and merge `details` (a JSON object) into the job.
    pub fn advance(&self, id: Uuid, step: GenerationStep, details: Value) {
        self.update(id, |job| {
            job.step_index = step.index();
            job.step_name = Some(step.name().to_string());
            job.percentage = step.percentage();
            merge_details(job, details);
        });
        log_debug!("job {} -> {}", id, step.name());
    }

    pub fn record_detail(&self, id: Uuid, key: &str, value: Value) {
        self.update(id, |job| {
            job.details.insert(key.to_string(), value);
        });
    }

    pub fn complete(&self, id: Uuid) {
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.percentage = 100;
            job.finished_at = Some(Utc::now());
        });
    }

    pub fn fail(&self, id: Uuid, message: String) {
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(message);
            job.finished_at = Some(Utc::now());
        });
    }

    /// Snapshot of the job.
    pub fn get(&self, id: Uuid) -> TimelineResult<GenerationJob> {
        self.entry(id)
            .map(|entry| lock_job(&entry).clone())
            .ok_or(TimelineError::JobNotFound(id))
    }

    pub fn jobs_for_user(&self, user_id: &str) -> Vec<GenerationJob> {
        let entries: Vec<JobEntry> = match self.jobs.read() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        let mut jobs: Vec<GenerationJob> = entries
            .iter()
            .map(|entry| lock_job(entry).clone())
            .filter(|job| job.user_id == user_id)
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn len(&self) -> usize {
        match self.jobs.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop finished jobs older than the retention window. Returns how many went.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        // a retention reaching before the earliest representable instant keeps everything
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return 0;
        };
        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let before = jobs.len();
        jobs.retain(|_, entry| {
            let job = lock_job(entry);
            !(job.status.is_terminal() && job.finished_at.is_some_and(|at| at < cutoff))
        });
        before - jobs.len()
    }

    pub async fn start_sweeper(&self, every: StdDuration) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let tracker = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = tracker.sweep(Utc::now());
                        if removed > 0 {
                            log_info!("swept {} finished generation jobs", removed);
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        *sweeper = Some(Sweeper {
            handle,
            cancel_token,
        });
    }

    pub async fn stop_sweeper(&self) {
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.cancel_token.cancel();
            let _ = sweeper.handle.await;
        }
    }
}

fn merge_details(job: &mut GenerationJob, details: Value) {
    match details {
        Value::Object(map) => job.details.extend(map),
        Value::Null => {}
        other => {
            job.details.insert("info".to_string(), other);
        }
    }
}
