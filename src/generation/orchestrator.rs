use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{TimelineError, TimelineResult};
use crate::models::{GenerationJob, GenerationMode, GenerationStep, TimelineEvent};
use crate::settings::SettingsStore;
use crate::store::TimelineStore;
use crate::timeline::{PointSource, SegmentDetector};

use super::jobs::JobTracker;
use super::lock::{UserLockGuard, UserLocks};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Streaming progress is written to the job every this many points.
const PROGRESS_EVERY_POINTS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationReport {
    pub job_id: Uuid,
    pub user_id: String,
    pub mode: GenerationMode,
    /// `None` for a full scan.
    pub resumed_from: Option<DateTime<Utc>>,
    pub points_consumed: u64,
    pub stays: usize,
    pub trips: usize,
    pub data_gaps: usize,
}

/// Runs generation for one user at a time per user: lock, stream and
/// segment, classify and merge, persist, release.
#[derive(Clone)]
pub struct TimelineGenerator {
    store: Arc<dyn TimelineStore>,
    settings: Arc<SettingsStore>,
    locks: UserLocks,
    jobs: JobTracker,
    buffer_size: usize,
}

impl TimelineGenerator {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        settings: Arc<SettingsStore>,
        jobs: JobTracker,
        buffer_size: usize,
    ) -> Self {
        Self {
            store,
            settings,
            locks: UserLocks::new(),
            jobs,
            buffer_size,
        }
    }

    pub fn store(&self) -> &Arc<dyn TimelineStore> {
        &self.store
    }

    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn get_job(&self, job_id: Uuid) -> TimelineResult<GenerationJob> {
        self.jobs.get(job_id)
    }

    /// Run to completion. Fails with `GenerationInProgress`, without
    /// creating a job, when the user is already being processed.
    pub async fn generate(
        &self,
        user_id: &str,
        mode: GenerationMode,
    ) -> TimelineResult<GenerationReport> {
        let guard = self.locks.try_acquire(user_id)?;
        let job_id = self.jobs.create(user_id, mode);
        self.run_locked(guard, job_id, mode).await
    }

    /// Start a run in the background and return its job id. The lock is
    /// taken before returning, so a concurrent caller fails fast.
    pub fn spawn(&self, user_id: &str, mode: GenerationMode) -> TimelineResult<Uuid> {
        let guard = self.locks.try_acquire(user_id)?;
        let job_id = self.jobs.create(user_id, mode);

        let generator = self.clone();
        tokio::spawn(async move {
            let _ = generator.run_locked(guard, job_id, mode).await;
        });
        Ok(job_id)
    }

    async fn run_locked(
        &self,
        guard: UserLockGuard,
        job_id: Uuid,
        mode: GenerationMode,
    ) -> TimelineResult<GenerationReport> {
        let user_id = guard.user_id().to_string();

        self.jobs.start(job_id);
        self.jobs.advance(
            job_id,
            GenerationStep::AcquireLock,
            json!({ "userId": user_id, "mode": mode.as_str() }),
        );

        // a panicking run must still fail its job and release the lock
        let generator = self.clone();
        let task_user = user_id.clone();
        let result = tokio::spawn(async move { generator.execute(&task_user, job_id, mode).await })
            .await
            .unwrap_or_else(|join_err| {
                Err(TimelineError::SegmentationInvariantViolation(format!(
                    "generation run aborted: {join_err}"
                )))
            });
        drop(guard);

        match &result {
            Ok(report) => {
                self.jobs.advance(job_id, GenerationStep::ReleaseLock, json!({}));
                self.jobs.complete(job_id);
                log_info!(
                    "{} generation for user {} done: {} stays, {} trips, {} gaps from {} points",
                    mode.as_str(),
                    user_id,
                    report.stays,
                    report.trips,
                    report.data_gaps,
                    report.points_consumed
                );
            }
            Err(err) => {
                self.jobs.fail(job_id, err.to_string());
                log_error!("{} generation for user {} failed: {}", mode.as_str(), user_id, err);
            }
        }
        result
    }

    async fn execute(
        &self,
        user_id: &str,
        job_id: Uuid,
        mode: GenerationMode,
    ) -> TimelineResult<GenerationReport> {
        let config = self.settings.resolve_config(user_id)?;

        let resumed_from = match mode {
            GenerationMode::Full => None,
            GenerationMode::Incremental => self
                .store
                .resume_timestamp(user_id)
                .await
                .map_err(TimelineError::storage)?,
        };
        let from = resumed_from.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        self.jobs.advance(
            job_id,
            GenerationStep::StreamAndSegment,
            json!({ "from": from, "bufferSize": self.buffer_size }),
        );

        let mut source = PointSource::new(self.store.clone(), user_id, from, self.buffer_size)?;
        let mut detector = SegmentDetector::new(&config)?;
        while let Some(point) = source.next_point().await? {
            detector.push(point);
            if source.consumed() % PROGRESS_EVERY_POINTS == 0 {
                self.jobs
                    .record_detail(job_id, "pointsConsumed", json!(source.consumed()));
            }
        }

        let detector_stats = detector.stats().clone();
        let raw = detector.finish()?;

        self.jobs.advance(
            job_id,
            GenerationStep::ClassifyAndMerge,
            json!({
                "pointsConsumed": source.consumed(),
                "pointsDropped": source.dropped(),
                "chunksFetched": source.chunks_fetched(),
                "peakBuffered": source.peak_buffered(),
                "detector": detector_stats,
                "rawEvents": raw.len(),
            }),
        );

        let events = config.trip_algorithm.apply(user_id, raw, &config)?;

        self.jobs.advance(
            job_id,
            GenerationStep::Persist,
            json!({ "events": events.len() }),
        );

        let persisted = match resumed_from {
            Some(from) => self.store.append_timeline_events(user_id, &events, from).await,
            None => self.store.replace_timeline_events(user_id, &events).await,
        };
        persisted.map_err(TimelineError::storage)?;

        Ok(GenerationReport {
            job_id,
            user_id: user_id.to_string(),
            mode,
            resumed_from,
            points_consumed: source.consumed(),
            stays: count(&events, |e| e.as_stay().is_some()),
            trips: count(&events, |e| e.as_trip().is_some()),
            data_gaps: count(&events, TimelineEvent::is_gap),
        })
    }
}

fn count(events: &[TimelineEvent], predicate: impl Fn(&TimelineEvent) -> bool) -> usize {
    events.iter().filter(|e| predicate(e)).count()
}
