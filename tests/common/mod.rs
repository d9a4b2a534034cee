#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use timeline_engine_lib::generation::{JobTracker, TimelineGenerator};
use timeline_engine_lib::models::{GenerationJob, GpsPoint, TimelineEvent};
use timeline_engine_lib::settings::SettingsStore;
use timeline_engine_lib::store::TimelineStore;
use timeline_engine_lib::timeline::TimelineConfig;

pub const METERS_PER_DEGREE_LAT: f64 = 111_195.0;
pub const HOME_LAT: f64 = 52.52;
pub const HOME_LON: f64 = 13.405;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 11, 6, 0, 0).unwrap()
}

pub fn at_minute(minute: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minute)
}

/// Fix `north_m` meters north of home, `minute` minutes after `t0`.
pub fn fix(minute: i64, north_m: f64) -> GpsPoint {
    GpsPoint::new(
        at_minute(minute),
        HOME_LAT + north_m / METERS_PER_DEGREE_LAT,
        HOME_LON,
    )
    .with_source("phone")
}

/// Fixes every `step` minutes over [from, to] at one spot.
pub fn dwell(from: i64, to: i64, step: i64, north_m: f64) -> Vec<GpsPoint> {
    (from..=to)
        .step_by(step as usize)
        .map(|m| fix(m, north_m))
        .collect()
}

/// One fix per minute starting at `from`, moving `step_m` north each minute.
pub fn walk(from: i64, count: usize, start_north_m: f64, step_m: f64) -> Vec<GpsPoint> {
    (0..count)
        .map(|i| fix(from + i as i64, start_north_m + step_m * i as f64))
        .collect()
}

#[derive(Default)]
pub struct FakeStore {
    points: Mutex<HashMap<String, Vec<GpsPoint>>>,
    events: Mutex<HashMap<String, Vec<TimelineEvent>>>,
    failing_users: Mutex<HashSet<String>>,
    fail_persist: AtomicBool,
    panic_on_read: AtomicBool,
    fetch_calls: AtomicUsize,
    largest_limit: AtomicUsize,
    fetch_blocked: AtomicBool,
    fetch_entered: Notify,
    fetch_release: Notify,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_points(&self, user_id: &str, points: Vec<GpsPoint>) {
        let mut all = self.points.lock().unwrap();
        let entry = all.entry(user_id.to_string()).or_default();
        entry.extend(points);
        entry.sort_by_key(|p| p.timestamp);
    }

    pub fn stored_events(&self, user_id: &str) -> Vec<TimelineEvent> {
        self.events
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_reads_for(&self, user_id: &str) {
        self.failing_users.lock().unwrap().insert(user_id.to_string());
    }

    pub fn set_fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    /// Make every fetch panic, as a crashing reader would.
    pub fn set_panic_on_read(&self, panic: bool) {
        self.panic_on_read.store(panic, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn largest_limit(&self) -> usize {
        self.largest_limit.load(Ordering::SeqCst)
    }

    /// Park the next fetch until `unblock_fetches`.
    pub fn block_fetches(&self) {
        self.fetch_blocked.store(true, Ordering::SeqCst);
    }

    pub async fn wait_for_blocked_fetch(&self) {
        self.fetch_entered.notified().await;
    }

    pub fn unblock_fetches(&self) {
        self.fetch_blocked.store(false, Ordering::SeqCst);
        self.fetch_release.notify_one();
    }
}

#[async_trait]
impl TimelineStore for FakeStore {
    async fn fetch_chunk(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<GpsPoint>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.largest_limit.fetch_max(limit, Ordering::SeqCst);

        if self.fetch_blocked.load(Ordering::SeqCst) {
            self.fetch_entered.notify_one();
            self.fetch_release.notified().await;
        }
        if self.panic_on_read.load(Ordering::SeqCst) {
            panic!("point reader crashed for {user_id}");
        }
        if self.failing_users.lock().unwrap().contains(user_id) {
            bail!("connection reset while reading points of {user_id}");
        }

        let all = self.points.lock().unwrap();
        Ok(all
            .get(user_id)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp >= from)
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn replace_timeline_events(&self, user_id: &str, events: &[TimelineEvent]) -> Result<()> {
        if self.fail_persist.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        self.events
            .lock()
            .unwrap()
            .insert(user_id.to_string(), events.to_vec());
        Ok(())
    }

    async fn append_timeline_events(
        &self,
        user_id: &str,
        events: &[TimelineEvent],
        from: DateTime<Utc>,
    ) -> Result<()> {
        if self.fail_persist.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        let mut all = self.events.lock().unwrap();
        let stored = all.entry(user_id.to_string()).or_default();
        stored.retain(|e| e.start() < from);
        stored.extend(events.iter().cloned());
        stored.sort_by_key(|e| e.start());
        Ok(())
    }

    async fn resume_timestamp(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        let all = self.events.lock().unwrap();
        let Some(events) = all.get(user_id) else {
            return Ok(None);
        };
        let latest_stay = events
            .iter()
            .filter(|e| e.as_stay().is_some())
            .map(TimelineEvent::start)
            .max();
        Ok(latest_stay.or_else(|| events.iter().map(TimelineEvent::start).max()))
    }

    async fn timeline_events(&self, user_id: &str) -> Result<Vec<TimelineEvent>> {
        Ok(self.stored_events(user_id))
    }

    async fn user_ids(&self) -> Result<Vec<String>> {
        let mut users: Vec<String> = self.points.lock().unwrap().keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

pub fn generator_over(store: Arc<FakeStore>, buffer_size: usize) -> TimelineGenerator {
    generator_with(store, TimelineConfig::default(), buffer_size)
}

pub fn generator_with(
    store: Arc<FakeStore>,
    defaults: TimelineConfig,
    buffer_size: usize,
) -> TimelineGenerator {
    let settings = Arc::new(SettingsStore::in_memory(defaults));
    TimelineGenerator::new(store, settings, JobTracker::new(Duration::hours(1)), buffer_size)
}

/// Poll until the job reaches a terminal status.
pub async fn wait_for_job(generator: &TimelineGenerator, job_id: Uuid) -> GenerationJob {
    for _ in 0..500 {
        let job = generator.get_job(job_id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish in time");
}

pub fn kinds(events: &[TimelineEvent]) -> Vec<&'static str> {
    events.iter().map(TimelineEvent::kind).collect()
}
