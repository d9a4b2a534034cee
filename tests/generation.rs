mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::Semaphore;

use common::{at_minute, dwell, generator_over, generator_with, kinds, wait_for_job, walk, FakeStore};
use timeline_engine_lib::error::TimelineError;
use timeline_engine_lib::generation::{
    run_realtime_tick, JobTracker, RealtimeScheduler, TimelineGenerator,
};
use timeline_engine_lib::models::{GenerationMode, JobStatus};
use timeline_engine_lib::service::{ServiceConfig, TimelineService};
use timeline_engine_lib::settings::SettingsStore;
use timeline_engine_lib::timeline::{TimelineConfig, TimelineConfigOverrides};

fn home_walk_office(store: &FakeStore, user_id: &str) {
    store.add_points(user_id, dwell(0, 30, 1, 0.0));
    store.add_points(user_id, walk(31, 10, 100.0, 100.0));
    store.add_points(user_id, dwell(41, 70, 1, 1000.0));
}

fn office_walk_gym(store: &FakeStore, user_id: &str) {
    store.add_points(user_id, walk(71, 10, 1100.0, 100.0));
    store.add_points(user_id, dwell(81, 110, 1, 2000.0));
}

#[tokio::test]
async fn full_generation_persists_the_timeline() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    let generator = generator_over(store.clone(), 16);

    let report = generator.generate("alice", GenerationMode::Full).await.unwrap();
    assert_eq!(report.points_consumed, 71);
    assert_eq!(report.resumed_from, None);
    assert_eq!((report.stays, report.trips, report.data_gaps), (2, 1, 0));

    let events = store.stored_events("alice");
    assert_eq!(kinds(&events), vec!["stay", "trip", "stay"]);
    assert_eq!(events[0].start(), at_minute(0));
    assert_eq!(events[1].start(), at_minute(30));
    assert_eq!(events[2].start(), at_minute(40));
    assert_eq!(events[2].end(), at_minute(70));

    let job = generator.get_job(report.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.percentage, 100);
    assert_eq!(job.step_name.as_deref(), Some("RELEASE_LOCK"));
    assert!(!generator.locks().is_locked("alice"));
}

#[tokio::test]
async fn incremental_run_matches_a_full_rebuild() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    let generator = generator_over(store.clone(), 16);
    generator.generate("alice", GenerationMode::Full).await.unwrap();

    office_walk_gym(&store, "alice");
    let report = generator
        .generate("alice", GenerationMode::Incremental)
        .await
        .unwrap();
    // resumes at the last stay, so only its points and the new ones are read
    assert_eq!(report.resumed_from, Some(at_minute(40)));
    assert_eq!(report.points_consumed, 71);

    let rebuilt = FakeStore::new();
    home_walk_office(&rebuilt, "alice");
    office_walk_gym(&rebuilt, "alice");
    generator_over(rebuilt.clone(), 16)
        .generate("alice", GenerationMode::Full)
        .await
        .unwrap();

    let incremental = store.stored_events("alice");
    assert_eq!(kinds(&incremental), vec!["stay", "trip", "stay", "trip", "stay"]);
    assert_eq!(incremental, rebuilt.stored_events("alice"));
}

#[tokio::test]
async fn incremental_without_history_scans_everything() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    let generator = generator_over(store.clone(), 16);

    let report = generator
        .generate("alice", GenerationMode::Incremental)
        .await
        .unwrap();
    assert_eq!(report.resumed_from, None);
    assert_eq!(report.points_consumed, 71);
    assert_eq!(store.stored_events("alice").len(), 3);
}

#[tokio::test]
async fn second_request_for_a_busy_user_is_rejected() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    store.add_points("bob", dwell(0, 30, 1, 0.0));
    let generator = generator_over(store.clone(), 16);

    store.block_fetches();
    let job_id = generator.spawn("alice", GenerationMode::Full).unwrap();
    store.wait_for_blocked_fetch().await;

    assert!(generator.locks().is_locked("alice"));
    let err = generator
        .generate("alice", GenerationMode::Incremental)
        .await
        .unwrap_err();
    assert_eq!(err, TimelineError::GenerationInProgress("alice".to_string()));
    assert!(generator.spawn("alice", GenerationMode::Full).unwrap_err().is_in_progress());
    // the rejected requests never became jobs
    assert_eq!(generator.jobs().jobs_for_user("alice").len(), 1);

    store.unblock_fetches();
    // other users are not held up by alice's lock
    generator.generate("bob", GenerationMode::Full).await.unwrap();

    let job = wait_for_job(&generator, job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(!generator.locks().is_locked("alice"));
    assert_eq!(generator.locks().active_count(), 0);
}

#[tokio::test]
async fn failed_persist_keeps_previous_events() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    let generator = generator_over(store.clone(), 16);
    generator.generate("alice", GenerationMode::Full).await.unwrap();
    let before = store.stored_events("alice");

    office_walk_gym(&store, "alice");
    store.set_fail_persist(true);
    let err = generator.generate("alice", GenerationMode::Full).await.unwrap_err();
    assert!(matches!(err, TimelineError::StorageUnavailable(_)));

    assert_eq!(store.stored_events("alice"), before);
    assert!(!generator.locks().is_locked("alice"));

    let jobs = generator.jobs().jobs_for_user("alice");
    let failed = jobs.last().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let message = failed.error.as_deref().unwrap();
    assert!(message.starts_with("storage unavailable"), "{message}");
    assert!(message.contains("disk full"), "{message}");

    store.set_fail_persist(false);
    generator.generate("alice", GenerationMode::Full).await.unwrap();
    assert_eq!(store.stored_events("alice").len(), 5);
}

#[tokio::test]
async fn read_failure_fails_the_job() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    store.fail_reads_for("alice");
    let generator = generator_over(store.clone(), 16);

    let job_id = generator.spawn("alice", GenerationMode::Full).unwrap();
    let job = wait_for_job(&generator, job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("connection reset"));
    assert!(store.stored_events("alice").is_empty());
    assert!(!generator.locks().is_locked("alice"));
}

#[tokio::test]
async fn panicking_run_fails_its_job_and_frees_the_user() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    store.set_panic_on_read(true);
    let generator = generator_over(store.clone(), 16);

    let job_id = generator.spawn("alice", GenerationMode::Full).unwrap();
    let job = wait_for_job(&generator, job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.finished_at.is_some());
    assert!(job.error.unwrap().contains("aborted"));
    assert!(!generator.locks().is_locked("alice"));
    // terminal, so the retention sweep can reclaim it
    assert_eq!(generator.jobs().sweep(Utc::now() + Duration::hours(2)), 1);

    store.set_panic_on_read(false);
    let report = generator.generate("alice", GenerationMode::Full).await.unwrap();
    assert_eq!(report.points_consumed, 71);
}

#[tokio::test]
async fn repeated_full_runs_store_identical_events() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    office_walk_gym(&store, "alice");
    let generator = generator_over(store.clone(), 16);

    let first_report = generator.generate("alice", GenerationMode::Full).await.unwrap();
    let first = store.stored_events("alice");
    let second_report = generator.generate("alice", GenerationMode::Full).await.unwrap();

    assert_eq!(first.len(), 5);
    assert_eq!(store.stored_events("alice"), first);
    assert_ne!(first_report.job_id, second_report.job_id);
    assert_eq!(
        (first_report.stays, first_report.trips, first_report.data_gaps),
        (second_report.stays, second_report.trips, second_report.data_gaps)
    );
}

#[tokio::test]
async fn invalid_user_settings_fail_before_reading_points() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    home_walk_office(&store, "bob");

    let settings = Arc::new(SettingsStore::in_memory(TimelineConfig::default()));
    settings
        .set_user_overrides(
            "alice",
            TimelineConfigOverrides {
                staypoint_min_points: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
    let generator = TimelineGenerator::new(
        store.clone(),
        settings,
        JobTracker::new(Duration::hours(1)),
        16,
    );

    let err = generator.generate("alice", GenerationMode::Full).await.unwrap_err();
    assert!(matches!(err, TimelineError::InvalidConfig(_)));
    assert_eq!(store.fetch_calls(), 0);
    assert!(store.stored_events("alice").is_empty());
    assert!(!generator.locks().is_locked("alice"));

    // the override only applies to alice
    generator.generate("bob", GenerationMode::Full).await.unwrap();
    assert!(store.fetch_calls() > 0);
}

#[tokio::test]
async fn invalid_defaults_fail_every_user() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    let defaults = TimelineConfig {
        path_max_points: 1,
        ..Default::default()
    };
    let generator = generator_with(store.clone(), defaults, 16);

    let err = generator.generate("alice", GenerationMode::Full).await.unwrap_err();
    assert!(matches!(err, TimelineError::InvalidConfig(_)));
    assert_eq!(store.fetch_calls(), 0);
}

#[tokio::test]
async fn points_are_read_in_bounded_chunks() {
    let store = FakeStore::new();
    store.add_points("alice", dwell(0, 9_999, 1, 0.0));
    let generator = generator_over(store.clone(), 100);

    let report = generator.generate("alice", GenerationMode::Full).await.unwrap();
    assert_eq!(report.points_consumed, 10_000);

    // 100 full chunks and one empty read to detect the end
    assert_eq!(store.fetch_calls(), 101);
    assert_eq!(store.largest_limit(), 100);

    let job = generator.get_job(report.job_id).unwrap();
    assert_eq!(job.details["chunksFetched"], 101);
    assert!(job.details["peakBuffered"].as_u64().unwrap() <= 100);
    assert_eq!(job.details["pointsConsumed"], 10_000);
}

#[tokio::test]
async fn realtime_tick_isolates_failures_and_skips_busy_users() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    home_walk_office(&store, "bob");
    home_walk_office(&store, "carol");
    store.fail_reads_for("bob");
    let generator = generator_over(store.clone(), 16);

    let held = generator.locks().try_acquire("carol").unwrap();
    let workers = Arc::new(Semaphore::new(2));
    let summary = run_realtime_tick(&generator, &workers).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(store.stored_events("alice").len(), 3);
    assert!(store.stored_events("carol").is_empty());

    drop(held);
    let summary = run_realtime_tick(&generator, &workers).await.unwrap();
    assert_eq!((summary.succeeded, summary.failed, summary.skipped), (2, 1, 0));
    assert_eq!(store.stored_events("carol").len(), 3);
}

#[tokio::test]
async fn scheduler_keeps_timelines_current_until_stopped() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    let generator = generator_over(store.clone(), 16);

    let mut scheduler = RealtimeScheduler::new(generator.clone(), StdDuration::from_millis(20), 2);
    scheduler.start().unwrap();
    assert!(scheduler.is_running());
    assert!(scheduler.start().is_err());

    tokio::time::sleep(StdDuration::from_millis(120)).await;
    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running());

    assert_eq!(kinds(&store.stored_events("alice")), vec!["stay", "trip", "stay"]);
    assert!(generator.jobs().jobs_for_user("alice").len() >= 2);

    let calls = store.fetch_calls();
    tokio::time::sleep(StdDuration::from_millis(60)).await;
    assert_eq!(store.fetch_calls(), calls);
}

#[tokio::test]
async fn service_runs_requested_jobs() {
    let store = FakeStore::new();
    home_walk_office(&store, "alice");
    let settings = Arc::new(SettingsStore::in_memory(TimelineConfig::default()));
    let config = ServiceConfig {
        realtime_interval: StdDuration::from_secs(3600),
        ..Default::default()
    };
    let service = TimelineService::new(store.clone(), settings, &config);
    service.start().await.unwrap();

    let job_id = service
        .request_generation("alice", GenerationMode::Full)
        .unwrap();
    let job = wait_for_job(service.generator(), job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(service.job(job_id).unwrap().id, job_id);
    assert_eq!(store.stored_events("alice").len(), 3);

    service.shutdown().await.unwrap();
}
