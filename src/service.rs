use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use chrono::Duration as ChronoDuration;
use log::info;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::TimelineResult;
use crate::generation::{JobTracker, RealtimeScheduler, TimelineGenerator};
use crate::models::{GenerationJob, GenerationMode};
use crate::settings::SettingsStore;
use crate::store::TimelineStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    pub settings_path: PathBuf,
    pub realtime_interval: Duration,
    pub workers: usize,
    pub job_retention: ChronoDuration,
    pub sweep_interval: Duration,
    pub buffer_size: usize,
    pub debug: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("timeline.sqlite3"),
            settings_path: PathBuf::from("timeline-settings.json"),
            realtime_interval: Duration::from_secs(120),
            workers: 4,
            job_retention: ChronoDuration::hours(1),
            sweep_interval: Duration::from_secs(300),
            buffer_size: 1000,
            debug: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |name: &str| -> Result<Option<u64>> { parse_var(&lookup, name) };

        let config = Self {
            db_path: lookup("TIMELINE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            settings_path: lookup("TIMELINE_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_path),
            realtime_interval: parsed("TIMELINE_REALTIME_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.realtime_interval),
            workers: parsed("TIMELINE_WORKERS")?
                .map(|n| n as usize)
                .unwrap_or(defaults.workers),
            job_retention: match parsed("TIMELINE_JOB_RETENTION_SECS")? {
                Some(secs) => i64::try_from(secs)
                    .ok()
                    .and_then(ChronoDuration::try_seconds)
                    .ok_or_else(|| anyhow!("TIMELINE_JOB_RETENTION_SECS is out of range: {secs}"))?,
                None => defaults.job_retention,
            },
            sweep_interval: parsed("TIMELINE_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            buffer_size: parsed("TIMELINE_BUFFER_SIZE")?
                .map(|n| n as usize)
                .unwrap_or(defaults.buffer_size),
            debug: lookup("TIMELINE_DEBUG")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.debug),
        };

        if config.workers == 0 {
            return Err(anyhow!("TIMELINE_WORKERS must be at least 1"));
        }
        if config.buffer_size == 0 {
            return Err(anyhow!("TIMELINE_BUFFER_SIZE must be at least 1"));
        }
        if config.realtime_interval.is_zero() || config.sweep_interval.is_zero() {
            return Err(anyhow!("scheduler intervals must be positive"));
        }
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("invalid value '{raw}' for {name}: {err}")),
    }
}

/// Generator, job registry, sweeper and realtime scheduler wired together.
pub struct TimelineService {
    generator: TimelineGenerator,
    scheduler: Mutex<RealtimeScheduler>,
    sweep_interval: Duration,
}

impl TimelineService {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        settings: Arc<SettingsStore>,
        config: &ServiceConfig,
    ) -> Self {
        let jobs = JobTracker::new(config.job_retention);
        let generator = TimelineGenerator::new(store, settings, jobs, config.buffer_size);
        let scheduler =
            RealtimeScheduler::new(generator.clone(), config.realtime_interval, config.workers);

        Self {
            generator,
            scheduler: Mutex::new(scheduler),
            sweep_interval: config.sweep_interval,
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.generator.jobs().start_sweeper(self.sweep_interval).await;
        self.scheduler.lock().await.start()?;
        info!("Timeline service started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.lock().await.stop().await?;
        self.generator.jobs().stop_sweeper().await;
        info!("Timeline service stopped");
        Ok(())
    }

    pub fn generator(&self) -> &TimelineGenerator {
        &self.generator
    }

    /// Start a background run; see `TimelineGenerator::spawn`.
    pub fn request_generation(&self, user_id: &str, mode: GenerationMode) -> TimelineResult<Uuid> {
        self.generator.spawn(user_id, mode)
    }

    pub fn job(&self, job_id: Uuid) -> TimelineResult<GenerationJob> {
        self.generator.get_job(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("TIMELINE_REALTIME_INTERVAL_SECS", "30"),
            ("TIMELINE_WORKERS", "2"),
            ("TIMELINE_BUFFER_SIZE", " 250 "),
            ("TIMELINE_DEBUG", "true"),
        ]))
        .unwrap();

        assert_eq!(config.realtime_interval, Duration::from_secs(30));
        assert_eq!(config.workers, 2);
        assert_eq!(config.buffer_size, 250);
        assert!(config.debug);
    }

    #[test]
    fn garbage_and_zero_values_are_rejected() {
        assert!(ServiceConfig::from_lookup(lookup(&[("TIMELINE_WORKERS", "many")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup(&[("TIMELINE_BUFFER_SIZE", "0")])).is_err());
    }

    #[test]
    fn retention_must_fit_a_duration() {
        let config =
            ServiceConfig::from_lookup(lookup(&[("TIMELINE_JOB_RETENTION_SECS", "7200")])).unwrap();
        assert_eq!(config.job_retention, ChronoDuration::hours(2));

        for too_long in ["9223372036854775807", "18446744073709551615"] {
            let result =
                ServiceConfig::from_lookup(lookup(&[("TIMELINE_JOB_RETENTION_SECS", too_long)]));
            assert!(result.is_err(), "{too_long} was accepted");
        }
    }
}
