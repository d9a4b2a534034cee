//! Periodic incremental generation for every user with points.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{TimelineError, TimelineResult};
use crate::models::GenerationMode;

use super::orchestrator::TimelineGenerator;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Users whose lock was already held.
    pub skipped: usize,
}

/// One realtime pass: an incremental run for each user not already being
/// processed, at most `workers` permits at a time. A failing user does
/// not stop the others.
pub async fn run_realtime_tick(
    generator: &TimelineGenerator,
    workers: &Arc<Semaphore>,
) -> TimelineResult<TickSummary> {
    let users = generator
        .store()
        .user_ids()
        .await
        .map_err(TimelineError::storage)?;

    let mut summary = TickSummary::default();
    let mut runs = JoinSet::new();

    for user_id in users {
        if generator.locks().is_locked(&user_id) {
            summary.skipped += 1;
            continue;
        }

        let generator = generator.clone();
        let workers = workers.clone();
        runs.spawn(async move {
            let _permit = workers.acquire_owned().await;
            let result = generator.generate(&user_id, GenerationMode::Incremental).await;
            (user_id, result)
        });
    }

    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok((_, Ok(_))) => summary.succeeded += 1,
            Ok((_, Err(TimelineError::GenerationInProgress(_)))) => summary.skipped += 1,
            Ok((user_id, Err(err))) => {
                summary.failed += 1;
                log_warn!("realtime generation for user {} failed: {}", user_id, err);
            }
            Err(join_err) => {
                summary.failed += 1;
                log_error!("realtime generation task panicked: {}", join_err);
            }
        }
    }

    Ok(summary)
}

pub struct RealtimeScheduler {
    generator: TimelineGenerator,
    interval: Duration,
    workers: Arc<Semaphore>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl RealtimeScheduler {
    pub fn new(generator: TimelineGenerator, interval: Duration, workers: usize) -> Self {
        Self {
            generator,
            interval,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            bail!("realtime scheduler already running");
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let generator = self.generator.clone();
        let workers = self.workers.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            // first pass one full period after start
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match run_realtime_tick(&generator, &workers).await {
                            Ok(summary) => log_info!(
                                "realtime tick: {} succeeded, {} failed, {} skipped",
                                summary.succeeded,
                                summary.failed,
                                summary.skipped
                            ),
                            Err(err) => log_error!("realtime tick could not list users: {}", err),
                        }
                    }
                    _ = token.cancelled() => {
                        log_info!("realtime scheduler shutting down");
                        break;
                    }
                }
            }
        });

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Stop ticking. A pass already underway runs to completion first.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("realtime scheduler task failed to join")
        } else {
            Ok(())
        }
    }
}
