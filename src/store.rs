//! Storage collaborator used by the generation pipeline.
//!
//! The pipeline only ever talks to this trait; `db::Database` is the
//! SQLite implementation shipped with the crate.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{GpsPoint, TimelineEvent};

#[async_trait]
pub trait TimelineStore: Send + Sync + 'static {
    /// Up to `limit` points of `user_id` at or after `from`, ordered by
    /// timestamp, skipping the first `offset` matches.
    async fn fetch_chunk(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<GpsPoint>>;

    /// Atomically replace every stored event of the user.
    async fn replace_timeline_events(&self, user_id: &str, events: &[TimelineEvent])
        -> Result<()>;

    /// Atomically drop events starting at or after `from` and store `events`.
    async fn append_timeline_events(
        &self,
        user_id: &str,
        events: &[TimelineEvent],
        from: DateTime<Utc>,
    ) -> Result<()>;

    /// Where an incremental run resumes: start of the latest stored stay,
    /// else of the latest stored event. `None` when nothing is stored.
    async fn resume_timestamp(&self, user_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Stored events of the user, ordered by start.
    async fn timeline_events(&self, user_id: &str) -> Result<Vec<TimelineEvent>>;

    /// Every user that has raw points.
    async fn user_ids(&self) -> Result<Vec<String>>;
}
