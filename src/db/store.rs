use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::connection::Database;
use crate::models::{GpsPoint, TimelineEvent};
use crate::store::TimelineStore;

#[async_trait]
impl TimelineStore for Database {
    async fn fetch_chunk(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<GpsPoint>> {
        self.points_page(user_id, from, offset, limit).await
    }

    async fn replace_timeline_events(&self, user_id: &str, events: &[TimelineEvent]) -> Result<()> {
        self.replace_events(user_id, events).await
    }

    async fn append_timeline_events(
        &self,
        user_id: &str,
        events: &[TimelineEvent],
        from: DateTime<Utc>,
    ) -> Result<()> {
        self.replace_events_from(user_id, events, from).await
    }

    async fn resume_timestamp(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        match self.latest_event_start(user_id, Some("stay")).await? {
            Some(start) => Ok(Some(start)),
            None => self.latest_event_start(user_id, None).await,
        }
    }

    async fn timeline_events(&self, user_id: &str) -> Result<Vec<TimelineEvent>> {
        self.events_for_user(user_id).await
    }

    async fn user_ids(&self) -> Result<Vec<String>> {
        self.users_with_points().await
    }
}
