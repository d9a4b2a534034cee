//! Bounded-memory, forward-only stream of a user's GPS points.
//!
//! Points are pulled from the store in chunks of at most `buffer_size`
//! and handed out one at a time; at no point does the source hold more
//! than one chunk. A source cannot be rewound: create a new one to scan
//! again.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{TimelineError, TimelineResult};
use crate::models::GpsPoint;
use crate::store::TimelineStore;

const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub struct PointSource {
    store: Arc<dyn TimelineStore>,
    user_id: String,
    from: DateTime<Utc>,
    buffer_size: usize,
    offset: usize,
    buffer: VecDeque<GpsPoint>,
    exhausted: bool,
    previous: Option<GpsPoint>,
    consumed: u64,
    dropped: u64,
    chunks_fetched: u64,
    peak_buffered: usize,
}

impl PointSource {
    pub fn new(
        store: Arc<dyn TimelineStore>,
        user_id: &str,
        from: DateTime<Utc>,
        buffer_size: usize,
    ) -> TimelineResult<Self> {
        if buffer_size == 0 {
            return Err(TimelineError::InvalidConfig(
                "point source buffer size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            store,
            user_id: user_id.to_string(),
            from,
            buffer_size,
            offset: 0,
            buffer: VecDeque::with_capacity(buffer_size),
            exhausted: false,
            previous: None,
            consumed: 0,
            dropped: 0,
            chunks_fetched: 0,
            peak_buffered: 0,
        })
    }

    /// Next point in timestamp order, or `None` once the user's points run out.
    ///
    /// Points older than their predecessor, or repeating its timestamp and
    /// source, are skipped.
    pub async fn next_point(&mut self) -> TimelineResult<Option<GpsPoint>> {
        loop {
            let Some(point) = self.buffer.pop_front() else {
                if self.exhausted {
                    return Ok(None);
                }
                self.fill().await?;
                continue;
            };

            if let Some(previous) = &self.previous {
                if point.timestamp < previous.timestamp || point.is_duplicate_of(previous) {
                    self.dropped += 1;
                    continue;
                }
            }

            self.consumed += 1;
            self.previous = Some(point.clone());
            return Ok(Some(point));
        }
    }

    async fn fill(&mut self) -> TimelineResult<()> {
        let mut chunk = self
            .store
            .fetch_chunk(&self.user_id, self.from, self.offset, self.buffer_size)
            .await
            .map_err(TimelineError::storage)?;

        if chunk.len() < self.buffer_size {
            self.exhausted = true;
        }
        // An oversized chunk is cut back; the rest is fetched again next time.
        chunk.truncate(self.buffer_size);

        self.offset += chunk.len();
        self.chunks_fetched += 1;
        self.buffer.extend(chunk);
        self.peak_buffered = self.peak_buffered.max(self.buffer.len());

        log_debug!(
            "fetched chunk #{} for user {} ({} buffered, offset {})",
            self.chunks_fetched,
            self.user_id,
            self.buffer.len(),
            self.offset
        );
        Ok(())
    }

    /// Points handed out so far. Never decreases.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Out-of-order or duplicate points skipped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn chunks_fetched(&self) -> u64 {
        self.chunks_fetched
    }

    /// Largest number of points held at once.
    pub fn peak_buffered(&self) -> usize {
        self.peak_buffered
    }
}
