//! Data gap construction, live (one pair of fixes) and batch (a whole
//! timestamp sequence).

use chrono::{DateTime, Duration, Utc};

use crate::error::{TimelineError, TimelineResult};
use crate::models::DataGap;

/// Build a gap between two instants. An interval running backwards means
/// the caller fed points out of order.
pub fn data_gap(start: DateTime<Utc>, end: DateTime<Utc>) -> TimelineResult<DataGap> {
    if end < start {
        return Err(TimelineError::SegmentationInvariantViolation(format!(
            "data gap would end ({end}) before it starts ({start})"
        )));
    }
    Ok(DataGap { start, end })
}

/// Thresholds deciding when silence interrupts a segment and when it is
/// long enough to be reported.
#[derive(Debug, Clone, Copy)]
pub struct GapPolicy {
    pub threshold: Duration,
    pub min_duration: Duration,
}

impl GapPolicy {
    /// Fails with `InvalidConfig` when either value does not fit a `Duration`.
    pub fn new(threshold_secs: i64, min_duration_secs: i64) -> TimelineResult<Self> {
        Ok(Self {
            threshold: seconds("data_gap_threshold_secs", threshold_secs)?,
            min_duration: seconds("data_gap_min_duration_secs", min_duration_secs)?,
        })
    }

    /// `Some(gap)` when the silence between `last` and `next` must be reported.
    pub fn check(&self, last: DateTime<Utc>, next: DateTime<Utc>) -> Option<DataGap> {
        let silence = next - last;
        if silence > self.threshold && silence > self.min_duration {
            Some(DataGap {
                start: last,
                end: next,
            })
        } else {
            None
        }
    }
}

fn seconds(name: &str, secs: i64) -> TimelineResult<Duration> {
    Duration::try_seconds(secs).ok_or_else(|| {
        TimelineError::InvalidConfig(format!("{name} is out of range, got {secs}"))
    })
}

/// Reportable gaps across an ordered timestamp sequence.
pub fn find_gaps<I>(timestamps: I, policy: &GapPolicy) -> Vec<DataGap>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    let mut gaps = Vec::new();
    let mut previous: Option<DateTime<Utc>> = None;

    for timestamp in timestamps {
        if let Some(last) = previous {
            if let Some(gap) = policy.check(last, timestamp) {
                gaps.push(gap);
            }
        }
        previous = Some(timestamp);
    }

    gaps
}
