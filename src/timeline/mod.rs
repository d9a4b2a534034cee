//! Segmentation and refinement of GPS points into timeline events.
//!
//! Flow: `PointSource` -> `SegmentDetector` (raw stays, trips, gaps) ->
//! `TripAlgorithm::apply` (split, classify, prune, merge, simplify).

pub mod classifier;
pub mod config;
pub mod detector;
pub mod gap;
pub mod merge;
pub mod point_source;
pub mod simplify;
pub mod velocity;

pub use config::{TimelineConfig, TimelineConfigOverrides, TripAlgorithm};
pub use detector::{detect_segments, DetectorState, DetectorStats, SegmentDetector};
pub use point_source::PointSource;

use crate::error::TimelineResult;
use crate::models::{ensure_contiguous, TimelineEvent};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

impl TripAlgorithm {
    /// Turn raw detector output into the final timeline for `user_id`.
    pub fn apply(
        self,
        user_id: &str,
        events: Vec<TimelineEvent>,
        config: &TimelineConfig,
    ) -> TimelineResult<Vec<TimelineEvent>> {
        let raw_count = events.len();

        let mut events = match self {
            TripAlgorithm::Single => events,
            TripAlgorithm::Multiple => classifier::split_at_stops(events, config),
        };
        events = classifier::classify_trips(events, config);
        events = merge::prune_short_trips(events, config);
        events = merge::merge_stays(events, config);
        if self == TripAlgorithm::Multiple {
            events = merge::merge_trips(events, config);
        }
        events = simplify::simplify_trip_paths(events, config);

        ensure_contiguous(&events)?;

        log_debug!(
            "refined {} raw events into {} for user {} ({:?})",
            raw_count,
            events.len(),
            user_id,
            self
        );
        Ok(events)
    }
}

/// Detect and refine in one go, for callers that already hold the points.
pub fn build_timeline(
    user_id: &str,
    points: impl IntoIterator<Item = crate::models::GpsPoint>,
    config: &TimelineConfig,
) -> TimelineResult<Vec<TimelineEvent>> {
    config.validate()?;
    let raw = detect_segments(points, config)?;
    config.trip_algorithm.apply(user_id, raw, config)
}
