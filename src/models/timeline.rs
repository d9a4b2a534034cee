//! Timeline event data model.
//!
//! A timeline is an ordered, gap-free run of events: every event ends
//! exactly where the next one starts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TimelineError, TimelineResult};
use crate::models::gps_point::{Coordinate, GpsPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TravelType {
    Walk,
    Car,
    Unknown,
}

impl TravelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelType::Walk => "WALK",
            TravelType::Car => "CAR",
            TravelType::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WALK" => Some(TravelType::Walk),
            "CAR" => Some(TravelType::Car),
            "UNKNOWN" => Some(TravelType::Unknown),
            _ => None,
        }
    }
}

/// Timestamped vertex of a trip path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

impl PathPoint {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

impl From<&GpsPoint> for PathPoint {
    fn from(point: &GpsPoint) -> Self {
        PathPoint::new(point.timestamp, point.latitude, point.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stay {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Resolved place, filled in by geocoding after segmentation.
    pub place_id: Option<String>,
}

impl Stay {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, centroid: Coordinate) -> Self {
        Self {
            start,
            end,
            latitude: centroid.latitude,
            longitude: centroid.longitude,
            place_id: None,
        }
    }

    pub fn centroid(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub distance_meters: f64,
    pub path: Vec<PathPoint>,
    pub travel_type: TravelType,
    pub avg_speed_kmh: f64,
    pub max_speed_kmh: f64,
}

impl Trip {
    /// Unclassified trip over `path`; distance is filled in by the classifier.
    pub fn from_path(start: DateTime<Utc>, end: DateTime<Utc>, path: Vec<PathPoint>) -> Self {
        Self {
            start,
            end,
            distance_meters: 0.0,
            path,
            travel_type: TravelType::Unknown,
            avg_speed_kmh: 0.0,
            max_speed_kmh: 0.0,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn first_coordinate(&self) -> Option<Coordinate> {
        self.path.first().map(PathPoint::coordinate)
    }

    pub fn last_coordinate(&self) -> Option<Coordinate> {
        self.path.last().map(PathPoint::coordinate)
    }
}

/// Interval with no usable samples. Built through `timeline::gap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataGap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DataGap {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineEvent {
    Stay(Stay),
    Trip(Trip),
    DataGap(DataGap),
}

impl TimelineEvent {
    pub fn start(&self) -> DateTime<Utc> {
        match self {
            TimelineEvent::Stay(stay) => stay.start,
            TimelineEvent::Trip(trip) => trip.start,
            TimelineEvent::DataGap(gap) => gap.start,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        match self {
            TimelineEvent::Stay(stay) => stay.end,
            TimelineEvent::Trip(trip) => trip.end,
            TimelineEvent::DataGap(gap) => gap.end,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end() - self.start()
    }

    pub fn duration_secs(&self) -> i64 {
        self.duration().num_seconds()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TimelineEvent::Stay(_) => "stay",
            TimelineEvent::Trip(_) => "trip",
            TimelineEvent::DataGap(_) => "data_gap",
        }
    }

    pub fn as_stay(&self) -> Option<&Stay> {
        match self {
            TimelineEvent::Stay(stay) => Some(stay),
            _ => None,
        }
    }

    pub fn as_trip(&self) -> Option<&Trip> {
        match self {
            TimelineEvent::Trip(trip) => Some(trip),
            _ => None,
        }
    }

    pub fn as_gap(&self) -> Option<&DataGap> {
        match self {
            TimelineEvent::DataGap(gap) => Some(gap),
            _ => None,
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, TimelineEvent::DataGap(_))
    }
}

/// Check that events are ordered, non-negative in length and that each
/// one ends exactly where the next starts.
pub fn ensure_contiguous(events: &[TimelineEvent]) -> TimelineResult<()> {
    for (index, event) in events.iter().enumerate() {
        if event.end() < event.start() {
            return Err(TimelineError::SegmentationInvariantViolation(format!(
                "{} #{index} ends ({}) before it starts ({})",
                event.kind(),
                event.end(),
                event.start()
            )));
        }
    }

    for (index, pair) in events.windows(2).enumerate() {
        if pair[0].end() != pair[1].start() {
            return Err(TimelineError::SegmentationInvariantViolation(format!(
                "{} #{index} ends at {} but {} #{} starts at {}",
                pair[0].kind(),
                pair[0].end(),
                pair[1].kind(),
                index + 1,
                pair[1].start()
            )));
        }
    }

    Ok(())
}
