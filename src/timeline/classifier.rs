//! Travel type assignment for trips.
//!
//! Speeds are measured leg by leg. Legs faster than the plausibility
//! ceiling are GPS errors and take no part in distance or speed; the
//! "max" speed is a high percentile of the smoothed leg speeds so that a
//! single outlier cannot decide the type.

use serde::Serialize;

use crate::models::{PathPoint, Stay, TimelineEvent, TravelType, Trip};
use crate::timeline::config::TimelineConfig;
use crate::timeline::velocity::{
    centroid, haversine_meters, is_suspicious_speed, moving_average, path_speed_kmh, percentile,
    speed_kmh_between,
};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripStats {
    pub distance_meters: f64,
    pub avg_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub suspicious_legs: usize,
}

pub fn trip_stats(path: &[PathPoint], config: &TimelineConfig) -> TripStats {
    let mut stats = TripStats::default();
    let mut speeds = Vec::with_capacity(path.len().saturating_sub(1));

    for leg in path.windows(2) {
        let speed = path_speed_kmh(&leg[0], &leg[1]);
        if is_suspicious_speed(speed, config.max_plausible_speed_kmh) {
            stats.suspicious_legs += 1;
            continue;
        }
        stats.distance_meters += haversine_meters(leg[0].coordinate(), leg[1].coordinate());
        speeds.push(speed);
    }

    if let (Some(first), Some(last)) = (path.first(), path.last()) {
        stats.avg_speed_kmh = speed_kmh_between(stats.distance_meters, first.timestamp, last.timestamp);
    }
    let smoothed = moving_average(&speeds, config.speed_smoothing_window as isize);
    stats.max_speed_kmh = percentile(&smoothed, config.speed_percentile);
    stats
}

/// WALK and CAR need both the average and the robust max inside their
/// band; anything in between stays UNKNOWN.
pub fn travel_type(stats: &TripStats, config: &TimelineConfig) -> TravelType {
    if stats.avg_speed_kmh <= config.walking_max_avg_speed_kmh
        && stats.max_speed_kmh <= config.walking_max_max_speed_kmh
    {
        TravelType::Walk
    } else if stats.avg_speed_kmh >= config.car_min_avg_speed_kmh
        && stats.max_speed_kmh >= config.car_min_max_speed_kmh
    {
        TravelType::Car
    } else {
        TravelType::Unknown
    }
}

/// Recompute distance, speeds and travel type from the trip's path.
pub fn classify_trip(trip: &mut Trip, config: &TimelineConfig) {
    let stats = trip_stats(&trip.path, config);
    trip.distance_meters = stats.distance_meters;
    trip.avg_speed_kmh = stats.avg_speed_kmh;
    trip.max_speed_kmh = stats.max_speed_kmh;
    trip.travel_type = travel_type(&stats, config);
}

pub fn classify_trips(events: Vec<TimelineEvent>, config: &TimelineConfig) -> Vec<TimelineEvent> {
    events
        .into_iter()
        .map(|event| match event {
            TimelineEvent::Trip(mut trip) => {
                classify_trip(&mut trip, config);
                TimelineEvent::Trip(trip)
            }
            other => other,
        })
        .collect()
}

/// Split trips at internal stops: runs of vertices that stay within the
/// stay radius for at least the stay duration become Trip / Stay / Trip.
/// A stop touching either end of the path is left alone.
pub fn split_at_stops(events: Vec<TimelineEvent>, config: &TimelineConfig) -> Vec<TimelineEvent> {
    let mut out = Vec::with_capacity(events.len());
    for event in events {
        match event {
            TimelineEvent::Trip(trip) => out.extend(split_trip(trip, config)),
            other => out.push(other),
        }
    }
    out
}

fn split_trip(trip: Trip, config: &TimelineConfig) -> Vec<TimelineEvent> {
    let path = &trip.path;
    let len = path.len();
    if len < 4 {
        return vec![TimelineEvent::Trip(trip)];
    }

    let mut pieces = Vec::new();
    let mut piece_start = 0;
    let mut stop_start = 1;

    while stop_start + 1 < len {
        let anchor = path[stop_start].coordinate();
        let mut stop_end = stop_start;
        while stop_end + 2 < len
            && haversine_meters(anchor, path[stop_end + 1].coordinate())
                <= config.staypoint_radius_meters
        {
            stop_end += 1;
        }

        let dwell = (path[stop_end].timestamp - path[stop_start].timestamp).num_seconds();
        if stop_end > stop_start && dwell >= config.staypoint_min_duration_secs {
            pieces.push(trip_piece(&path[piece_start..=stop_start]));

            let stop = &path[stop_start..=stop_end];
            let center = centroid(stop.iter().map(PathPoint::coordinate)).unwrap_or(anchor);
            pieces.push(TimelineEvent::Stay(Stay::new(
                path[stop_start].timestamp,
                path[stop_end].timestamp,
                center,
            )));

            piece_start = stop_end;
            stop_start = stop_end + 1;
        } else {
            stop_start += 1;
        }
    }

    if pieces.is_empty() {
        return vec![TimelineEvent::Trip(trip)];
    }
    pieces.push(trip_piece(&path[piece_start..]));
    pieces
}

fn trip_piece(path: &[PathPoint]) -> TimelineEvent {
    let start = path[0].timestamp;
    let end = path[path.len() - 1].timestamp;
    TimelineEvent::Trip(Trip::from_path(start, end, path.to_vec()))
}
