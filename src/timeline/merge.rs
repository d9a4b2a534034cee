//! Post-classification cleanup: prune trips too short to be real, merge
//! stays split by drift, and (multiple-trip mode) merge trips split by a
//! brief stop.
//!
//! Every pass only redistributes time between neighbours, so a
//! contiguous input stays contiguous. Nothing is ever merged across a
//! data gap.

use crate::models::{PathPoint, Stay, TimelineEvent, Trip};
use crate::timeline::classifier::classify_trip;
use crate::timeline::config::TimelineConfig;
use crate::timeline::velocity::{centroid, haversine_meters};

fn is_short(trip: &Trip, config: &TimelineConfig) -> bool {
    trip.distance_meters < config.min_trip_distance_meters
        || trip.duration().num_seconds() < config.min_trip_duration_secs
}

/// Fold trips below the minimum distance or duration into the previous
/// stay, else the next stay, else turn them into a stay of their own.
pub fn prune_short_trips(events: Vec<TimelineEvent>, config: &TimelineConfig) -> Vec<TimelineEvent> {
    let mut out: Vec<TimelineEvent> = Vec::with_capacity(events.len());
    let mut rest = events.into_iter().peekable();

    while let Some(event) = rest.next() {
        let trip = match event {
            TimelineEvent::Trip(trip) if is_short(&trip, config) => trip,
            other => {
                out.push(other);
                continue;
            }
        };

        if let Some(TimelineEvent::Stay(previous)) = out.last_mut() {
            previous.end = trip.end;
            continue;
        }
        if let Some(TimelineEvent::Stay(next)) = rest.peek_mut() {
            next.start = trip.start;
            continue;
        }

        let center = centroid(trip.path.iter().map(PathPoint::coordinate))
            .unwrap_or_default();
        out.push(TimelineEvent::Stay(Stay::new(trip.start, trip.end, center)));
    }

    out
}

fn stays_close(a: &Stay, b: &Stay, config: &TimelineConfig) -> bool {
    haversine_meters(a.centroid(), b.centroid()) <= config.merge_max_distance_meters
}

/// One stay covering both, centred on the duration-weighted mean.
fn combine_stays(first: &Stay, second: &Stay) -> Stay {
    let w1 = first.duration().num_milliseconds().max(0) as f64;
    let w2 = second.duration().num_milliseconds().max(0) as f64;
    let (w1, w2) = if w1 + w2 > 0.0 { (w1, w2) } else { (1.0, 1.0) };
    let total = w1 + w2;

    Stay {
        start: first.start,
        end: second.end,
        latitude: (first.latitude * w1 + second.latitude * w2) / total,
        longitude: (first.longitude * w1 + second.longitude * w2) / total,
        place_id: first.place_id.clone().or_else(|| second.place_id.clone()),
    }
}

/// Merge adjacent stays, and stays separated by one short trip, whose
/// centroids lie within the merge distance.
pub fn merge_stays(events: Vec<TimelineEvent>, config: &TimelineConfig) -> Vec<TimelineEvent> {
    if !config.merge_enabled {
        return events;
    }

    let mut out: Vec<TimelineEvent> = Vec::with_capacity(events.len());
    for event in events {
        let stay = match event {
            TimelineEvent::Stay(stay) => stay,
            other => {
                out.push(other);
                continue;
            }
        };

        if let Some(TimelineEvent::Stay(previous)) = out.last_mut() {
            if stays_close(previous, &stay, config) {
                *previous = combine_stays(previous, &stay);
                continue;
            }
        }

        let n = out.len();
        let bridged = n >= 2
            && matches!(
                &out[n - 1],
                TimelineEvent::Trip(trip) if trip.duration().num_seconds() <= config.merge_max_time_gap_secs
            )
            && matches!(&out[n - 2], TimelineEvent::Stay(previous) if stays_close(previous, &stay, config));
        if bridged {
            out.pop();
            if let Some(TimelineEvent::Stay(previous)) = out.last_mut() {
                *previous = combine_stays(previous, &stay);
                continue;
            }
        }

        out.push(TimelineEvent::Stay(stay));
    }
    out
}

fn trips_compatible(first: &Trip, second: &Trip, config: &TimelineConfig) -> bool {
    if first.travel_type != second.travel_type {
        return false;
    }
    match (first.last_coordinate(), second.first_coordinate()) {
        (Some(a), Some(b)) => haversine_meters(a, b) <= config.merge_max_distance_meters,
        _ => false,
    }
}

fn combine_trips(first: &Trip, second: &Trip, config: &TimelineConfig) -> Trip {
    let mut path = first.path.clone();
    let mut tail = second.path.iter().copied().peekable();
    if let (Some(last), Some(next)) = (path.last(), tail.peek()) {
        if last.timestamp == next.timestamp {
            tail.next();
        }
    }
    path.extend(tail);

    let mut trip = Trip::from_path(first.start, second.end, path);
    classify_trip(&mut trip, config);
    trip
}

/// Merge consecutive trips of the same type, directly adjacent or
/// separated by one short stay, when the second picks up near where the
/// first ended.
pub fn merge_trips(events: Vec<TimelineEvent>, config: &TimelineConfig) -> Vec<TimelineEvent> {
    let mut out: Vec<TimelineEvent> = Vec::with_capacity(events.len());
    for event in events {
        let trip = match event {
            TimelineEvent::Trip(trip) => trip,
            other => {
                out.push(other);
                continue;
            }
        };

        if let Some(TimelineEvent::Trip(previous)) = out.last_mut() {
            if trips_compatible(previous, &trip, config) {
                *previous = combine_trips(previous, &trip, config);
                continue;
            }
        }

        let n = out.len();
        let bridged = n >= 2
            && matches!(
                &out[n - 1],
                TimelineEvent::Stay(stay) if stay.duration().num_seconds() <= config.merge_max_time_gap_secs
            )
            && matches!(&out[n - 2], TimelineEvent::Trip(previous) if trips_compatible(previous, &trip, config));
        if bridged {
            out.pop();
            if let Some(TimelineEvent::Trip(previous)) = out.last_mut() {
                *previous = combine_trips(previous, &trip, config);
                continue;
            }
        }

        out.push(TimelineEvent::Trip(trip));
    }
    out
}
