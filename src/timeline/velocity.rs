//! Distance, speed and robust statistics over point sequences.
//!
//! Everything here is pure: no state, no allocation beyond the returned
//! vectors, and never a division by a zero interval.

use chrono::{DateTime, Utc};

use crate::models::{Coordinate, GpsPoint, PathPoint};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
const MPS_TO_KMH: f64 = 3.6;

/// Great-circle distance in meters.
pub fn haversine_meters(a: Coordinate, b: Coordinate) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(b.latitude - a.latitude);
    let dlon = to_rad(b.longitude - a.longitude);
    let h = (dlat / 2.0).sin().powi(2)
        + to_rad(a.latitude).cos() * to_rad(b.latitude).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Speed in km/h needed to cover `meters` between two instants.
/// Zero when the interval is empty or runs backwards.
pub fn speed_kmh_between(
    meters: f64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> f64 {
    let elapsed_secs = (to - from).num_milliseconds() as f64 / 1000.0;
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    meters / elapsed_secs * MPS_TO_KMH
}

/// Instantaneous speed between two fixes in km/h.
pub fn point_speed_kmh(a: &GpsPoint, b: &GpsPoint) -> f64 {
    speed_kmh_between(
        haversine_meters(a.coordinate(), b.coordinate()),
        a.timestamp,
        b.timestamp,
    )
}

/// Instantaneous speed between two path vertices in km/h.
pub fn path_speed_kmh(a: &PathPoint, b: &PathPoint) -> f64 {
    speed_kmh_between(
        haversine_meters(a.coordinate(), b.coordinate()),
        a.timestamp,
        b.timestamp,
    )
}

/// Speed of each consecutive leg of a path; one shorter than the path.
pub fn leg_speeds_kmh(path: &[PathPoint]) -> Vec<f64> {
    path.windows(2)
        .map(|leg| path_speed_kmh(&leg[0], &leg[1]))
        .collect()
}

pub fn path_length_meters(path: &[PathPoint]) -> f64 {
    path.windows(2)
        .map(|leg| haversine_meters(leg[0].coordinate(), leg[1].coordinate()))
        .sum()
}

/// Centered moving average. The window is clipped at both ends of the
/// sequence, so the output always has the input's length. A window of
/// zero or less returns the input unchanged.
pub fn moving_average(values: &[f64], window: isize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    if window <= 0 {
        return values.to_vec();
    }

    let window = window as usize;
    let behind = window / 2;
    let ahead = window - 1 - behind;
    let last = values.len() - 1;

    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(behind);
            let hi = (i + ahead).min(last);
            let slice = &values[lo..=hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Percentile with linear interpolation between closest ranks.
/// `percentile` is clamped to [0, 100]; NaN values are ignored.
pub fn percentile(values: &[f64], percentile: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = percentile.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// A speed strictly above the ceiling is taken as a GPS error.
pub fn is_suspicious_speed(speed_kmh: f64, ceiling_kmh: f64) -> bool {
    speed_kmh > ceiling_kmh
}

/// Arithmetic mean of coordinates; `None` for an empty set.
pub fn centroid<I>(coordinates: I) -> Option<Coordinate>
where
    I: IntoIterator<Item = Coordinate>,
{
    let (lat_sum, lon_sum, count) = coordinates
        .into_iter()
        .fold((0.0, 0.0, 0usize), |(lat, lon, n), c| {
            (lat + c.latitude, lon + c.longitude, n + 1)
        });
    if count == 0 {
        return None;
    }
    Some(Coordinate::new(lat_sum / count as f64, lon_sum / count as f64))
}
