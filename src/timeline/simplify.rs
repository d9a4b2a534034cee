//! Ramer-Douglas-Peucker simplification of trip paths.
//!
//! Vertices are projected onto a local equirectangular plane (meters,
//! origin at the first vertex) so the tolerance is a ground distance.
//! When the tolerance alone leaves too many vertices it is doubled until
//! the path fits; endpoints are always kept.

use crate::models::{PathPoint, TimelineEvent};
use crate::timeline::config::TimelineConfig;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
/// Tolerance doublings tried before falling back to even decimation.
const MAX_TOLERANCE_DOUBLINGS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct PlanePoint {
    x: f64,
    y: f64,
}

impl PlanePoint {
    fn distance_to(&self, other: &PlanePoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    fn perpendicular_distance(&self, line_start: &PlanePoint, line_end: &PlanePoint) -> f64 {
        let dx = line_end.x - line_start.x;
        let dy = line_end.y - line_start.y;
        let line_length_sq = dx * dx + dy * dy;

        if line_length_sq < 1e-10 {
            return self.distance_to(line_start);
        }
        ((self.x - line_start.x) * dy - (self.y - line_start.y) * dx).abs() / line_length_sq.sqrt()
    }
}

fn project(path: &[PathPoint]) -> Vec<PlanePoint> {
    let Some(origin) = path.first() else {
        return Vec::new();
    };
    let lat0 = origin.latitude.to_radians();
    let cos_lat0 = lat0.cos();

    path.iter()
        .map(|p| PlanePoint {
            x: (p.longitude - origin.longitude).to_radians() * cos_lat0 * EARTH_RADIUS_METERS,
            y: (p.latitude - origin.latitude).to_radians() * EARTH_RADIUS_METERS,
        })
        .collect()
}

pub struct PathSimplifier {
    pub tolerance_meters: f64,
    pub max_points: usize,
}

impl PathSimplifier {
    pub fn new(tolerance_meters: f64, max_points: usize) -> Self {
        Self {
            tolerance_meters,
            max_points: max_points.max(2),
        }
    }

    pub fn from_config(config: &TimelineConfig) -> Self {
        Self::new(
            config.path_simplification_tolerance_meters,
            config.path_max_points,
        )
    }

    pub fn simplify(&self, path: &[PathPoint]) -> Vec<PathPoint> {
        if path.len() <= 2 {
            return path.to_vec();
        }

        let plane = project(path);
        let mut epsilon = self.tolerance_meters;
        for _ in 0..=MAX_TOLERANCE_DOUBLINGS {
            let kept = rdp_keep(&plane, epsilon);
            if kept.len() <= self.max_points {
                return kept.into_iter().map(|i| path[i]).collect();
            }
            epsilon *= 2.0;
        }

        decimate(path, self.max_points)
    }
}

/// Indices kept by RDP at `epsilon`, in order.
fn rdp_keep(points: &[PlanePoint], epsilon: f64) -> Vec<usize> {
    let last = points.len() - 1;
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[last] = true;

    let mut pending = vec![(0, last)];
    while let Some((start, end)) = pending.pop() {
        if end <= start + 1 {
            continue;
        }

        let mut max_dist = 0.0;
        let mut max_index = start;
        for i in start + 1..end {
            let dist = points[i].perpendicular_distance(&points[start], &points[end]);
            if dist > max_dist {
                max_dist = dist;
                max_index = i;
            }
        }

        if max_dist > epsilon {
            keep[max_index] = true;
            pending.push((start, max_index));
            pending.push((max_index, end));
        }
    }

    keep.iter()
        .enumerate()
        .filter_map(|(i, kept)| kept.then_some(i))
        .collect()
}

/// Evenly spaced vertices including both endpoints.
fn decimate(path: &[PathPoint], max_points: usize) -> Vec<PathPoint> {
    if path.len() <= max_points {
        return path.to_vec();
    }
    let step = (path.len() - 1) as f64 / (max_points - 1) as f64;
    (0..max_points)
        .map(|i| path[(i as f64 * step).round() as usize])
        .collect()
}

/// Simplify the path of every trip. Distances and speeds are left as
/// measured on the full path.
pub fn simplify_trip_paths(events: Vec<TimelineEvent>, config: &TimelineConfig) -> Vec<TimelineEvent> {
    if !config.path_simplification_enabled {
        return events;
    }
    let simplifier = PathSimplifier::from_config(config);
    events
        .into_iter()
        .map(|event| match event {
            TimelineEvent::Trip(mut trip) => {
                trip.path = simplifier.simplify(&trip.path);
                TimelineEvent::Trip(trip)
            }
            other => other,
        })
        .collect()
}
