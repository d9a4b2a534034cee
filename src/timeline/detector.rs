//! Raw event extraction: turns an ordered point stream into contiguous
//! Stay / Trip / DataGap candidates.
//!
//! Design: push-based state machine
//! - `push` consumes one point at a time, so the detector only holds the
//!   open segment, never the whole history of points
//! - a trip keeps a look-back candidate cluster at its tail; once that
//!   cluster is cohesive, long enough and reliable it becomes a stay and
//!   the trip ends at its first point
//! - a stay keeps a look-forward buffer of outside points; drift that
//!   comes back inside the radius is absorbed, a sustained exit ends the
//!   stay at its last inside point
//! - silence beyond the gap policy closes whatever is open

use serde::Serialize;

use crate::error::TimelineResult;
use crate::models::{
    ensure_contiguous, Coordinate, DataGap, GpsPoint, PathPoint, Stay, TimelineEvent, Trip,
};
use crate::timeline::config::TimelineConfig;
use crate::timeline::gap::GapPolicy;
use crate::timeline::velocity::{haversine_meters, path_length_meters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectorState {
    InStay,
    InTrip,
    /// No data yet, or the last point arrived after a reported gap.
    InGap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorStats {
    pub points_accepted: u64,
    pub points_skipped: u64,
    pub drift_points_absorbed: u64,
    pub gaps_reported: u64,
    /// Full passes over the stay candidate to re-establish its spread.
    pub cohesion_rescans: u64,
}

struct OpenStay {
    start: GpsPoint,
    end: chrono::DateTime<chrono::Utc>,
    /// Last accurate point inside the radius; a departing trip starts here.
    anchor: GpsPoint,
    lat_sum: f64,
    lon_sum: f64,
    weight: usize,
    departures: Vec<GpsPoint>,
    /// Accurate points among `departures`.
    outside: usize,
}

impl OpenStay {
    fn centroid(&self) -> Coordinate {
        Coordinate::new(
            self.lat_sum / self.weight as f64,
            self.lon_sum / self.weight as f64,
        )
    }

    fn absorb(&mut self, point: GpsPoint) {
        self.lat_sum += point.latitude;
        self.lon_sum += point.longitude;
        self.weight += 1;
        self.end = point.timestamp;
        self.anchor = point;
    }

    /// Anchor moved to the stay's end time: first vertex of a departing trip.
    fn departure_origin(&self) -> GpsPoint {
        GpsPoint {
            timestamp: self.end,
            ..self.anchor.clone()
        }
    }
}

/// Cluster forming at the tail of an open trip: `points[start..]`.
/// Sums cover the accurate members only.
struct Candidate {
    start: usize,
    accurate: usize,
    lat_sum: f64,
    lon_sum: f64,
    /// Upper bound on the distance of any accurate member from the centroid.
    spread_bound: f64,
}

impl Candidate {
    fn empty(start: usize) -> Self {
        Self {
            start,
            accurate: 0,
            lat_sum: 0.0,
            lon_sum: 0.0,
            spread_bound: 0.0,
        }
    }

    fn centroid(&self) -> Option<Coordinate> {
        (self.accurate > 0).then(|| {
            Coordinate::new(
                self.lat_sum / self.accurate as f64,
                self.lon_sum / self.accurate as f64,
            )
        })
    }

    fn add(&mut self, point: &GpsPoint) {
        self.lat_sum += point.latitude;
        self.lon_sum += point.longitude;
        self.accurate += 1;
    }
}

struct OpenTrip {
    points: Vec<GpsPoint>,
    candidate: Candidate,
}

impl OpenTrip {
    /// Points before `floor` never join the stay candidate.
    fn new(floor: usize) -> Self {
        Self {
            points: Vec::new(),
            candidate: Candidate::empty(floor),
        }
    }
}

#[derive(Default)]
enum OpenSegment {
    #[default]
    Empty,
    Stay(OpenStay),
    Trip(OpenTrip),
}

pub struct SegmentDetector {
    config: TimelineConfig,
    gap_policy: GapPolicy,
    open: OpenSegment,
    state: DetectorState,
    last: Option<GpsPoint>,
    events: Vec<TimelineEvent>,
    stats: DetectorStats,
}

impl SegmentDetector {
    pub fn new(config: &TimelineConfig) -> TimelineResult<Self> {
        Ok(Self {
            config: config.clone(),
            gap_policy: GapPolicy::new(
                config.data_gap_threshold_secs,
                config.data_gap_min_duration_secs,
            )?,
            open: OpenSegment::Empty,
            state: DetectorState::InGap,
            last: None,
            events: Vec::new(),
            stats: DetectorStats::default(),
        })
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    /// Events closed so far; the open segment is not included.
    pub fn closed_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Feed the next point. Points not strictly after the previous one are skipped.
    pub fn push(&mut self, point: GpsPoint) {
        if let Some(last) = &self.last {
            if point.timestamp <= last.timestamp {
                self.stats.points_skipped += 1;
                return;
            }

            if let Some(gap) = self.gap_policy.check(last.timestamp, point.timestamp) {
                self.close_open();
                self.push_gap(gap);
                self.stats.points_accepted += 1;

                let mut trip = OpenTrip::new(0);
                trip.points.push(point.clone());
                self.refresh_candidate(&mut trip);
                self.open = OpenSegment::Trip(trip);
                self.state = DetectorState::InGap;
                self.last = Some(point);
                return;
            }
        }

        self.stats.points_accepted += 1;
        self.last = Some(point.clone());

        let open = std::mem::take(&mut self.open);
        self.open = self.step(open, point);
        self.state = match self.open {
            OpenSegment::Stay(_) => DetectorState::InStay,
            OpenSegment::Trip(_) => DetectorState::InTrip,
            OpenSegment::Empty => DetectorState::InGap,
        };
    }

    /// Close the open segment at the last point and return every event.
    pub fn finish(mut self) -> TimelineResult<Vec<TimelineEvent>> {
        self.close_open();
        ensure_contiguous(&self.events)?;
        Ok(self.events)
    }

    fn step(&mut self, open: OpenSegment, point: GpsPoint) -> OpenSegment {
        match open {
            OpenSegment::Empty => self.trip_step(OpenTrip::new(0), point),
            OpenSegment::Trip(trip) => self.trip_step(trip, point),
            OpenSegment::Stay(stay) => self.stay_step(stay, point),
        }
    }

    fn trip_step(&mut self, mut trip: OpenTrip, point: GpsPoint) -> OpenSegment {
        trip.points.push(point);
        self.refresh_candidate(&mut trip);

        let Some(cluster_start) = self.confirmed_stay(&trip) else {
            return OpenSegment::Trip(trip);
        };

        let cluster = trip.points.split_off(cluster_start);
        if !trip.points.is_empty() {
            let mut path = trip.points;
            path.push(cluster[0].clone());
            self.emit_trip(&path);
        }

        OpenSegment::Stay(self.open_stay(cluster))
    }

    fn stay_step(&mut self, mut stay: OpenStay, point: GpsPoint) -> OpenSegment {
        if !self.is_accurate(&point) {
            // Too vague to move the centroid or to count as leaving.
            if stay.departures.is_empty() {
                stay.end = point.timestamp;
            } else {
                stay.departures.push(point);
            }
            return OpenSegment::Stay(stay);
        }

        let distance = haversine_meters(stay.centroid(), point.coordinate());
        if distance <= self.config.staypoint_radius_meters {
            if !stay.departures.is_empty() {
                self.stats.drift_points_absorbed += stay.departures.len() as u64;
                stay.departures.clear();
                stay.outside = 0;
            }
            stay.absorb(point);
            return OpenSegment::Stay(stay);
        }

        stay.departures.push(point);
        stay.outside += 1;
        if stay.outside < self.config.stay_exit_points {
            return OpenSegment::Stay(stay);
        }

        self.emit_stay(&stay);

        let mut trip = OpenTrip::new(1);
        trip.points.push(stay.departure_origin());
        let mut open = OpenSegment::Trip(trip);
        for departed in std::mem::take(&mut stay.departures) {
            open = self.step(open, departed);
        }
        open
    }

    /// Add the newest point to the tail cluster, then move the cluster
    /// start forward until every accurate member lies within the radius of
    /// the accurate centroid.
    ///
    /// The spread is tracked as an upper bound: each accurate arrival adds
    /// the centroid's drift, and a full pass over the members only runs once
    /// the bound exceeds the radius. A cluster that never settles into a
    /// stay therefore costs amortised O(1) per point.
    fn refresh_candidate(&mut self, trip: &mut OpenTrip) {
        let len = trip.points.len();
        let newest = &trip.points[len - 1];
        if self.exceeds_stay_velocity(newest) {
            trip.candidate = Candidate::empty(len);
            return;
        }
        // inaccurate members neither move the centroid nor break cohesion
        if !self.is_accurate(newest) {
            return;
        }

        let candidate = &mut trip.candidate;
        let before = candidate.centroid();
        candidate.add(newest);
        let Some(after) = candidate.centroid() else {
            return;
        };
        let drift = before.map_or(0.0, |c| haversine_meters(c, after));
        candidate.spread_bound =
            (candidate.spread_bound + drift).max(haversine_meters(newest.coordinate(), after));

        if candidate.spread_bound > self.config.staypoint_radius_meters {
            self.shrink_candidate(trip);
        }
    }

    fn shrink_candidate(&mut self, trip: &mut OpenTrip) {
        let last = trip.points.len() - 1;
        loop {
            self.stats.cohesion_rescans += 1;

            let mut rebuilt = Candidate::empty(trip.candidate.start);
            let members = &trip.points[rebuilt.start..];
            for point in members.iter().filter(|p| self.is_accurate(p)) {
                rebuilt.add(point);
            }
            if let Some(center) = rebuilt.centroid() {
                rebuilt.spread_bound = members
                    .iter()
                    .filter(|p| self.is_accurate(p))
                    .map(|p| haversine_meters(p.coordinate(), center))
                    .fold(0.0, f64::max);
            }

            let settled = rebuilt.spread_bound <= self.config.staypoint_radius_meters
                || rebuilt.start >= last;
            trip.candidate = rebuilt;
            if settled {
                return;
            }
            trip.candidate.start += 1;
        }
    }

    fn confirmed_stay(&self, trip: &OpenTrip) -> Option<usize> {
        let start = trip.candidate.start;
        let (first, last) = (trip.points.get(start)?, trip.points.last()?);

        let span = (last.timestamp - first.timestamp).num_seconds();
        if span < self.config.staypoint_min_duration_secs {
            return None;
        }
        let members = trip.points.len() - start;
        self.is_reliable(trip.candidate.accurate, members)
            .then_some(start)
    }

    /// Enough trustworthy points to call the cluster a stay. Points that
    /// report no accuracy count as accurate, which makes the test
    /// distance-only when a source never reports accuracy.
    fn is_reliable(&self, accurate: usize, members: usize) -> bool {
        if accurate < self.config.staypoint_min_points {
            return false;
        }
        accurate as f64 / members as f64 >= self.config.staypoint_min_accuracy_ratio
    }

    fn is_accurate(&self, point: &GpsPoint) -> bool {
        point
            .accuracy
            .map_or(true, |meters| meters <= self.config.staypoint_max_accuracy_meters)
    }

    fn exceeds_stay_velocity(&self, point: &GpsPoint) -> bool {
        self.config.use_velocity_accuracy
            && point
                .speed
                .is_some_and(|kmh| kmh > self.config.staypoint_velocity_threshold_kmh)
    }

    fn open_stay(&self, cluster: Vec<GpsPoint>) -> OpenStay {
        let mut lat_sum = 0.0;
        let mut lon_sum = 0.0;
        let mut weight = 0;
        let mut anchor = cluster[0].clone();
        for point in cluster.iter().filter(|p| self.is_accurate(p)) {
            lat_sum += point.latitude;
            lon_sum += point.longitude;
            weight += 1;
            anchor = point.clone();
        }

        OpenStay {
            start: cluster[0].clone(),
            end: cluster[cluster.len() - 1].timestamp,
            anchor,
            lat_sum,
            lon_sum,
            weight,
            departures: Vec::new(),
            outside: 0,
        }
    }

    fn close_open(&mut self) {
        match std::mem::take(&mut self.open) {
            OpenSegment::Empty => {}
            OpenSegment::Trip(trip) => self.emit_trip(&trip.points),
            OpenSegment::Stay(stay) => {
                self.emit_stay(&stay);
                if !stay.departures.is_empty() {
                    let mut path = vec![stay.departure_origin()];
                    path.extend(stay.departures.iter().cloned());
                    self.emit_trip(&path);
                }
            }
        }
    }

    /// A lone fix between two silences extends the earlier gap.
    fn push_gap(&mut self, gap: DataGap) {
        if let Some(TimelineEvent::DataGap(previous)) = self.events.last_mut() {
            if previous.end == gap.start {
                previous.end = gap.end;
                return;
            }
        }
        self.events.push(TimelineEvent::DataGap(gap));
        self.stats.gaps_reported += 1;
    }

    fn emit_stay(&mut self, stay: &OpenStay) {
        if stay.end <= stay.start.timestamp {
            return;
        }
        self.events.push(TimelineEvent::Stay(Stay::new(
            stay.start.timestamp,
            stay.end,
            stay.centroid(),
        )));
    }

    fn emit_trip(&mut self, points: &[GpsPoint]) {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            return;
        };
        if last.timestamp <= first.timestamp {
            return;
        }

        let path: Vec<PathPoint> = points.iter().map(PathPoint::from).collect();
        let mut trip = Trip::from_path(first.timestamp, last.timestamp, path);
        trip.distance_meters = path_length_meters(&trip.path);
        self.events.push(TimelineEvent::Trip(trip));
    }
}

/// Run the detector over an in-memory point list.
pub fn detect_segments(
    points: impl IntoIterator<Item = GpsPoint>,
    config: &TimelineConfig,
) -> TimelineResult<Vec<TimelineEvent>> {
    let mut detector = SegmentDetector::new(config)?;
    for point in points {
        detector.push(point);
    }
    detector.finish()
}
