use serde::{Deserialize, Serialize};

use crate::error::{TimelineError, TimelineResult};
use crate::timeline::gap::GapPolicy;

/// Which trip classifier/merger runs after segmentation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TripAlgorithm {
    /// Each raw trip stays one trip.
    Single,
    /// Trips may be split at internal stops and merged across short ones.
    Multiple,
}

impl Default for TripAlgorithm {
    fn default() -> Self {
        TripAlgorithm::Single
    }
}

impl TripAlgorithm {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "single" => Some(TripAlgorithm::Single),
            "multiple" => Some(TripAlgorithm::Multiple),
            _ => None,
        }
    }
}

/// Configuration for timeline generation with tunable thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Maximum spread of points that still count as one place
    pub staypoint_radius_meters: f64,
    /// A cluster must span at least this long to become a stay
    pub staypoint_min_duration_secs: i64,
    /// Minimum accurate points for a cluster to be trusted
    pub staypoint_min_points: usize,
    /// Reported speed above this disqualifies a point from a stay cluster
    pub staypoint_velocity_threshold_kmh: f64,
    pub use_velocity_accuracy: bool,
    /// Points reporting worse accuracy never move a centroid
    pub staypoint_max_accuracy_meters: f64,
    /// Share of points that must carry (good) accuracy; below it the
    /// cohesion test falls back to distance only
    pub staypoint_min_accuracy_ratio: f64,
    /// Consecutive outside points needed before a stay is left
    pub stay_exit_points: usize,

    pub trip_algorithm: TripAlgorithm,

    /// Travel type bands (km/h)
    pub walking_max_avg_speed_kmh: f64,
    pub walking_max_max_speed_kmh: f64,
    pub car_min_avg_speed_kmh: f64,
    pub car_min_max_speed_kmh: f64,
    /// Legs faster than this are treated as GPS errors
    pub max_plausible_speed_kmh: f64,
    pub speed_smoothing_window: usize,
    /// Percentile used as the robust "max speed" of a trip
    pub speed_percentile: f64,

    /// Shorter trips are folded into a neighbouring stay
    pub min_trip_distance_meters: f64,
    pub min_trip_duration_secs: i64,

    pub merge_enabled: bool,
    /// Drift-scale displacement under which neighbours merge
    pub merge_max_distance_meters: f64,
    /// Longest in-between event a merge may swallow
    pub merge_max_time_gap_secs: i64,

    /// Silence longer than this interrupts the open segment
    pub data_gap_threshold_secs: i64,
    /// Interruptions shorter than this are absorbed instead of reported
    pub data_gap_min_duration_secs: i64,

    pub path_simplification_enabled: bool,
    pub path_simplification_tolerance_meters: f64,
    pub path_max_points: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            staypoint_radius_meters: 50.0,
            staypoint_min_duration_secs: 420,
            staypoint_min_points: 3,
            staypoint_velocity_threshold_kmh: 8.0,
            use_velocity_accuracy: true,
            staypoint_max_accuracy_meters: 60.0,
            staypoint_min_accuracy_ratio: 0.5,
            stay_exit_points: 2,
            trip_algorithm: TripAlgorithm::Single,
            walking_max_avg_speed_kmh: 8.0,
            walking_max_max_speed_kmh: 13.0,
            car_min_avg_speed_kmh: 10.0,
            car_min_max_speed_kmh: 20.0,
            max_plausible_speed_kmh: 170.0,
            speed_smoothing_window: 3,
            speed_percentile: 95.0,
            min_trip_distance_meters: 50.0,
            min_trip_duration_secs: 60,
            merge_enabled: true,
            merge_max_distance_meters: 100.0,
            merge_max_time_gap_secs: 300,
            data_gap_threshold_secs: 900,
            data_gap_min_duration_secs: 1800,
            path_simplification_enabled: true,
            path_simplification_tolerance_meters: 15.0,
            path_max_points: 100,
        }
    }
}

impl TimelineConfig {
    /// Reject thresholds that cannot drive a run. Called before streaming.
    pub fn validate(&self) -> TimelineResult<()> {
        let positive = [
            ("staypoint_radius_meters", self.staypoint_radius_meters),
            (
                "staypoint_velocity_threshold_kmh",
                self.staypoint_velocity_threshold_kmh,
            ),
            (
                "staypoint_max_accuracy_meters",
                self.staypoint_max_accuracy_meters,
            ),
            ("walking_max_avg_speed_kmh", self.walking_max_avg_speed_kmh),
            ("walking_max_max_speed_kmh", self.walking_max_max_speed_kmh),
            ("car_min_avg_speed_kmh", self.car_min_avg_speed_kmh),
            ("car_min_max_speed_kmh", self.car_min_max_speed_kmh),
            ("max_plausible_speed_kmh", self.max_plausible_speed_kmh),
            ("merge_max_distance_meters", self.merge_max_distance_meters),
            (
                "path_simplification_tolerance_meters",
                self.path_simplification_tolerance_meters,
            ),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("{name} must be a positive number, got {value}")));
            }
        }

        let non_negative_secs = [
            ("staypoint_min_duration_secs", self.staypoint_min_duration_secs),
            ("min_trip_duration_secs", self.min_trip_duration_secs),
            ("merge_max_time_gap_secs", self.merge_max_time_gap_secs),
        ];
        for (name, value) in non_negative_secs {
            if value < 0 {
                return Err(invalid(format!("{name} must not be negative, got {value}")));
            }
        }

        if !self.min_trip_distance_meters.is_finite() || self.min_trip_distance_meters < 0.0 {
            return Err(invalid(format!(
                "min_trip_distance_meters must not be negative, got {}",
                self.min_trip_distance_meters
            )));
        }
        if self.staypoint_min_points == 0 {
            return Err(invalid("staypoint_min_points must be at least 1".to_string()));
        }
        if self.stay_exit_points == 0 {
            return Err(invalid("stay_exit_points must be at least 1".to_string()));
        }
        if self.path_max_points < 2 {
            return Err(invalid(format!(
                "path_max_points must keep both endpoints, got {}",
                self.path_max_points
            )));
        }
        if !(0.0..=1.0).contains(&self.staypoint_min_accuracy_ratio) {
            return Err(invalid(format!(
                "staypoint_min_accuracy_ratio must be within [0, 1], got {}",
                self.staypoint_min_accuracy_ratio
            )));
        }
        if !(0.0..=100.0).contains(&self.speed_percentile) {
            return Err(invalid(format!(
                "speed_percentile must be within [0, 100], got {}",
                self.speed_percentile
            )));
        }
        if self.walking_max_avg_speed_kmh > self.walking_max_max_speed_kmh {
            return Err(invalid(
                "walking_max_avg_speed_kmh exceeds walking_max_max_speed_kmh".to_string(),
            ));
        }
        if self.walking_max_avg_speed_kmh > self.car_min_avg_speed_kmh
            && self.walking_max_max_speed_kmh > self.car_min_max_speed_kmh
        {
            return Err(invalid(
                "walking and car speed bands overlap; a trip could be both".to_string(),
            ));
        }
        if self.data_gap_threshold_secs <= 0 {
            return Err(invalid(format!(
                "data_gap_threshold_secs must be positive, got {}",
                self.data_gap_threshold_secs
            )));
        }
        if self.data_gap_min_duration_secs < self.data_gap_threshold_secs {
            return Err(invalid(format!(
                "data_gap_min_duration_secs ({}) is below data_gap_threshold_secs ({})",
                self.data_gap_min_duration_secs, self.data_gap_threshold_secs
            )));
        }
        GapPolicy::new(self.data_gap_threshold_secs, self.data_gap_min_duration_secs)?;

        Ok(())
    }

    /// Copy with every `Some` field of `overrides` applied.
    pub fn with_overrides(&self, overrides: &TimelineConfigOverrides) -> Self {
        let mut config = self.clone();
        overrides.apply_to(&mut config);
        config
    }
}

fn invalid(message: String) -> TimelineError {
    TimelineError::InvalidConfig(message)
}

/// Per-user overrides; only fields that are set take effect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfigOverrides {
    pub staypoint_radius_meters: Option<f64>,
    pub staypoint_min_duration_secs: Option<i64>,
    pub staypoint_min_points: Option<usize>,
    pub staypoint_velocity_threshold_kmh: Option<f64>,
    pub use_velocity_accuracy: Option<bool>,
    pub staypoint_max_accuracy_meters: Option<f64>,
    pub staypoint_min_accuracy_ratio: Option<f64>,
    pub stay_exit_points: Option<usize>,
    pub trip_algorithm: Option<TripAlgorithm>,
    pub walking_max_avg_speed_kmh: Option<f64>,
    pub walking_max_max_speed_kmh: Option<f64>,
    pub car_min_avg_speed_kmh: Option<f64>,
    pub car_min_max_speed_kmh: Option<f64>,
    pub max_plausible_speed_kmh: Option<f64>,
    pub speed_smoothing_window: Option<usize>,
    pub speed_percentile: Option<f64>,
    pub min_trip_distance_meters: Option<f64>,
    pub min_trip_duration_secs: Option<i64>,
    pub merge_enabled: Option<bool>,
    pub merge_max_distance_meters: Option<f64>,
    pub merge_max_time_gap_secs: Option<i64>,
    pub data_gap_threshold_secs: Option<i64>,
    pub data_gap_min_duration_secs: Option<i64>,
    pub path_simplification_enabled: Option<bool>,
    pub path_simplification_tolerance_meters: Option<f64>,
    pub path_max_points: Option<usize>,
}

macro_rules! apply_override {
    ($config:ident, $overrides:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $overrides.$field {
                $config.$field = value;
            }
        )+
    };
}

impl TimelineConfigOverrides {
    pub fn apply_to(&self, config: &mut TimelineConfig) {
        let overrides = self;
        apply_override!(
            config,
            overrides,
            staypoint_radius_meters,
            staypoint_min_duration_secs,
            staypoint_min_points,
            staypoint_velocity_threshold_kmh,
            use_velocity_accuracy,
            staypoint_max_accuracy_meters,
            staypoint_min_accuracy_ratio,
            stay_exit_points,
            trip_algorithm,
            walking_max_avg_speed_kmh,
            walking_max_max_speed_kmh,
            car_min_avg_speed_kmh,
            car_min_max_speed_kmh,
            max_plausible_speed_kmh,
            speed_smoothing_window,
            speed_percentile,
            min_trip_distance_meters,
            min_trip_duration_secs,
            merge_enabled,
            merge_max_distance_meters,
            merge_max_time_gap_secs,
            data_gap_threshold_secs,
            data_gap_min_duration_secs,
            path_simplification_enabled,
            path_simplification_tolerance_meters,
            path_max_points,
        );
    }
}
