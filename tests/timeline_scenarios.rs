mod common;

use chrono::Duration;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{at_minute, dwell, fix, kinds, walk, HOME_LAT, HOME_LON, METERS_PER_DEGREE_LAT};
use timeline_engine_lib::error::TimelineError;
use timeline_engine_lib::models::{ensure_contiguous, GpsPoint, TravelType};
use timeline_engine_lib::timeline::{build_timeline, TimelineConfig, TripAlgorithm};

fn config_for(algorithm: TripAlgorithm) -> TimelineConfig {
    TimelineConfig {
        trip_algorithm: algorithm,
        ..Default::default()
    }
}

#[test]
fn overnight_stay_then_gap_then_walk() {
    // 12 h at home every 5 minutes, 50 minutes of silence, then a 1.5 km walk
    let mut points = dwell(0, 720, 5, 0.0);
    points.extend(walk(770, 16, 0.0, 100.0));

    for algorithm in [TripAlgorithm::Single, TripAlgorithm::Multiple] {
        let events = build_timeline("alice", points.clone(), &config_for(algorithm)).unwrap();
        assert_eq!(kinds(&events), vec!["stay", "data_gap", "trip"], "{algorithm:?}");

        let stay = events[0].as_stay().unwrap();
        assert_eq!(stay.start, at_minute(0));
        assert_eq!(stay.end, at_minute(720));
        assert!((stay.latitude - HOME_LAT).abs() < 1e-9);
        assert!((stay.longitude - HOME_LON).abs() < 1e-9);

        let gap = events[1].as_gap().unwrap();
        assert_eq!(gap.duration(), Duration::minutes(50));

        let trip = events[2].as_trip().unwrap();
        assert_eq!(trip.travel_type, TravelType::Walk);
        assert!((trip.distance_meters - 1500.0).abs() < 5.0, "{}", trip.distance_meters);
        assert_eq!(trip.duration(), Duration::minutes(15));
        assert_eq!(trip.path.len(), 2, "straight walk simplifies to its endpoints");
    }
}

#[test]
fn trips_on_both_sides_of_a_gap_stay_separate() {
    // 10 minutes over 1 km, silent until 11:00, then 15 minutes over 1.5 km
    let mut points = walk(0, 11, 0.0, 100.0);
    points.extend(walk(60, 16, 1000.0, 100.0));

    for algorithm in [TripAlgorithm::Single, TripAlgorithm::Multiple] {
        let events = build_timeline("alice", points.clone(), &config_for(algorithm)).unwrap();
        assert_eq!(kinds(&events), vec!["trip", "data_gap", "trip"], "{algorithm:?}");
        assert_eq!(events[0].duration(), Duration::minutes(10));
        assert_eq!(events[1].duration(), Duration::minutes(50));
        assert_eq!(events[2].duration(), Duration::minutes(15));
        assert!(ensure_contiguous(&events).is_ok());
    }
}

#[test]
fn jittery_fixes_at_one_place_stay_one_stay() {
    let mut rng = StdRng::seed_from_u64(11);
    let points: Vec<GpsPoint> = (0..=180)
        .map(|minute| {
            let mut point = fix(minute, rng.gen_range(-15.0..15.0));
            point.longitude += rng.gen_range(-15.0..15.0) / METERS_PER_DEGREE_LAT;
            point.accuracy = Some(rng.gen_range(5.0..40.0));
            point
        })
        .collect();

    let events = build_timeline("alice", points, &TimelineConfig::default()).unwrap();
    assert_eq!(kinds(&events), vec!["stay"]);

    let stay = events[0].as_stay().unwrap();
    assert_eq!(stay.duration(), Duration::minutes(180));
    assert!((stay.latitude - HOME_LAT).abs() * METERS_PER_DEGREE_LAT < 5.0);
}

#[test]
fn commute_between_two_places() {
    let mut points = dwell(0, 60, 1, 0.0);
    // 10 km drive over 12 minutes
    points.extend((1..=12).map(|i| fix(60 + i, i as f64 * 10_000.0 / 12.0)));
    points.extend(dwell(73, 180, 1, 10_000.0));

    let events = build_timeline("alice", points, &TimelineConfig::default()).unwrap();
    assert_eq!(kinds(&events), vec!["stay", "trip", "stay"]);

    let trip = events[1].as_trip().unwrap();
    assert_eq!(trip.travel_type, TravelType::Car);
    assert_eq!(trip.start, at_minute(60));
    assert_eq!(trip.end, at_minute(72));
}

#[test]
fn gps_drift_inside_a_stay_is_ignored() {
    let mut points = dwell(0, 240, 1, 0.0);
    // a wild fix every half hour
    for minute in (30..240).step_by(30) {
        points[minute] = fix(minute as i64, 350.0);
    }

    let events = build_timeline("alice", points, &TimelineConfig::default()).unwrap();
    assert_eq!(kinds(&events), vec!["stay"]);
    assert_eq!(events[0].duration(), Duration::minutes(240));
}

#[test]
fn multiple_mode_splits_at_a_coffee_stop_single_mode_does_not() {
    let mut points = walk(0, 11, 0.0, 100.0);
    // ten minutes stopped, reported as too fast to be a stay by a confused tracker
    points.extend((1..=10).map(|i| fix(10 + i, 1000.0).with_speed(20.0)));
    points.extend(walk(21, 11, 1000.0, 100.0).into_iter().skip(1));

    let single = build_timeline("alice", points.clone(), &config_for(TripAlgorithm::Single)).unwrap();
    assert_eq!(kinds(&single), vec!["trip"]);

    let multiple = build_timeline("alice", points, &config_for(TripAlgorithm::Multiple)).unwrap();
    assert_eq!(kinds(&multiple), vec!["trip", "stay", "trip"]);
    assert!(ensure_contiguous(&multiple).is_ok());
}

#[test]
fn same_input_gives_same_timeline() {
    let mut points = dwell(0, 90, 2, 0.0);
    points.extend(walk(91, 20, 0.0, 90.0));
    points.extend(dwell(111, 200, 2, 1710.0));

    let config = TimelineConfig::default();
    let first = build_timeline("alice", points.clone(), &config).unwrap();
    let second = build_timeline("alice", points, &config).unwrap();
    assert_eq!(first, second);
}

#[test]
fn invalid_config_is_rejected_before_any_work() {
    let config = TimelineConfig {
        path_max_points: 1,
        ..Default::default()
    };
    assert!(build_timeline("alice", dwell(0, 60, 1, 0.0), &config).is_err());
}

#[test]
fn oversized_gap_thresholds_fail_as_invalid_config() {
    let huge = i64::MAX / 100;
    let config = TimelineConfig {
        data_gap_threshold_secs: huge,
        data_gap_min_duration_secs: huge,
        ..Default::default()
    };
    let result = build_timeline("alice", dwell(0, 60, 1, 0.0), &config);
    assert!(matches!(result, Err(TimelineError::InvalidConfig(_))));
}

fn arbitrary_track() -> impl Strategy<Value = Vec<GpsPoint>> {
    prop::collection::vec(
        (
            1i64..5_400,
            -400.0f64..400.0,
            -400.0f64..400.0,
            prop::option::of(3.0f64..150.0),
            prop::option::of(0.0f64..90.0),
        ),
        2..160,
    )
    .prop_map(|steps| {
        let mut elapsed = 0i64;
        let mut north = 0.0;
        let mut east = 0.0;
        steps
            .into_iter()
            .map(|(secs, dn, de, accuracy, speed)| {
                elapsed += secs;
                north += dn;
                east += de;
                let mut point = GpsPoint::new(
                    at_minute(0) + Duration::seconds(elapsed),
                    HOME_LAT + north / METERS_PER_DEGREE_LAT,
                    HOME_LON + east / METERS_PER_DEGREE_LAT,
                );
                point.accuracy = accuracy;
                point.speed = speed;
                point
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn timeline_always_covers_the_track_without_holes(
        points in arbitrary_track(),
        multiple in any::<bool>(),
    ) {
        let algorithm = if multiple { TripAlgorithm::Multiple } else { TripAlgorithm::Single };
        let first = points[0].timestamp;
        let last = points[points.len() - 1].timestamp;

        let events = build_timeline("prop", points, &config_for(algorithm)).unwrap();

        prop_assert!(ensure_contiguous(&events).is_ok());
        prop_assert!(!events.is_empty());
        prop_assert_eq!(events[0].start(), first);
        prop_assert_eq!(events[events.len() - 1].end(), last);
        for event in &events {
            prop_assert!(event.end() > event.start(), "zero-length {}", event.kind());
        }
        for pair in events.windows(2) {
            prop_assert!(!(pair[0].is_gap() && pair[1].is_gap()));
        }
    }
}
