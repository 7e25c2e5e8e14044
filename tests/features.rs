mod common;

use std::collections::BTreeSet;

use sports_forecast::config::FeatureConfig;
use sports_forecast::features::{FeatureSchema, build_features, build_fixture_features};
use sports_forecast::match_record::{Fixture, MatchRecord, TeamId};

use common::{date, fixtures_for_week, synthetic_matches, week_date};

fn single_result() -> Vec<MatchRecord> {
    vec![MatchRecord {
        date: date(2024, 1, 1),
        home: TeamId::parse("A").unwrap(),
        away: TeamId::parse("B").unwrap(),
        home_goals: 2,
        away_goals: 1,
        odds: None,
    }]
}

#[test]
fn first_appearance_falls_back_to_defaults() {
    let cfg = FeatureConfig::default();
    let fixture = Fixture {
        date: date(2024, 1, 2),
        home: TeamId::parse("A").unwrap(),
        away: TeamId::parse("C").unwrap(),
        odds: None,
    };
    let vectors =
        build_fixture_features(&single_result(), &[fixture], date(2024, 1, 2), &cfg).unwrap();

    assert_eq!(vectors.len(), 1);
    let v = &vectors[0];
    assert_eq!(v.get("matches_played_home"), Some(1.0));
    assert_eq!(v.get("matches_played_away"), Some(0.0));
    assert_eq!(v.get("form_points_home"), Some(3.0));
    assert_eq!(
        v.get("form_points_away"),
        Some(cfg.defaults.points_per_match)
    );
    assert!(v.defaults_applied > 0);

    let schema = FeatureSchema::from_catalog(&cfg.catalog).unwrap();
    schema.check(v).unwrap();
}

#[test]
fn every_vector_has_the_catalog_keys() {
    let cfg = FeatureConfig::default();
    let matches = synthetic_matches(12, 3);
    let vectors = build_features(&matches, week_date(12), &cfg).unwrap();
    assert_eq!(vectors.len(), matches.len());

    let expected: BTreeSet<&str> = cfg.catalog.iter().map(String::as_str).collect();
    for v in &vectors {
        let keys: BTreeSet<&str> = v.values.keys().map(String::as_str).collect();
        assert_eq!(keys, expected, "{}", v.subject);
        assert!(v.values.values().all(|x| x.is_finite()));
    }
}

#[test]
fn input_order_does_not_change_the_output() {
    let cfg = FeatureConfig::default();
    let matches = synthetic_matches(10, 5);
    let mut reversed = matches.clone();
    reversed.reverse();

    let a = build_features(&matches, week_date(10), &cfg).unwrap();
    let b = build_features(&reversed, week_date(10), &cfg).unwrap();
    assert_eq!(a, b);
}

#[test]
fn later_results_never_leak_into_earlier_vectors() {
    let cfg = FeatureConfig::default();
    let matches = synthetic_matches(10, 9);
    let mut altered = matches.clone();
    for m in altered.iter_mut().filter(|m| m.date >= week_date(6)) {
        m.home_goals = 7;
        m.away_goals = 0;
    }

    let a = build_features(&matches, week_date(10), &cfg).unwrap();
    let b = build_features(&altered, week_date(10), &cfg).unwrap();
    for (x, y) in a.iter().zip(&b) {
        if x.subject.date <= week_date(6) {
            assert_eq!(x, y, "{}", x.subject);
        }
    }
    assert_ne!(a, b);
}

#[test]
fn as_of_excludes_matches_on_or_after_it() {
    let cfg = FeatureConfig::default();
    let matches = synthetic_matches(6, 1);
    let vectors = build_features(&matches, week_date(4), &cfg).unwrap();
    assert_eq!(vectors.len(), 16);
    assert!(vectors.iter().all(|v| v.subject.date < week_date(4)));
}

#[test]
fn fixture_vectors_only_see_history_before_as_of() {
    let cfg = FeatureConfig::default();
    let matches = synthetic_matches(8, 2);
    let fixtures = fixtures_for_week(8);

    let early = build_fixture_features(&matches, &fixtures, week_date(4), &cfg).unwrap();
    let truncated: Vec<_> = matches
        .iter()
        .filter(|m| m.date < week_date(4))
        .cloned()
        .collect();
    let same = build_fixture_features(&truncated, &fixtures, week_date(4), &cfg).unwrap();
    assert_eq!(early, same);

    let late = build_fixture_features(&matches, &fixtures, week_date(9), &cfg).unwrap();
    assert_ne!(early, late);
}

#[test]
fn custom_catalog_restricts_the_keys() {
    let cfg = FeatureConfig {
        catalog: vec!["elo_diff".to_string(), "h2h_matches".to_string()],
        ..FeatureConfig::default()
    };
    let vectors = build_features(&synthetic_matches(3, 4), week_date(3), &cfg).unwrap();
    for v in vectors {
        assert_eq!(v.values.len(), 2);
        assert!(v.get("elo_diff").is_some());
    }
}
