use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sports_forecast::config::{DataConfig, FeatureConfig, TrainConfig};
use sports_forecast::dataset::TrainingDataset;
use sports_forecast::features::{FeatureSchema, build_features};
use sports_forecast::ingest::load_csv_reader;
use sports_forecast::match_record::{MatchRecord, TeamId};
use sports_forecast::outcome::OutcomeSet;
use sports_forecast::training::train;

const TEAMS: usize = 20;
const ROUNDS: usize = 38;

fn season() -> Vec<MatchRecord> {
    let mut rng = StdRng::seed_from_u64(2024);
    let start = NaiveDate::from_ymd_opt(2023, 8, 12).unwrap();
    let teams: Vec<TeamId> = (0..TEAMS)
        .filter_map(|i| TeamId::parse(&format!("Team {i:02}")))
        .collect();
    let mut out = Vec::new();
    for round in 0..ROUNDS {
        let date = start + Duration::days(7 * round as i64);
        for i in 0..TEAMS / 2 {
            let h = (round + i) % TEAMS;
            let a = (round + TEAMS - 1 - i) % TEAMS;
            let edge = h as i32 - a as i32 + rng.gen_range(-12..=12);
            out.push(MatchRecord {
                date,
                home: teams[h].clone(),
                away: teams[a].clone(),
                home_goals: if edge > 0 { 2 } else { 1 },
                away_goals: if edge < 0 { 2 } else { 1 },
                odds: None,
            });
        }
    }
    out
}

fn season_csv(matches: &[MatchRecord]) -> String {
    let mut out = String::from("date,home_team,away_team,home_goals,away_goals\n");
    for m in matches {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            m.date, m.home, m.away, m.home_goals, m.away_goals
        ));
    }
    out
}

fn bench_ingest_csv(c: &mut Criterion) {
    let csv = season_csv(&season());
    let cfg = DataConfig::default();
    c.bench_function("ingest_csv_season", |b| {
        b.iter(|| {
            let batch = load_csv_reader(black_box(csv.as_bytes()), &cfg).unwrap();
            black_box(batch.matches.len());
        })
    });
}

fn bench_build_features(c: &mut Criterion) {
    let matches = season();
    let cfg = FeatureConfig::default();
    let as_of = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    c.bench_function("build_features_season", |b| {
        b.iter(|| {
            let vectors = build_features(black_box(&matches), as_of, &cfg).unwrap();
            black_box(vectors.len());
        })
    });
}

fn bench_train(c: &mut Criterion) {
    let matches = season();
    let cfg = FeatureConfig::default();
    let as_of = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    let vectors = build_features(&matches, as_of, &cfg).unwrap();
    let schema = FeatureSchema::from_catalog(&cfg.catalog).unwrap();
    let dataset =
        TrainingDataset::from_matches(schema, OutcomeSet::ThreeWay, &matches, vectors).unwrap();
    let train_cfg = TrainConfig::default();

    let mut group = c.benchmark_group("train");
    group.sample_size(10);
    group.bench_function("softmax_season", |b| {
        b.iter(|| {
            let outcome = train(black_box(&dataset), &train_cfg).unwrap();
            black_box(outcome.report.validation.log_loss);
        })
    });
    group.finish();
}

criterion_group!(perf, bench_ingest_csv, bench_build_features, bench_train);
criterion_main!(perf);
