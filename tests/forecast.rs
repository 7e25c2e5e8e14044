mod common;

use sports_forecast::config::{FeatureConfig, TrainConfig};
use sports_forecast::dataset::TrainingDataset;
use sports_forecast::error::ForecastError;
use sports_forecast::features::{FeatureSchema, build_features, build_fixture_features};
use sports_forecast::forecast::{predict, predict_batch, write_predictions};
use sports_forecast::model::ProbabilisticModel;
use sports_forecast::outcome::OutcomeSet;
use sports_forecast::parquet_io::{ColumnData, read_table};
use sports_forecast::training::train;

use common::{fixtures_for_week, synthetic_matches, week_date};

fn trained() -> (ProbabilisticModel, FeatureConfig) {
    let cfg = FeatureConfig::default();
    let matches = synthetic_matches(20, 21);
    let vectors = build_features(&matches, week_date(20), &cfg).unwrap();
    let schema = FeatureSchema::from_catalog(&cfg.catalog).unwrap();
    let ds =
        TrainingDataset::from_matches(schema, OutcomeSet::ThreeWay, &matches, vectors).unwrap();
    (train(&ds, &TrainConfig::default()).unwrap().model, cfg)
}

#[test]
fn fixture_forecasts_are_valid_distributions() {
    let (model, cfg) = trained();
    let matches = synthetic_matches(20, 21);
    let vectors =
        build_fixture_features(&matches, &fixtures_for_week(20), week_date(20), &cfg).unwrap();
    let forecasts = predict_batch(&model, &vectors).unwrap();

    assert_eq!(forecasts.len(), 4);
    for f in &forecasts {
        let probs = f.distribution.probs();
        assert_eq!(probs.len(), 3);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!(f.distribution.is_valid());
    }
}

#[test]
fn missing_feature_key_is_a_schema_mismatch() {
    let (model, cfg) = trained();
    let matches = synthetic_matches(4, 1);
    let mut fv = build_features(&matches, week_date(4), &cfg).unwrap().remove(0);
    fv.values.remove("elo_diff");

    let err = predict(&model, &fv).unwrap_err();
    match &err {
        ForecastError::SchemaMismatch {
            missing,
            unexpected,
        } => {
            assert_eq!(missing, &vec!["elo_diff".to_string()]);
            assert!(unexpected.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn extra_feature_key_is_a_schema_mismatch() {
    let (model, cfg) = trained();
    let matches = synthetic_matches(4, 1);
    let mut fv = build_features(&matches, week_date(4), &cfg).unwrap().remove(0);
    fv.values.insert("crowd_size".to_string(), 40_000.0);
    assert!(matches!(
        predict(&model, &fv),
        Err(ForecastError::SchemaMismatch { .. })
    ));
}

#[test]
fn saved_model_predicts_the_same() {
    let (model, cfg) = trained();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models/epl/softmax_v1.json");
    model.save(&path).unwrap();
    let loaded = ProbabilisticModel::load(&path).unwrap();

    let matches = synthetic_matches(6, 8);
    for fv in build_features(&matches, week_date(6), &cfg).unwrap() {
        let a = predict(&model, &fv).unwrap();
        let b = predict(&loaded, &fv).unwrap();
        for (x, y) in a.probs().iter().zip(b.probs()) {
            assert!((x - y).abs() < 1e-12);
        }
    }
}

#[test]
fn predictions_table_has_one_column_per_outcome() {
    let (model, cfg) = trained();
    let matches = synthetic_matches(20, 21);
    let vectors =
        build_fixture_features(&matches, &fixtures_for_week(20), week_date(20), &cfg).unwrap();
    let forecasts = predict_batch(&model, &vectors).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("predictions.parquet");
    write_predictions(&path, &model, &forecasts).unwrap();

    let table = read_table(&path).unwrap();
    let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "date",
            "home_team",
            "away_team",
            "proba_home",
            "proba_draw",
            "proba_away",
            "predicted"
        ]
    );
    assert_eq!(table.num_rows(), 4);
    match table.column("proba_home") {
        Some(ColumnData::Float64(values)) => {
            assert_eq!(values[0], forecasts[0].distribution.probs()[0]);
        }
        other => panic!("unexpected column {other:?}"),
    }
}
