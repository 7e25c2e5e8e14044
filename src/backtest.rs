use chrono::{Duration, NaiveDate};
use tracing::info;

use crate::calibration::{
    CalibrationBin, Metrics, calibration_bins, empirical_outcome_probs, evaluate_probs,
    expected_calibration_error, uniform_probs,
};
use crate::config::{FeatureConfig, TrainConfig};
use crate::dataset::TrainingDataset;
use crate::error::{ForecastError, Result};
use crate::features::{FeatureSchema, build_features};
use crate::forecast::predict;
use crate::match_record::MatchRecord;
use crate::model::ProbabilisticModel;
use crate::training::{TrainingReport, train};

const BINS: usize = 10;

#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub metrics: Metrics,
    pub baseline_uniform: Metrics,
    pub baseline_empirical: Metrics,
    pub ece: f64,
    pub bins: Vec<(&'static str, Vec<CalibrationBin>)>,
}

#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub split_date: NaiveDate,
    pub training: TrainingReport,
    pub holdout: EvaluationReport,
}

pub fn evaluate(
    model: &ProbabilisticModel,
    dataset: &TrainingDataset,
    prior: &[f64],
) -> Result<EvaluationReport> {
    let outcomes = dataset.labels();
    let predictions: Vec<Vec<f64>> = dataset
        .examples()
        .iter()
        .map(|e| predict(model, &e.features).map(|d| d.probs().to_vec()))
        .collect::<Result<_>>()?;

    let classes = model.outcome_set.len();
    let n = outcomes.len();
    let bins = model
        .outcome_set
        .labels()
        .iter()
        .enumerate()
        .map(|(class, label)| (*label, calibration_bins(&predictions, &outcomes, class, BINS)))
        .collect();

    Ok(EvaluationReport {
        metrics: evaluate_probs(&predictions, &outcomes),
        baseline_uniform: evaluate_probs(&vec![uniform_probs(classes); n], &outcomes),
        baseline_empirical: evaluate_probs(&vec![prior.to_vec(); n], &outcomes),
        ece: expected_calibration_error(&predictions, &outcomes, BINS),
        bins,
    })
}

/// Trains on matches before `split_date` and scores the matches from it on.
pub fn run_backtest(
    matches: &[MatchRecord],
    feature_cfg: &FeatureConfig,
    train_cfg: &TrainConfig,
    split_date: NaiveDate,
) -> Result<BacktestReport> {
    let Some(last) = matches.iter().map(|m| m.date).max() else {
        return Err(ForecastError::InsufficientData {
            available: 0,
            required: train_cfg.min_samples,
        });
    };
    let vectors = build_features(matches, last + Duration::days(1), feature_cfg)?;
    let schema = FeatureSchema::from_catalog(&feature_cfg.catalog)?;
    let dataset = TrainingDataset::from_matches(schema, train_cfg.outcome_set, matches, vectors)?;

    let (before, after) = dataset.split_at_date(split_date);
    if after.is_empty() {
        return Err(ForecastError::InsufficientData {
            available: 0,
            required: 1,
        });
    }

    let outcome = train(&before, train_cfg)?;
    let prior = empirical_outcome_probs(&before.labels(), train_cfg.outcome_set.len());
    let holdout = evaluate(&outcome.model, &after, &prior)?;

    info!(
        split = %split_date,
        holdout = after.len(),
        log_loss = holdout.metrics.log_loss,
        baseline_log_loss = holdout.baseline_empirical.log_loss,
        ece = holdout.ece,
        "backtest finished"
    );

    Ok(BacktestReport {
        split_date,
        training: outcome.report,
        holdout,
    })
}
