use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::{
    Metrics, apply_calibration, empirical_outcome_probs, evaluate_probs, expected_calibration_error, fit_calibration,
    softmax, uniform_probs,
};
use crate::config::TrainConfig;
use crate::dataset::TrainingDataset;
use crate::error::{ForecastError, Result};
use crate::model::{FeatureScaler, MODEL_ARTIFACT_VERSION, MODEL_TYPE, ProbabilisticModel};
use crate::outcome::OutcomeSet;

const IMPROVEMENT_EPS: f64 = 1e-6;
const LR_DECAY: f64 = 0.01;
/// Calibration is kept only when it lowers held-out log-loss by at least this much.
const MIN_CALIBRATION_GAIN: f64 = 1e-4;
const CALIBRATION_HOLDOUT: f64 = 0.5;
const ECE_BINS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub outcome_set: OutcomeSet,
    pub n_samples: usize,
    pub n_features: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub validation_fraction: f64,
    pub random_seed: u64,
    pub train_period: (String, String),
    pub validation_period: (String, String),
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub train: Metrics,
    pub validation_raw: Metrics,
    /// Final model on the validation rows not used to fit calibration.
    pub validation: Metrics,
    pub calibration_applied: bool,
    pub calibration_fit_samples: usize,
    pub validation_ece: f64,
    pub baseline_uniform: Metrics,
    pub baseline_empirical: Metrics,
}

impl TrainingReport {
    pub fn summary_lines(&self) -> Vec<String> {
        let line = |name: &str, m: &Metrics| {
            format!(
                "{name:<20} n={:<6} logloss={:.4} brier={:.4} acc={:.3}",
                m.samples, m.log_loss, m.brier, m.accuracy
            )
        };
        vec![
            format!(
                "samples={} features={} outcomes={} epochs={} (best {})",
                self.n_samples, self.n_features, self.outcome_set, self.epochs_run, self.best_epoch
            ),
            format!(
                "train {}..{} | validation {}..{}",
                self.train_period.0,
                self.train_period.1,
                self.validation_period.0,
                self.validation_period.1
            ),
            line("train", &self.train),
            line("validation (raw)", &self.validation_raw),
            line("validation", &self.validation),
            line("baseline uniform", &self.baseline_uniform),
            line("baseline empirical", &self.baseline_empirical),
            format!(
                "calibration={} fit_rows={} ece={:.4}",
                if self.calibration_applied { "on" } else { "off" },
                self.calibration_fit_samples,
                self.validation_ece
            ),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub model: ProbabilisticModel,
    pub report: TrainingReport,
}

struct SoftmaxParams {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl SoftmaxParams {
    fn probs(&self, x: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>())
            .collect();
        softmax(&logits)
    }

    fn log_loss(&self, xs: &[Vec<f64>], ys: &[usize]) -> f64 {
        if xs.is_empty() {
            return f64::INFINITY;
        }
        let sum: f64 = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| -self.probs(x)[*y].max(1e-12).ln())
            .sum();
        sum / xs.len() as f64
    }
}

pub fn train(dataset: &TrainingDataset, cfg: &TrainConfig) -> Result<TrainOutcome> {
    cfg.validate()?;
    if dataset.outcome_set() != cfg.outcome_set {
        return Err(ForecastError::Config(format!(
            "dataset labels use {} but training.outcome_set is {}",
            dataset.outcome_set(),
            cfg.outcome_set
        )));
    }
    if dataset.len() < cfg.min_samples {
        return Err(ForecastError::InsufficientData {
            available: dataset.len(),
            required: cfg.min_samples,
        });
    }

    let (train_set, val_set) = dataset.chronological_split(cfg.validation_fraction)?;
    let classes = cfg.outcome_set.len();
    let dims = dataset.schema().len();

    let x_train_raw = train_set.matrix()?;
    let x_val_raw = val_set.matrix()?;
    let y_train = train_set.labels();
    let y_val = val_set.labels();

    let scaler = FeatureScaler::fit(&x_train_raw, dims);
    let x_train: Vec<Vec<f64>> = x_train_raw.iter().map(|r| scaler.transform(r)).collect();
    let x_val: Vec<Vec<f64>> = x_val_raw.iter().map(|r| scaler.transform(r)).collect();

    let (params, epochs_run, best_epoch) = fit_softmax(&x_train, &y_train, &x_val, &y_val, classes, cfg);

    let mut model = ProbabilisticModel {
        version: MODEL_ARTIFACT_VERSION,
        generated_at: Utc::now().to_rfc3339(),
        model_type: MODEL_TYPE.to_string(),
        outcome_set: cfg.outcome_set,
        feature_names: dataset.schema().names(),
        scaler,
        weights: params.weights,
        bias: params.bias,
        calibration: None,
        report: None,
    };

    let train_preds: Vec<Vec<f64>> = x_train_raw.iter().map(|r| model.raw_probs(r)).collect();
    let val_preds: Vec<Vec<f64>> = x_val_raw.iter().map(|r| model.raw_probs(r)).collect();
    let train_metrics = evaluate_probs(&train_preds, &y_train);

    // Calibration is fitted on the earlier half of the validation part. The
    // later half decides whether it is kept and is the only part scored then.
    let mut scored_from = 0usize;
    if cfg.calibration {
        match val_set.chronological_split(CALIBRATION_HOLDOUT) {
            Ok((fit_part, _)) => {
                let cut = fit_part.len();
                let (cal, _) = fit_calibration(&val_preds[..cut], &y_val[..cut]);
                let holdout_raw = evaluate_probs(&val_preds[cut..], &y_val[cut..]);
                let holdout_cal: Vec<Vec<f64>> = val_preds[cut..]
                    .iter()
                    .map(|p| apply_calibration(p, &cal))
                    .collect();
                let holdout_cal = evaluate_probs(&holdout_cal, &y_val[cut..]);
                scored_from = cut;
                if holdout_cal.log_loss + MIN_CALIBRATION_GAIN < holdout_raw.log_loss {
                    debug!(scale = cal.scale, biases = ?cal.biases, fit_rows = cut, "calibration kept");
                    model.calibration = Some(cal);
                } else {
                    debug!(fit_rows = cut, "calibration skipped, no held-out gain");
                }
            }
            Err(_) => debug!("calibration skipped, validation part spans a single date"),
        }
    }

    let y_scored = &y_val[scored_from..];
    let final_val_preds: Vec<Vec<f64>> = x_val_raw[scored_from..]
        .iter()
        .map(|r| model.predict_row(r))
        .collect();
    let validation_raw = evaluate_probs(&val_preds[scored_from..], y_scored);
    let validation = evaluate_probs(&final_val_preds, y_scored);

    let uniform = uniform_probs(classes);
    let empirical = empirical_outcome_probs(&y_train, classes);
    let baseline_uniform = evaluate_probs(&vec![uniform; y_scored.len()], y_scored);
    let baseline_empirical = evaluate_probs(&vec![empirical; y_scored.len()], y_scored);

    let period = |ds: &TrainingDataset| {
        let first = ds.examples().first().map(|e| e.date().to_string());
        let last = ds.examples().last().map(|e| e.date().to_string());
        (first.unwrap_or_default(), last.unwrap_or_default())
    };

    let report = TrainingReport {
        outcome_set: cfg.outcome_set,
        n_samples: dataset.len(),
        n_features: dims,
        train_samples: train_set.len(),
        validation_samples: val_set.len(),
        validation_fraction: cfg.validation_fraction,
        random_seed: cfg.random_seed,
        train_period: period(&train_set),
        validation_period: period(&val_set),
        epochs_run,
        best_epoch,
        train: train_metrics,
        validation_raw,
        validation,
        calibration_applied: model.calibration.is_some(),
        calibration_fit_samples: scored_from,
        validation_ece: expected_calibration_error(&final_val_preds, y_scored, ECE_BINS),
        baseline_uniform,
        baseline_empirical,
    };

    info!(
        n_samples = report.n_samples,
        n_features = report.n_features,
        epochs = report.epochs_run,
        train_log_loss = report.train.log_loss,
        val_log_loss = report.validation.log_loss,
        val_brier = report.validation.brier,
        val_accuracy = report.validation.accuracy,
        baseline_log_loss = report.baseline_empirical.log_loss,
        calibrated = report.calibration_applied,
        "model trained"
    );

    model.report = Some(report.clone());
    Ok(TrainOutcome { model, report })
}

fn fit_softmax(
    x_train: &[Vec<f64>],
    y_train: &[usize],
    x_val: &[Vec<f64>],
    y_val: &[usize],
    classes: usize,
    cfg: &TrainConfig,
) -> (SoftmaxParams, usize, usize) {
    let dims = x_train.first().map(|r| r.len()).unwrap_or(0);
    let prior = empirical_outcome_probs(y_train, classes);
    let n_train = y_train.len() as f64;
    let mut params = SoftmaxParams {
        weights: vec![vec![0.0; dims]; classes],
        // Laplace-smoothed log priors.
        bias: prior
            .iter()
            .map(|p| ((p * n_train + 1.0) / (n_train + classes as f64)).ln())
            .collect(),
    };
    let mut best_weights = params.weights.clone();
    let mut best_bias = params.bias.clone();
    let mut best_val = params.log_loss(x_val, y_val);
    let mut best_epoch = 0usize;
    let mut epochs_run = 0usize;
    let mut no_improve = 0usize;

    let mut rng = StdRng::seed_from_u64(cfg.random_seed);
    let mut order: Vec<usize> = (0..x_train.len()).collect();

    for epoch in 0..cfg.max_epochs {
        order.shuffle(&mut rng);
        let lr = cfg.learning_rate / (1.0 + epoch as f64 * LR_DECAY);

        for batch in order.chunks(cfg.batch_size) {
            let mut grad_w = vec![vec![0.0; dims]; classes];
            let mut grad_b = vec![0.0; classes];
            for &i in batch {
                let p = params.probs(&x_train[i]);
                for c in 0..classes {
                    let d = p[c] - if c == y_train[i] { 1.0 } else { 0.0 };
                    grad_b[c] += d;
                    for (g, x) in grad_w[c].iter_mut().zip(&x_train[i]) {
                        *g += d * x;
                    }
                }
            }
            let m = batch.len() as f64;
            for c in 0..classes {
                for (w, g) in params.weights[c].iter_mut().zip(&grad_w[c]) {
                    *w -= lr * (g / m + cfg.l2 * *w);
                }
                params.bias[c] -= lr * grad_b[c] / m;
            }
        }

        epochs_run = epoch + 1;
        let val_ll = params.log_loss(x_val, y_val);
        if val_ll + IMPROVEMENT_EPS < best_val {
            best_val = val_ll;
            best_weights = params.weights.clone();
            best_bias = params.bias.clone();
            best_epoch = epoch + 1;
            no_improve = 0;
        } else {
            no_improve = no_improve.saturating_add(1);
            if no_improve >= cfg.patience {
                break;
            }
        }
    }

    debug!(epochs_run, best_epoch, best_val, "softmax fit finished");
    (
        SoftmaxParams {
            weights: best_weights,
            bias: best_bias,
        },
        epochs_run,
        best_epoch,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, NaiveDate};

    use super::train;
    use crate::config::TrainConfig;
    use crate::dataset::{LabeledExample, TrainingDataset};
    use crate::error::ForecastError;
    use crate::features::{FeatureSchema, FeatureVector};
    use crate::match_record::{MatchKey, TeamId};
    use crate::outcome::OutcomeSet;

    /// Label follows the sign of `elo_diff` with a deterministic amount of noise.
    fn separable(n: usize) -> TrainingDataset {
        let schema = FeatureSchema::from_catalog(&["elo_diff", "h2h_matches"]).unwrap();
        let start = NaiveDate::from_ymd_opt(2023, 8, 1).unwrap();
        let examples = (0..n)
            .map(|i| {
                let x = ((i * 37) % 101) as f64 - 50.0;
                let label = if i % 11 == 0 {
                    1
                } else if x > 0.0 {
                    0
                } else {
                    2
                };
                let subject = MatchKey {
                    date: start + Duration::days(i as i64),
                    home: TeamId::parse(&format!("H{i}")).unwrap(),
                    away: TeamId::parse(&format!("A{i}")).unwrap(),
                };
                let values = BTreeMap::from([
                    ("elo_diff".to_string(), x),
                    ("h2h_matches".to_string(), (i % 3) as f64),
                ]);
                LabeledExample {
                    features: FeatureVector::new(subject, values),
                    label,
                }
            })
            .collect();
        TrainingDataset::new(schema, OutcomeSet::ThreeWay, examples).unwrap()
    }

    #[test]
    fn too_few_samples_is_insufficient_data() {
        let err = train(&separable(10), &TrainConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData {
                available: 10,
                required: 30
            }
        ));
    }

    #[test]
    fn learns_signal_better_than_baseline() {
        let outcome = train(&separable(300), &TrainConfig::default()).unwrap();
        let r = &outcome.report;
        assert_eq!(r.train_samples + r.validation_samples, 300);
        assert!(r.validation.log_loss < r.baseline_empirical.log_loss);
        assert!(r.validation.accuracy > 0.7);
        assert!(outcome.model.validate().is_ok());
    }

    #[test]
    fn calibration_is_judged_on_rows_it_was_not_fitted_on() {
        let outcome = train(&separable(300), &TrainConfig::default()).unwrap();
        let r = &outcome.report;
        assert!(r.calibration_fit_samples > 0);
        assert_eq!(r.calibration_fit_samples + r.validation.samples, r.validation_samples);
        assert_eq!(r.validation_raw.samples, r.validation.samples);
        assert_eq!(r.baseline_empirical.samples, r.validation.samples);
        if r.calibration_applied {
            assert!(r.validation.log_loss + 1e-4 < r.validation_raw.log_loss);
        } else {
            assert_eq!(r.validation, r.validation_raw);
        }
    }

    #[test]
    fn without_calibration_the_whole_validation_part_is_scored() {
        let cfg = TrainConfig {
            calibration: false,
            ..TrainConfig::default()
        };
        let r = train(&separable(120), &cfg).unwrap().report;
        assert_eq!(r.calibration_fit_samples, 0);
        assert_eq!(r.validation.samples, r.validation_samples);
        assert!(!r.calibration_applied);
    }

    #[test]
    fn same_seed_gives_identical_weights() {
        let cfg = TrainConfig {
            calibration: false,
            ..TrainConfig::default()
        };
        let a = train(&separable(120), &cfg).unwrap();
        let b = train(&separable(120), &cfg).unwrap();
        assert_eq!(a.model.weights, b.model.weights);
        assert_eq!(a.model.bias, b.model.bias);
    }

    #[test]
    fn mismatched_outcome_set_is_a_config_error() {
        let cfg = TrainConfig {
            outcome_set: OutcomeSet::HomeWin,
            ..TrainConfig::default()
        };
        assert!(matches!(
            train(&separable(60), &cfg),
            Err(ForecastError::Config(_))
        ));
    }
}
