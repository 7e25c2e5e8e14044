use serde::{Deserialize, Serialize};

use crate::outcome::argmax;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

/// Post-hoc logit adjustment: `softmax(scale * centered(ln p) + bias)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub scale: f64,
    pub biases: Vec<f64>,
}

impl Calibration {
    pub fn identity(classes: usize) -> Self {
        Self {
            scale: 1.0,
            biases: vec![0.0; classes],
        }
    }
}

pub fn uniform_probs(classes: usize) -> Vec<f64> {
    vec![1.0 / classes.max(1) as f64; classes]
}

pub fn empirical_outcome_probs(outcomes: &[usize], classes: usize) -> Vec<f64> {
    if outcomes.is_empty() {
        return uniform_probs(classes);
    }
    let mut counts = vec![0usize; classes];
    for outcome in outcomes {
        if let Some(c) = counts.get_mut(*outcome) {
            *c += 1;
        }
    }
    let n = outcomes.len() as f64;
    counts.into_iter().map(|c| c as f64 / n).collect()
}

pub fn evaluate_probs(predictions: &[Vec<f64>], outcomes: &[usize]) -> Metrics {
    if predictions.is_empty() || outcomes.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::empty();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        for (class, prob) in p.iter().enumerate() {
            let y = if class == *outcome { 1.0 } else { 0.0 };
            brier_sum += (prob - y).powi(2);
        }
        let actual_prob = p.get(*outcome).copied().unwrap_or(0.0).clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();

        if argmax(p) == *outcome {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

pub fn apply_calibration(prob: &[f64], cal: &Calibration) -> Vec<f64> {
    let s = cal.scale.clamp(0.50, 1.80);
    let logs: Vec<f64> = prob.iter().map(|p| p.clamp(1e-9, 1.0).ln()).collect();
    let mean = logs.iter().sum::<f64>() / logs.len().max(1) as f64;
    let logits: Vec<f64> = logs
        .iter()
        .enumerate()
        .map(|(i, l)| (l - mean) * s + cal.biases.get(i).copied().unwrap_or(0.0))
        .collect();
    softmax(&logits)
}

pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let mx = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - mx).exp()).collect();
    let den = exps.iter().sum::<f64>().max(1e-12);
    exps.into_iter().map(|e| (e / den).clamp(0.0, 1.0)).collect()
}

/// Grid search over the logit scale, then each non-reference class bias,
/// then the scale again. Class 0 keeps a zero bias.
pub fn fit_calibration(predictions: &[Vec<f64>], outcomes: &[usize]) -> (Calibration, Metrics) {
    let classes = predictions.first().map(|p| p.len()).unwrap_or(0);
    if predictions.is_empty() || outcomes.is_empty() || predictions.len() != outcomes.len() {
        return (Calibration::identity(classes), Metrics::empty());
    }

    let mut best = Calibration::identity(classes);
    let mut best_metrics = evaluate_probs(predictions, outcomes);

    let search_scale = |best: &mut Calibration, best_metrics: &mut Metrics| {
        for scale_step in 35..=65 {
            let candidate = Calibration {
                scale: scale_step as f64 / 50.0, // 0.70..1.30
                biases: best.biases.clone(),
            };
            let metrics = evaluate_calibrated(predictions, outcomes, &candidate);
            if metrics.log_loss < best_metrics.log_loss {
                *best_metrics = metrics;
                *best = candidate;
            }
        }
    };

    search_scale(&mut best, &mut best_metrics);
    for class in 1..classes {
        for bias_step in -30..=30 {
            let mut candidate = best.clone();
            candidate.biases[class] = bias_step as f64 / 100.0; // -0.30..0.30
            let metrics = evaluate_calibrated(predictions, outcomes, &candidate);
            if metrics.log_loss < best_metrics.log_loss {
                best_metrics = metrics;
                best = candidate;
            }
        }
    }
    search_scale(&mut best, &mut best_metrics);

    (best, best_metrics)
}

pub fn calibration_bins(
    predictions: &[Vec<f64>],
    outcomes: &[usize],
    class: usize,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let class_prob = p.get(class).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        let idx = ((class_prob * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += class_prob;
        if *outcome == class {
            actual_sum[idx] += 1.0;
        }
    }

    let mut out = Vec::with_capacity(bins);
    for i in 0..bins {
        let count = counts[i];
        let (avg_pred, actual_rate) = if count > 0 {
            (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
        } else {
            (0.0, 0.0)
        };
        out.push(CalibrationBin {
            bucket_start: i as f64 / bins as f64,
            bucket_end: (i + 1) as f64 / bins as f64,
            count,
            avg_pred,
            actual_rate,
        });
    }
    out
}

pub fn expected_calibration_error(
    predictions: &[Vec<f64>],
    outcomes: &[usize],
    bins: usize,
) -> f64 {
    let classes = predictions.first().map(|p| p.len()).unwrap_or(0);
    if classes == 0 || predictions.len() != outcomes.len() {
        return 0.0;
    }
    let n = predictions.len() as f64;
    let mut total = 0.0;
    for class in 0..classes {
        total += calibration_bins(predictions, outcomes, class, bins)
            .iter()
            .map(|b| b.count as f64 / n * (b.avg_pred - b.actual_rate).abs())
            .sum::<f64>();
    }
    total / classes as f64
}

fn evaluate_calibrated(predictions: &[Vec<f64>], outcomes: &[usize], cal: &Calibration) -> Metrics {
    let calibrated: Vec<Vec<f64>> = predictions
        .iter()
        .map(|p| apply_calibration(p, cal))
        .collect();
    evaluate_probs(&calibrated, outcomes)
}
