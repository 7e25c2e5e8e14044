use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::{Calibration, apply_calibration, softmax};
use crate::error::{ForecastError, Result};
use crate::features::FeatureSchema;
use crate::outcome::OutcomeSet;
use crate::training::TrainingReport;

pub const MODEL_ARTIFACT_VERSION: u32 = 1;
pub const MODEL_TYPE: &str = "softmax_regression";

/// Per-feature standardisation fitted on the training rows only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl FeatureScaler {
    pub fn fit(rows: &[Vec<f64>], dims: usize) -> Self {
        let mut means = vec![0.0; dims];
        let mut stds = vec![1.0; dims];
        if rows.is_empty() {
            return Self { means, stds };
        }
        let n = rows.len() as f64;
        for row in rows {
            for (j, v) in row.iter().enumerate().take(dims) {
                means[j] += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }
        let mut var = vec![0.0; dims];
        for row in rows {
            for (j, v) in row.iter().enumerate().take(dims) {
                var[j] += (v - means[j]).powi(2);
            }
        }
        for (j, s) in stds.iter_mut().enumerate() {
            *s = (var[j] / n).sqrt().max(1e-6);
        }
        Self { means, stds }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilisticModel {
    pub version: u32,
    pub generated_at: String,
    pub model_type: String,
    pub outcome_set: OutcomeSet,
    pub feature_names: Vec<String>,
    pub scaler: FeatureScaler,
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub calibration: Option<Calibration>,
    #[serde(default)]
    pub report: Option<TrainingReport>,
}

impl ProbabilisticModel {
    pub fn schema(&self) -> Result<FeatureSchema> {
        FeatureSchema::from_catalog(&self.feature_names)
    }

    pub fn raw_probs(&self, row: &[f64]) -> Vec<f64> {
        let x = self.scaler.transform(row);
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(&x).map(|(wi, xi)| wi * xi).sum::<f64>())
            .collect();
        softmax(&logits)
    }

    pub fn predict_row(&self, row: &[f64]) -> Vec<f64> {
        let raw = self.raw_probs(row);
        match &self.calibration {
            Some(cal) => apply_calibration(&raw, cal),
            None => raw,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != MODEL_ARTIFACT_VERSION {
            return Err(ForecastError::Config(format!(
                "unsupported model artifact version {} (expected {MODEL_ARTIFACT_VERSION})",
                self.version
            )));
        }
        let dims = self.feature_names.len();
        let classes = self.outcome_set.len();
        let shape_ok = self.weights.len() == classes
            && self.bias.len() == classes
            && self.weights.iter().all(|w| w.len() == dims)
            && self.scaler.means.len() == dims
            && self.scaler.stds.len() == dims
            && self
                .calibration
                .as_ref()
                .is_none_or(|c| c.biases.len() == classes);
        if !shape_ok {
            return Err(ForecastError::Config(format!(
                "model parameters do not match {dims} features x {classes} outcomes"
            )));
        }
        self.schema()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ForecastError::io(parent, e))?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).map_err(|e| ForecastError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| ForecastError::io(path, e))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| ForecastError::io(path, e))?;
        let model: Self = serde_json::from_str(&raw)?;
        model.validate()?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::FeatureScaler;

    #[test]
    fn scaler_centres_and_floors_std() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = FeatureScaler::fit(&rows, 2);
        assert_eq!(scaler.means, vec![2.0, 5.0]);
        assert_eq!(scaler.stds[0], 1.0);
        assert_eq!(scaler.stds[1], 1e-6);
        assert_eq!(scaler.transform(&[3.0, 5.0]), vec![1.0, 0.0]);
    }
}
