use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ForecastError, Result};

const RENORMALIZE_EPS: f64 = 1e-9;
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSet {
    #[default]
    ThreeWay,
    HomeWin,
}

impl OutcomeSet {
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            Self::ThreeWay => &["home", "draw", "away"],
            Self::HomeWin => &["home_win", "no_home_win"],
        }
    }

    pub fn len(self) -> usize {
        self.labels().len()
    }

    pub fn is_empty(self) -> bool {
        false
    }

    pub fn classify(self, home_goals: u16, away_goals: u16) -> usize {
        match self {
            Self::ThreeWay => {
                if home_goals > away_goals {
                    0
                } else if home_goals == away_goals {
                    1
                } else {
                    2
                }
            }
            Self::HomeWin => {
                if home_goals > away_goals {
                    0
                } else {
                    1
                }
            }
        }
    }

    pub fn index_of(self, label: &str) -> Option<usize> {
        self.labels().iter().position(|l| *l == label)
    }
}

impl fmt::Display for OutcomeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreeWay => f.write_str("three_way"),
            Self::HomeWin => f.write_str("home_win"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeDistribution {
    outcome_set: OutcomeSet,
    probs: Vec<f64>,
}

impl OutcomeDistribution {
    pub fn uniform(outcome_set: OutcomeSet) -> Self {
        let n = outcome_set.len();
        Self {
            outcome_set,
            probs: vec![1.0 / n as f64; n],
        }
    }

    /// Builds a distribution, clamping invalid entries and renormalising drift.
    pub fn from_probs(outcome_set: OutcomeSet, probs: Vec<f64>) -> Result<Self> {
        if probs.len() != outcome_set.len() {
            return Err(ForecastError::Config(format!(
                "{} probabilities given for {} outcomes ({outcome_set})",
                probs.len(),
                outcome_set.len()
            )));
        }

        let mut clean: Vec<f64> = probs
            .iter()
            .map(|p| if p.is_finite() { p.max(0.0) } else { 0.0 })
            .collect();
        let sum: f64 = clean.iter().sum();
        if sum <= 0.0 {
            warn!(?probs, "degenerate distribution replaced by uniform");
            return Ok(Self::uniform(outcome_set));
        }
        if (sum - 1.0).abs() > RENORMALIZE_EPS {
            warn!(sum, "renormalising outcome distribution");
            for p in &mut clean {
                *p /= sum;
            }
        }
        for p in &mut clean {
            *p = p.clamp(0.0, 1.0);
        }

        Ok(Self {
            outcome_set,
            probs: clean,
        })
    }

    pub fn outcome_set(&self) -> OutcomeSet {
        self.outcome_set
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.outcome_set.index_of(label).map(|idx| self.probs[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.outcome_set
            .labels()
            .iter()
            .copied()
            .zip(self.probs.iter().copied())
    }

    pub fn argmax(&self) -> usize {
        argmax(&self.probs)
    }

    pub fn is_valid(&self) -> bool {
        let sum: f64 = self.probs.iter().sum();
        self.probs.iter().all(|p| (0.0..=1.0).contains(p))
            && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE
    }
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0usize;
    for (idx, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = idx;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::{OutcomeDistribution, OutcomeSet};

    #[test]
    fn classify_three_way_and_binary() {
        assert_eq!(OutcomeSet::ThreeWay.classify(2, 1), 0);
        assert_eq!(OutcomeSet::ThreeWay.classify(1, 1), 1);
        assert_eq!(OutcomeSet::ThreeWay.classify(0, 3), 2);
        assert_eq!(OutcomeSet::HomeWin.classify(1, 1), 1);
        assert_eq!(OutcomeSet::HomeWin.classify(4, 0), 0);
    }

    #[test]
    fn drift_is_renormalised() {
        let d = OutcomeDistribution::from_probs(OutcomeSet::ThreeWay, vec![0.5, 0.3, 0.3]).unwrap();
        assert!(d.is_valid());
        assert!((d.get("home").unwrap() - 0.5 / 1.1).abs() < 1e-12);
    }

    #[test]
    fn negative_and_nan_entries_are_clamped() {
        let d = OutcomeDistribution::from_probs(OutcomeSet::ThreeWay, vec![f64::NAN, -0.2, 0.4])
            .unwrap();
        assert!(d.is_valid());
        assert_eq!(d.argmax(), 2);

        let z = OutcomeDistribution::from_probs(OutcomeSet::HomeWin, vec![0.0, 0.0]).unwrap();
        assert_eq!(z.probs(), &[0.5, 0.5]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(OutcomeDistribution::from_probs(OutcomeSet::HomeWin, vec![0.2, 0.3, 0.5]).is_err());
    }
}
