use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::NaiveDate;
use tracing::warn;

use crate::error::{ForecastError, Result};
use crate::features::{FeatureSchema, FeatureVector};
use crate::match_record::{MatchKey, MatchRecord, TeamId};
use crate::outcome::OutcomeSet;
use crate::parquet_io::{self, ColumnData, Table};

const META_DATE: &str = "date";
const META_HOME: &str = "home_team";
const META_AWAY: &str = "away_team";
const META_HOME_GOALS: &str = "home_goals";
const META_AWAY_GOALS: &str = "away_goals";

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub features: FeatureVector,
    pub label: usize,
}

impl LabeledExample {
    pub fn date(&self) -> NaiveDate {
        self.features.subject.date
    }
}

#[derive(Debug, Clone)]
pub struct TrainingDataset {
    schema: FeatureSchema,
    outcome_set: OutcomeSet,
    examples: Vec<LabeledExample>,
}

impl TrainingDataset {
    pub fn new(
        schema: FeatureSchema,
        outcome_set: OutcomeSet,
        mut examples: Vec<LabeledExample>,
    ) -> Result<Self> {
        for ex in &examples {
            schema.check(&ex.features)?;
            if ex.label >= outcome_set.len() {
                return Err(ForecastError::Config(format!(
                    "label {} out of range for {outcome_set} ({})",
                    ex.label, ex.features.subject
                )));
            }
        }
        examples.sort_by(|a, b| a.features.subject.cmp(&b.features.subject));
        Ok(Self {
            schema,
            outcome_set,
            examples,
        })
    }

    pub fn from_matches(
        schema: FeatureSchema,
        outcome_set: OutcomeSet,
        matches: &[MatchRecord],
        vectors: Vec<FeatureVector>,
    ) -> Result<Self> {
        let results: HashMap<MatchKey, (u16, u16)> = matches
            .iter()
            .map(|m| (m.key(), (m.home_goals, m.away_goals)))
            .collect();

        let mut unmatched = 0usize;
        let mut examples = Vec::with_capacity(vectors.len());
        for features in vectors {
            let Some((hg, ag)) = results.get(&features.subject) else {
                unmatched += 1;
                continue;
            };
            examples.push(LabeledExample {
                label: outcome_set.classify(*hg, *ag),
                features,
            });
        }
        if unmatched > 0 {
            warn!(unmatched, "feature vectors without a result were skipped");
        }
        Self::new(schema, outcome_set, examples)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn outcome_set(&self) -> OutcomeSet {
        self.outcome_set
    }

    pub fn examples(&self) -> &[LabeledExample] {
        &self.examples
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.examples.iter().map(|e| e.label).collect()
    }

    pub fn matrix(&self) -> Result<Vec<Vec<f64>>> {
        self.examples
            .iter()
            .map(|e| self.schema.extract(&e.features))
            .collect()
    }

    /// The cut lands on a date boundary: validation dates are strictly later.
    pub fn chronological_split(&self, validation_fraction: f64) -> Result<(Self, Self)> {
        let f = validation_fraction;
        if !(f.is_finite() && f > 0.0 && f < 1.0) {
            return Err(ForecastError::Config(format!(
                "validation_fraction must be in (0, 1), got {f}"
            )));
        }
        let n = self.examples.len();
        if n < 2 {
            return Err(ForecastError::InsufficientData {
                available: n,
                required: 2,
            });
        }
        let n_val = ((n as f64 * f).round() as usize).clamp(1, n - 1);
        let target = n - n_val;
        let cut = self
            .date_boundary(target)
            .ok_or(ForecastError::InsufficientData {
                available: n,
                required: 2,
            })?;
        Ok((self.subset(0..cut), self.subset(cut..n)))
    }

    pub fn split_at_date(&self, date: NaiveDate) -> (Self, Self) {
        let cut = self.examples.partition_point(|e| e.date() < date);
        (self.subset(0..cut), self.subset(cut..self.examples.len()))
    }

    // Nearest date change to `target`; ties go to the smaller training side.
    fn date_boundary(&self, target: usize) -> Option<usize> {
        let n = self.examples.len();
        let is_boundary = |i: usize| self.examples[i - 1].date() < self.examples[i].date();
        let down = (1..=target).rev().find(|&i| is_boundary(i));
        let up = (target + 1..n).find(|&i| is_boundary(i));
        match (down, up) {
            (Some(d), Some(u)) if u - target < target - d => Some(u),
            (Some(d), _) => Some(d),
            (None, u) => u,
        }
    }

    fn subset(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            schema: self.schema.clone(),
            outcome_set: self.outcome_set,
            examples: self.examples[range].to_vec(),
        }
    }
}

fn meta_table(subjects: &[&MatchKey]) -> Table {
    let mut table = Table::default();
    table.push(
        META_DATE,
        ColumnData::Utf8(subjects.iter().map(|k| k.date.to_string()).collect()),
    );
    table.push(
        META_HOME,
        ColumnData::Utf8(subjects.iter().map(|k| k.home.to_string()).collect()),
    );
    table.push(
        META_AWAY,
        ColumnData::Utf8(subjects.iter().map(|k| k.away.to_string()).collect()),
    );
    table
}

fn push_features(table: &mut Table, schema: &FeatureSchema, vectors: &[&FeatureVector]) -> Result<()> {
    let rows: Vec<Vec<f64>> = vectors
        .iter()
        .map(|v| schema.extract(v))
        .collect::<Result<_>>()?;
    for (col, name) in schema.names().into_iter().enumerate() {
        table.push(
            name,
            ColumnData::Float64(rows.iter().map(|r| r[col]).collect()),
        );
    }
    Ok(())
}

/// `train.parquet`: match identity, final score, then one column per feature.
pub fn write_training_table(
    path: &Path,
    schema: &FeatureSchema,
    matches: &[MatchRecord],
    vectors: &[FeatureVector],
) -> Result<usize> {
    let results: HashMap<MatchKey, &MatchRecord> = matches.iter().map(|m| (m.key(), m)).collect();
    let labelled: Vec<(&FeatureVector, &MatchRecord)> = vectors
        .iter()
        .filter_map(|v| results.get(&v.subject).map(|m| (v, *m)))
        .collect();

    let subjects: Vec<&MatchKey> = labelled.iter().map(|(v, _)| &v.subject).collect();
    let mut table = meta_table(&subjects);
    table.push(
        META_HOME_GOALS,
        ColumnData::Int64(labelled.iter().map(|(_, m)| Some(i64::from(m.home_goals))).collect()),
    );
    table.push(
        META_AWAY_GOALS,
        ColumnData::Int64(labelled.iter().map(|(_, m)| Some(i64::from(m.away_goals))).collect()),
    );
    let only_vectors: Vec<&FeatureVector> = labelled.iter().map(|(v, _)| *v).collect();
    push_features(&mut table, schema, &only_vectors)?;
    parquet_io::write_table(path, &table)?;
    Ok(labelled.len())
}

pub fn write_inference_table(
    path: &Path,
    schema: &FeatureSchema,
    vectors: &[FeatureVector],
) -> Result<usize> {
    let subjects: Vec<&MatchKey> = vectors.iter().map(|v| &v.subject).collect();
    let mut table = meta_table(&subjects);
    let refs: Vec<&FeatureVector> = vectors.iter().collect();
    push_features(&mut table, schema, &refs)?;
    parquet_io::write_table(path, &table)?;
    Ok(vectors.len())
}

fn utf8_column<'t>(table: &'t Table, name: &str) -> Result<&'t [String]> {
    match table.column(name) {
        Some(ColumnData::Utf8(values)) => Ok(values),
        _ => Err(ForecastError::DataValidation {
            row: 0,
            identity: "header".to_string(),
            reason: format!("processed table lacks text column {name:?}"),
        }),
    }
}

fn int_column<'t>(table: &'t Table, name: &str) -> Result<&'t [Option<i64>]> {
    match table.column(name) {
        Some(ColumnData::Int64(values)) => Ok(values),
        _ => Err(ForecastError::DataValidation {
            row: 0,
            identity: "header".to_string(),
            reason: format!("processed table lacks integer column {name:?}"),
        }),
    }
}

fn read_vectors(table: &Table) -> Result<Vec<FeatureVector>> {
    let dates = utf8_column(table, META_DATE)?;
    let homes = utf8_column(table, META_HOME)?;
    let aways = utf8_column(table, META_AWAY)?;
    let features: Vec<(&str, &[f64])> = table
        .columns
        .iter()
        .filter_map(|c| match &c.data {
            ColumnData::Float64(values) => Some((c.name.as_str(), values.as_slice())),
            _ => None,
        })
        .collect();

    let mut out = Vec::with_capacity(table.num_rows());
    for row in 0..table.num_rows() {
        let identity = format!("{} {} vs {}", dates[row], homes[row], aways[row]);
        let invalid = |reason: &str| ForecastError::DataValidation {
            row: row + 1,
            identity: identity.clone(),
            reason: reason.to_string(),
        };
        let subject = MatchKey {
            date: NaiveDate::parse_from_str(&dates[row], "%Y-%m-%d")
                .map_err(|_| invalid("unparseable date"))?,
            home: TeamId::parse(&homes[row]).ok_or_else(|| invalid("empty home team"))?,
            away: TeamId::parse(&aways[row]).ok_or_else(|| invalid("empty away team"))?,
        };
        let values: BTreeMap<String, f64> = features
            .iter()
            .map(|(name, values)| (name.to_string(), values[row]))
            .collect();
        out.push(FeatureVector::new(subject, values));
    }
    Ok(out)
}

pub fn read_training_table(path: &Path, outcome_set: OutcomeSet) -> Result<TrainingDataset> {
    let table = parquet_io::read_table(path)?;
    let feature_names: Vec<&str> = table
        .columns
        .iter()
        .filter(|c| matches!(c.data, ColumnData::Float64(_)))
        .map(|c| c.name.as_str())
        .collect();
    let schema = FeatureSchema::from_catalog(&feature_names)?;
    let home_goals = int_column(&table, META_HOME_GOALS)?;
    let away_goals = int_column(&table, META_AWAY_GOALS)?;

    let vectors = read_vectors(&table)?;
    let mut examples = Vec::with_capacity(vectors.len());
    for (row, features) in vectors.into_iter().enumerate() {
        let score = |v: Option<i64>| v.and_then(|g| u16::try_from(g).ok());
        let (Some(hg), Some(ag)) = (score(home_goals[row]), score(away_goals[row])) else {
            return Err(ForecastError::DataValidation {
                row: row + 1,
                identity: features.subject.to_string(),
                reason: "missing or negative score in processed table".to_string(),
            });
        };
        examples.push(LabeledExample {
            label: outcome_set.classify(hg, ag),
            features,
        });
    }
    TrainingDataset::new(schema, outcome_set, examples)
}

pub fn read_inference_table(path: &Path) -> Result<Vec<FeatureVector>> {
    let table = parquet_io::read_table(path)?;
    read_vectors(&table)
}
