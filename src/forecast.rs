use std::path::Path;

use crate::error::Result;
use crate::features::{FeatureSchema, FeatureVector};
use crate::match_record::MatchKey;
use crate::model::ProbabilisticModel;
use crate::outcome::OutcomeDistribution;
use crate::parquet_io::{self, ColumnData, Table};

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureForecast {
    pub subject: MatchKey,
    pub distribution: OutcomeDistribution,
}

/// Outcome distribution for one vector. The vector's keys must equal the
/// model's feature set exactly.
pub fn predict(model: &ProbabilisticModel, fv: &FeatureVector) -> Result<OutcomeDistribution> {
    let schema = model.schema()?;
    predict_with_schema(model, &schema, fv)
}

fn predict_with_schema(
    model: &ProbabilisticModel,
    schema: &FeatureSchema,
    fv: &FeatureVector,
) -> Result<OutcomeDistribution> {
    let row = schema.extract(fv)?;
    OutcomeDistribution::from_probs(model.outcome_set, model.predict_row(&row))
}

pub fn predict_batch(
    model: &ProbabilisticModel,
    vectors: &[FeatureVector],
) -> Result<Vec<FixtureForecast>> {
    let schema = model.schema()?;
    vectors
        .iter()
        .map(|fv| {
            Ok(FixtureForecast {
                subject: fv.subject.clone(),
                distribution: predict_with_schema(model, &schema, fv)?,
            })
        })
        .collect()
}

pub fn write_predictions(
    path: &Path,
    model: &ProbabilisticModel,
    forecasts: &[FixtureForecast],
) -> Result<()> {
    let mut table = Table::default();
    table.push(
        "date",
        ColumnData::Utf8(forecasts.iter().map(|f| f.subject.date.to_string()).collect()),
    );
    table.push(
        "home_team",
        ColumnData::Utf8(forecasts.iter().map(|f| f.subject.home.to_string()).collect()),
    );
    table.push(
        "away_team",
        ColumnData::Utf8(forecasts.iter().map(|f| f.subject.away.to_string()).collect()),
    );

    let labels = model.outcome_set.labels();
    for (idx, label) in labels.iter().enumerate() {
        table.push(
            format!("proba_{label}"),
            ColumnData::Float64(
                forecasts
                    .iter()
                    .map(|f| f.distribution.probs()[idx])
                    .collect(),
            ),
        );
    }
    table.push(
        "predicted",
        ColumnData::Utf8(
            forecasts
                .iter()
                .map(|f| labels[f.distribution.argmax()].to_string())
                .collect(),
        ),
    );

    parquet_io::write_table(path, &table)
}
