use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, NaiveDate, Utc};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::dataset;
use crate::features::{FeatureSchema, build_features, build_fixture_features};
use crate::forecast::{FixtureForecast, predict_batch, write_predictions};
use crate::ingest::{self, MatchSource};
use crate::model::ProbabilisticModel;
use crate::store::{self, StoreSummary};
use crate::training::{TrainingReport, train};

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub tournament: String,
    pub source: PathBuf,
    pub rows_read: usize,
    pub duplicates: usize,
    pub dropped_rows: usize,
    pub store: StoreSummary,
}

#[derive(Debug, Clone)]
pub struct FeaturesResult {
    pub tournament: String,
    pub as_of: NaiveDate,
    pub train_rows: usize,
    pub inference_rows: usize,
}

#[derive(Debug, Clone)]
pub struct TrainResult {
    pub tournament: String,
    pub model_path: PathBuf,
    pub report: TrainingReport,
}

#[derive(Debug, Clone)]
pub struct PredictResult {
    pub tournament: String,
    pub output: PathBuf,
    pub forecasts: Vec<FixtureForecast>,
}

pub fn default_as_of() -> NaiveDate {
    Utc::now().date_naive() + Duration::days(1)
}

pub fn tournaments(cfg: &PipelineConfig) -> Result<Vec<String>> {
    if !cfg.data.tournaments.is_empty() {
        return Ok(cfg.data.tournaments.clone());
    }
    let dir = &cfg.paths.source_dir;
    if !dir.exists() {
        warn!(dir = %dir.display(), "source directory does not exist");
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let entry = entry.with_context(|| format!("list {}", dir.display()))?;
        if entry.path().is_dir() {
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    out.sort();
    Ok(out)
}

fn find_source(cfg: &PipelineConfig, tournament: &str) -> Option<PathBuf> {
    let dir = cfg.paths.source_dir.join(tournament);
    cfg.data
        .source_files
        .iter()
        .map(|name| dir.join(name))
        .find(|path| fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false))
}

/// Tournaments without a non-empty source file are skipped.
pub fn run_ingest(cfg: &PipelineConfig) -> Result<Vec<IngestResult>> {
    let mut results = Vec::new();
    for tournament in tournaments(cfg)? {
        let Some(path) = find_source(cfg, &tournament) else {
            warn!(%tournament, "no source data found, skipping");
            continue;
        };
        let source = MatchSource::from_path(&path)?;
        let batch = ingest::load_source(&source, &cfg.data)
            .with_context(|| format!("ingest {tournament} from {source}"))?;

        let store_path = cfg.paths.store_path(&tournament);
        let mut conn = store::open_store(&store_path)?;
        let summary = store::upsert_batch(&mut conn, &source.to_string(), &batch)?;
        info!(
            %tournament,
            matches = summary.matches_upserted,
            fixtures = summary.fixtures_upserted,
            total = summary.total_matches,
            store = %store_path.display(),
            "ingest complete"
        );
        results.push(IngestResult {
            tournament,
            source: path,
            rows_read: batch.rows_read,
            duplicates: batch.duplicates,
            dropped_rows: batch.dropped_rows,
            store: summary,
        });
    }
    Ok(results)
}

pub fn run_features(cfg: &PipelineConfig, as_of: NaiveDate) -> Result<Vec<FeaturesResult>> {
    let schema = FeatureSchema::from_catalog(&cfg.features.catalog)?;
    let mut results = Vec::new();
    for tournament in tournaments(cfg)? {
        let store_path = cfg.paths.store_path(&tournament);
        if !store_path.exists() {
            warn!(%tournament, "no ingested store, skipping");
            continue;
        }
        let conn = store::open_store(&store_path)?;
        let matches = store::load_matches(&conn)?;
        let fixtures = store::load_fixtures(&conn)?;

        let vectors = build_features(&matches, as_of, &cfg.features)?;
        let train_rows = dataset::write_training_table(
            &cfg.paths.train_table(&tournament),
            &schema,
            &matches,
            &vectors,
        )?;
        let fixture_vectors = build_fixture_features(&matches, &fixtures, as_of, &cfg.features)?;
        let inference_rows = dataset::write_inference_table(
            &cfg.paths.inference_table(&tournament),
            &schema,
            &fixture_vectors,
        )?;
        info!(%tournament, %as_of, train_rows, inference_rows, "features built");
        results.push(FeaturesResult {
            tournament,
            as_of,
            train_rows,
            inference_rows,
        });
    }
    Ok(results)
}

/// `train.parquet` -> model artifact + `metrics.json`.
pub fn run_train(cfg: &PipelineConfig) -> Result<Vec<TrainResult>> {
    let mut results = Vec::new();
    for tournament in tournaments(cfg)? {
        let table = cfg.paths.train_table(&tournament);
        if !table.exists() {
            warn!(%tournament, "no processed training table, skipping");
            continue;
        }
        let ds = dataset::read_training_table(&table, cfg.training.outcome_set)?;
        let outcome = train(&ds, &cfg.training)
            .with_context(|| format!("train model for {tournament}"))?;

        let model_path = cfg.paths.model_path(&tournament, &cfg.model.name);
        outcome.model.save(&model_path)?;
        let metrics_path = cfg.paths.metrics_path(&tournament);
        let metrics = serde_json::to_string_pretty(&outcome.report).context("serialize metrics")?;
        fs::write(&metrics_path, metrics)
            .with_context(|| format!("write {}", metrics_path.display()))?;

        info!(%tournament, model = %model_path.display(), "model saved");
        results.push(TrainResult {
            tournament,
            model_path,
            report: outcome.report,
        });
    }
    if results.is_empty() {
        return Err(anyhow!(
            "no processed training data under {}",
            cfg.paths.processed_dir.display()
        ));
    }
    Ok(results)
}

pub fn run_predict(cfg: &PipelineConfig) -> Result<Vec<PredictResult>> {
    let mut results = Vec::new();
    for tournament in tournaments(cfg)? {
        let model_path = cfg.paths.model_path(&tournament, &cfg.model.name);
        let table = cfg.paths.inference_table(&tournament);
        if !model_path.exists() || !table.exists() {
            warn!(%tournament, "model or inference table missing, skipping");
            continue;
        }
        let model = ProbabilisticModel::load(&model_path)
            .with_context(|| format!("load model {}", model_path.display()))?;
        let vectors = dataset::read_inference_table(&table)?;
        let forecasts = predict_batch(&model, &vectors)
            .with_context(|| format!("predict fixtures for {tournament}"))?;

        let output = cfg.paths.predictions_path(&tournament);
        write_predictions(&output, &model, &forecasts)?;
        info!(%tournament, fixtures = forecasts.len(), output = %output.display(), "predictions written");
        results.push(PredictResult {
            tournament,
            output,
            forecasts,
        });
    }
    Ok(results)
}

pub fn run_all(cfg: &PipelineConfig, as_of: NaiveDate) -> Result<()> {
    run_ingest(cfg)?;
    run_features(cfg, as_of)?;
    run_train(cfg)?;
    run_predict(cfg)?;
    Ok(())
}
