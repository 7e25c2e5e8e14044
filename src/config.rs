use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::features::{FeatureKind, FeatureSchema};
use crate::outcome::OutcomeSet;

pub const DEFAULT_CONFIG_PATH: &str = "conf/pipeline.toml";
pub const CONFIG_PATH_ENV: &str = "SPORTS_FORECAST_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub data: DataConfig,
    pub features: FeatureConfig,
    pub training: TrainConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source_dir: PathBuf,
    pub interim_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub models_dir: PathBuf,
    pub predictions_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("data/source"),
            interim_dir: PathBuf::from("data/interim"),
            processed_dir: PathBuf::from("data/processed"),
            models_dir: PathBuf::from("models"),
            predictions_dir: PathBuf::from("data/predictions"),
        }
    }
}

impl PathsConfig {
    pub fn store_path(&self, tournament: &str) -> PathBuf {
        self.interim_dir.join(tournament).join("matches.sqlite")
    }

    pub fn train_table(&self, tournament: &str) -> PathBuf {
        self.processed_dir.join(tournament).join("train.parquet")
    }

    pub fn inference_table(&self, tournament: &str) -> PathBuf {
        self.processed_dir.join(tournament).join("inference.parquet")
    }

    pub fn model_path(&self, tournament: &str, model_name: &str) -> PathBuf {
        self.models_dir
            .join(tournament)
            .join(format!("{model_name}.json"))
    }

    pub fn metrics_path(&self, tournament: &str) -> PathBuf {
        self.models_dir.join(tournament).join("metrics.json")
    }

    pub fn predictions_path(&self, tournament: &str) -> PathBuf {
        self.predictions_dir
            .join(tournament)
            .join("predictions.parquet")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Empty means every sub-directory of `paths.source_dir`.
    pub tournaments: Vec<String>,
    pub source_files: Vec<String>,
    pub column_mapping: BTreeMap<String, String>,
    pub date_formats: Vec<String>,
    pub finished_statuses: Vec<String>,
    pub upcoming_statuses: Vec<String>,
    pub drop_statuses: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            tournaments: Vec::new(),
            source_files: strings(&["source.csv", "source.parquet"]),
            column_mapping: BTreeMap::new(),
            date_formats: strings(&[
                "%Y-%m-%d",
                "%Y-%m-%d %H:%M:%S",
                "%Y-%m-%dT%H:%M:%S",
                "%d.%m.%Y",
                "%d/%m/%Y",
            ]),
            finished_statuses: strings(&["finished", "ft", "played", "complete", "completed"]),
            upcoming_statuses: strings(&["scheduled", "upcoming", "not_started", "ns", "fixture"]),
            drop_statuses: strings(&["cancelled", "canceled", "postponed", "abandoned", "awarded"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub catalog: Vec<String>,
    pub form_window: usize,
    pub long_window: usize,
    pub elo_k: f64,
    pub elo_home_advantage: f64,
    pub elo_initial: f64,
    pub max_rest_days: f64,
    pub defaults: FeatureDefaults,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            catalog: FeatureKind::default_catalog()
                .iter()
                .map(|kind| kind.name().to_string())
                .collect(),
            form_window: 5,
            long_window: 10,
            elo_k: 20.0,
            elo_home_advantage: 60.0,
            elo_initial: 1500.0,
            max_rest_days: 28.0,
            defaults: FeatureDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureDefaults {
    pub points_per_match: f64,
    pub goals_per_match: f64,
    pub home_win_rate: f64,
    pub away_win_rate: f64,
    pub h2h_home_win_rate: f64,
    pub h2h_draw_rate: f64,
    pub rest_days: f64,
    pub last_goal_diff: f64,
    pub last_goal_total: f64,
    pub odds_implied: [f64; 3],
}

impl Default for FeatureDefaults {
    fn default() -> Self {
        Self {
            points_per_match: 1.35,
            goals_per_match: 1.35,
            home_win_rate: 0.45,
            away_win_rate: 0.30,
            h2h_home_win_rate: 0.45,
            h2h_draw_rate: 0.26,
            rest_days: 7.0,
            last_goal_diff: 0.0,
            last_goal_total: 2.7,
            odds_implied: [0.45, 0.27, 0.28],
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        FeatureSchema::from_catalog(&self.catalog)?;
        if self.form_window == 0 || self.long_window == 0 {
            return Err(ForecastError::Config(
                "features.form_window and features.long_window must be at least 1".to_string(),
            ));
        }
        if !(self.elo_k.is_finite() && self.elo_k > 0.0) {
            return Err(ForecastError::Config(format!(
                "features.elo_k must be positive, got {}",
                self.elo_k
            )));
        }
        if !(self.max_rest_days.is_finite() && self.max_rest_days > 0.0) {
            return Err(ForecastError::Config(format!(
                "features.max_rest_days must be positive, got {}",
                self.max_rest_days
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Share of the most recent examples held out, in `(0, 1)`.
    pub validation_fraction: f64,
    pub random_seed: u64,
    pub calibration: bool,
    pub min_samples: usize,
    pub outcome_set: OutcomeSet,
    pub learning_rate: f64,
    pub l2: f64,
    pub max_epochs: usize,
    pub batch_size: usize,
    pub patience: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            random_seed: 42,
            calibration: true,
            min_samples: 30,
            outcome_set: OutcomeSet::ThreeWay,
            learning_rate: 0.05,
            l2: 1e-3,
            max_epochs: 300,
            batch_size: 32,
            patience: 20,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        let f = self.validation_fraction;
        if !(f.is_finite() && f > 0.0 && f < 1.0) {
            return Err(ForecastError::Config(format!(
                "training.validation_fraction must be in (0, 1), got {f}"
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ForecastError::Config(format!(
                "training.learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(ForecastError::Config(format!(
                "training.l2 must be non-negative, got {}",
                self.l2
            )));
        }
        if self.batch_size == 0 || self.max_epochs == 0 {
            return Err(ForecastError::Config(
                "training.batch_size and training.max_epochs must be at least 1".to_string(),
            ));
        }
        if self.min_samples < 2 {
            return Err(ForecastError::Config(format!(
                "training.min_samples must be at least 2, got {}",
                self.min_samples
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "softmax_v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: Option<PathBuf>,
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: Some(PathBuf::from("logs")),
            stdout: true,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ForecastError::Config(format!("failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| ForecastError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(content)
            .map_err(|e| ForecastError::Config(format!("failed to parse config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ForecastError::Config(format!("failed to serialize config: {e}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ForecastError::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| ForecastError::io(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.training.validate()?;
        if self.model.name.trim().is_empty() {
            return Err(ForecastError::Config("model.name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// `--config` argument, then `SPORTS_FORECAST_CONFIG`, then `conf/pipeline.toml`.
pub fn resolve_config_path(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(raw) if !raw.trim().is_empty() => PathBuf::from(raw.trim()),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineConfig, TrainConfig};
    use crate::outcome::OutcomeSet;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [training]
            validation_fraction = 0.25
            outcome_set = "home_win"

            [data]
            tournaments = ["rpl"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.training.validation_fraction, 0.25);
        assert_eq!(cfg.training.outcome_set, OutcomeSet::HomeWin);
        assert_eq!(cfg.training.random_seed, 42);
        assert_eq!(cfg.data.tournaments, vec!["rpl".to_string()]);
        assert_eq!(cfg.features.form_window, 5);
    }

    #[test]
    fn validation_fraction_bounds_are_exclusive() {
        for bad in [0.0, 1.0, -0.1, f64::NAN] {
            let cfg = TrainConfig {
                validation_fraction: bad,
                ..TrainConfig::default()
            };
            assert!(cfg.validate().is_err(), "{bad} accepted");
        }
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn unknown_feature_name_is_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [features]
            catalog = ["elo_diff", "shots_on_target"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("shots_on_target"));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = PipelineConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.features.catalog, cfg.features.catalog);
        assert_eq!(back.paths.models_dir, cfg.paths.models_dir);
    }
}
