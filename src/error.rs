use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("data validation failed for {identity} (row {row}): {reason}")]
    DataValidation {
        row: usize,
        identity: String,
        reason: String,
    },

    #[error("insufficient data: {available} labelled examples, at least {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("feature schema mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;

impl ForecastError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::DataValidation { .. } => 2,
            Self::InsufficientData { .. } => 3,
            Self::SchemaMismatch { .. } => 4,
            _ => 1,
        }
    }
}

/// Walks an `anyhow` chain and maps the first `ForecastError` found to its exit code.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ForecastError>())
        .map(ForecastError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{ForecastError, exit_code_for};

    #[test]
    fn exit_code_survives_context_wrapping() {
        let err = Err::<(), _>(ForecastError::InsufficientData {
            available: 3,
            required: 30,
        })
        .context("train stage")
        .unwrap_err();
        assert_eq!(exit_code_for(&err), 3);

        let plain = anyhow::anyhow!("disk full");
        assert_eq!(exit_code_for(&plain), 1);
    }

    #[test]
    fn schema_mismatch_names_keys() {
        let err = ForecastError::SchemaMismatch {
            missing: vec!["elo_diff".to_string()],
            unexpected: vec!["shots".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("elo_diff"));
        assert!(text.contains("shots"));
    }
}
