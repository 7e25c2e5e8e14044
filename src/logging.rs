use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::LoggingConfig;

pub const LOG_FILE_NAME: &str = "sports_forecast.log";

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// `RUST_LOG` wins over `logging.level`.
pub fn init(cfg: &LoggingConfig) -> Result<()> {
    INITIALIZED
        .get_or_try_init(|| install(cfg))
        .map(|_| ())
}

fn install(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .with_context(|| format!("invalid log level {:?}", cfg.level))?;

    let stdout_layer = cfg
        .stdout
        .then(|| fmt::layer().with_target(true).boxed());

    let file_layer = match &cfg.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("create log dir {}", dir.display()))?;
            let path = dir.join(LOG_FILE_NAME);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}
