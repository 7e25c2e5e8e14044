pub mod backtest;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod download;
pub mod elo;
pub mod error;
pub mod features;
pub mod forecast;
pub mod ingest;
pub mod logging;
pub mod match_record;
pub mod model;
pub mod outcome;
pub mod parquet_io;
pub mod pipeline;
pub mod store;
pub mod training;

pub use error::{ForecastError, Result};
