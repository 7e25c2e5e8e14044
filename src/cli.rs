use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use tracing::{error, info};

use crate::config::{PipelineConfig, resolve_config_path};
use crate::error::exit_code_for;
use crate::logging;

pub fn args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

pub fn arg_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("--{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == &format!("--{name}") {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() && !next.starts_with("--") {
                return Some(next.trim().to_string());
            }
        }
    }
    None
}

pub fn has_flag(args: &[String], name: &str) -> bool {
    let flag = format!("--{name}");
    args.iter().any(|a| a == &flag)
}

pub fn date_arg(args: &[String], name: &str) -> Result<Option<NaiveDate>> {
    arg_value(args, name)
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .with_context(|| format!("--{name} expects YYYY-MM-DD, got {raw:?}"))
        })
        .transpose()
}

pub fn bootstrap(args: &[String]) -> Result<PipelineConfig> {
    dotenvy::dotenv().ok();
    let path = resolve_config_path(arg_value(args, "config").map(PathBuf::from));
    let cfg = PipelineConfig::load(&path)?;
    logging::init(&cfg.logging)?;
    info!(config = %path.display(), "configuration loaded");
    Ok(cfg)
}

pub fn require(value: Option<String>, name: &str) -> Result<String> {
    value.ok_or_else(|| anyhow!("missing required --{name}"))
}

pub fn finish(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{arg_value, date_arg, has_flag};

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn both_flag_spellings_are_read() {
        let a = args(&["--config=conf/a.toml", "--tournament", "rpl", "--dry-run"]);
        assert_eq!(arg_value(&a, "config").as_deref(), Some("conf/a.toml"));
        assert_eq!(arg_value(&a, "tournament").as_deref(), Some("rpl"));
        assert!(has_flag(&a, "dry-run"));
        assert_eq!(arg_value(&a, "url"), None);
    }

    #[test]
    fn dates_must_be_iso() {
        assert!(date_arg(&args(&["--as-of=2024-05-01"]), "as-of").unwrap().is_some());
        assert!(date_arg(&args(&["--as-of=01.05.2024"]), "as-of").is_err());
        assert!(date_arg(&args(&[]), "as-of").unwrap().is_none());
    }
}
