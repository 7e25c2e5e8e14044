use std::process::ExitCode;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;

use sports_forecast::backtest::{BacktestReport, run_backtest};
use sports_forecast::cli;
use sports_forecast::match_record::MatchRecord;
use sports_forecast::pipeline;
use sports_forecast::store;

/// Share of matches before the split when `--split-date` is not given.
const DEFAULT_TRAIN_SHARE: f64 = 0.8;

fn main() -> ExitCode {
    cli::finish(run())
}

fn run() -> Result<()> {
    let args = cli::args();
    let cfg = cli::bootstrap(&args)?;
    let split_arg = cli::date_arg(&args, "split-date")?;
    let show_bins = cli::has_flag(&args, "bins");

    let mut reports: Vec<(String, BacktestReport)> = Vec::new();
    let mut skipped = Vec::new();
    for tournament in pipeline::tournaments(&cfg)? {
        let store_path = cfg.paths.store_path(&tournament);
        if !store_path.exists() {
            skipped.push(tournament);
            continue;
        }
        let conn = store::open_store(&store_path)?;
        let matches = store::load_matches(&conn)?;
        let Some(split) = split_arg.or_else(|| default_split(&matches)) else {
            skipped.push(tournament);
            continue;
        };
        let report = run_backtest(&matches, &cfg.features, &cfg.training, split)?;
        reports.push((tournament, report));
    }

    println!("Pre-match backtest ({})", cfg.training.outcome_set);
    if !skipped.is_empty() {
        println!("Skipped (no data): {skipped:?}");
    }
    println!();
    if reports.is_empty() {
        return Err(anyhow!("no tournament had data to evaluate"));
    }

    for (tournament, r) in &reports {
        let h = &r.holdout;
        println!(
            "{} split={} train={} holdout={} ll={:.4} ll_base={:.4} ll_uniform={:.4} brier={:.4} acc={:.3} ece={:.4} calibrated={}",
            tournament,
            r.split_date,
            r.training.n_samples,
            h.metrics.samples,
            h.metrics.log_loss,
            h.baseline_empirical.log_loss,
            h.baseline_uniform.log_loss,
            h.metrics.brier,
            h.metrics.accuracy,
            h.ece,
            r.training.calibration_applied
        );
        if show_bins {
            for (label, bins) in &h.bins {
                for b in bins.iter().filter(|b| b.count > 0) {
                    println!(
                        "    {label:<12} [{:.1},{:.1}) n={:<5} pred={:.3} actual={:.3}",
                        b.bucket_start, b.bucket_end, b.count, b.avg_pred, b.actual_rate
                    );
                }
            }
        }
    }

    let total: usize = reports.iter().map(|(_, r)| r.holdout.metrics.samples).sum();
    println!();
    println!(
        "aggregate samples={} ll={:.4} ll_base={:.4} brier={:.4} ece={:.4}",
        total,
        weighted_mean(&reports, total, |r| r.holdout.metrics.log_loss),
        weighted_mean(&reports, total, |r| r.holdout.baseline_empirical.log_loss),
        weighted_mean(&reports, total, |r| r.holdout.metrics.brier),
        weighted_mean(&reports, total, |r| r.holdout.ece)
    );
    Ok(())
}

fn default_split(matches: &[MatchRecord]) -> Option<NaiveDate> {
    if matches.len() < 2 {
        return None;
    }
    let mut dates: Vec<NaiveDate> = matches.iter().map(|m| m.date).collect();
    dates.sort_unstable();
    let idx = ((dates.len() as f64 * DEFAULT_TRAIN_SHARE) as usize).min(dates.len() - 1);
    Some(dates[idx])
}

fn weighted_mean(
    reports: &[(String, BacktestReport)],
    total: usize,
    f: impl Fn(&BacktestReport) -> f64,
) -> f64 {
    if total == 0 {
        return 0.0;
    }
    reports
        .iter()
        .map(|(_, r)| f(r) * r.holdout.metrics.samples as f64)
        .sum::<f64>()
        / total as f64
}
