use std::process::ExitCode;

use anyhow::Result;

use sports_forecast::cli;
use sports_forecast::pipeline;

const PREVIEW_ROWS: usize = 10;

fn main() -> ExitCode {
    cli::finish(run())
}

fn run() -> Result<()> {
    let args = cli::args();
    let cfg = cli::bootstrap(&args)?;

    for item in pipeline::run_predict(&cfg)? {
        println!(
            "{}: {} fixture(s) -> {}",
            item.tournament,
            item.forecasts.len(),
            item.output.display()
        );
        for forecast in item.forecasts.iter().take(PREVIEW_ROWS) {
            let probs = forecast
                .distribution
                .iter()
                .map(|(label, p)| format!("{label}={p:.3}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("  {} {probs}", forecast.subject);
        }
        if item.forecasts.len() > PREVIEW_ROWS {
            println!("  ... {} more", item.forecasts.len() - PREVIEW_ROWS);
        }
    }
    Ok(())
}
