use std::process::ExitCode;

use anyhow::Result;

use sports_forecast::cli;
use sports_forecast::pipeline;

fn main() -> ExitCode {
    cli::finish(run())
}

fn run() -> Result<()> {
    let args = cli::args();
    let cfg = cli::bootstrap(&args)?;
    let as_of = cli::date_arg(&args, "as-of")?.unwrap_or_else(pipeline::default_as_of);

    let ingested = pipeline::run_ingest(&cfg)?;
    println!("Ingest: {} tournament(s)", ingested.len());
    for item in &ingested {
        println!(
            "  {}: rows={} stored={} duplicates={} dropped={}",
            item.tournament,
            item.rows_read,
            item.store.total_matches,
            item.duplicates,
            item.dropped_rows
        );
    }

    let built = pipeline::run_features(&cfg, as_of)?;
    println!("Features as of {as_of}:");
    for item in &built {
        println!(
            "  {}: train={} inference={}",
            item.tournament, item.train_rows, item.inference_rows
        );
    }

    let trained = pipeline::run_train(&cfg)?;
    for item in &trained {
        println!("Model {} -> {}", item.tournament, item.model_path.display());
        for line in item.report.summary_lines() {
            println!("  {line}");
        }
    }

    let predicted = pipeline::run_predict(&cfg)?;
    for item in &predicted {
        println!(
            "Predictions {}: {} fixture(s) -> {}",
            item.tournament,
            item.forecasts.len(),
            item.output.display()
        );
    }
    Ok(())
}
