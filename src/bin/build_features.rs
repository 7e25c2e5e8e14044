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

    let results = pipeline::run_features(&cfg, as_of)?;
    println!("Features built as of {as_of} ({} features)", cfg.features.catalog.len());
    for item in &results {
        println!(
            "{}: train rows={} inference rows={}",
            item.tournament, item.train_rows, item.inference_rows
        );
    }
    Ok(())
}
