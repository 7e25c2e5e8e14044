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

    for item in pipeline::run_train(&cfg)? {
        println!("{} -> {}", item.tournament, item.model_path.display());
        for line in item.report.summary_lines() {
            println!("  {line}");
        }
    }
    Ok(())
}
