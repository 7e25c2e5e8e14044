use std::process::ExitCode;

use anyhow::Result;

use sports_forecast::cli;
use sports_forecast::download::download_file;

const DEFAULT_FILENAME: &str = "source.csv";

fn main() -> ExitCode {
    cli::finish(run())
}

fn run() -> Result<()> {
    let args = cli::args();
    let cfg = cli::bootstrap(&args)?;
    let url = cli::require(
        cli::arg_value(&args, "url").or_else(|| std::env::var("DEMO_DATA_URL").ok()),
        "url",
    )?;
    let tournament = cli::require(cli::arg_value(&args, "tournament"), "tournament")?;
    let filename =
        cli::arg_value(&args, "filename").unwrap_or_else(|| DEFAULT_FILENAME.to_string());

    let dst = cfg.paths.source_dir.join(&tournament).join(filename);
    let summary = download_file(&url, &dst)?;
    println!("Downloaded {} bytes", summary.bytes);
    println!("  from {}", summary.url);
    println!("  to   {}", summary.path.display());
    Ok(())
}
