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
    let results = pipeline::run_ingest(&cfg)?;

    println!("Ingest complete");
    for item in &results {
        println!(
            "{}: {} -> run {} | matches={} fixtures={} resolved={} | store total={} latest={}",
            item.tournament,
            item.source.display(),
            item.store.run_id,
            item.store.matches_upserted,
            item.store.fixtures_upserted,
            item.store.fixtures_resolved,
            item.store.total_matches,
            item.store.latest_match_date.as_deref().unwrap_or("n/a")
        );
        if item.duplicates > 0 || item.dropped_rows > 0 {
            println!(
                "  duplicates replaced={} rows dropped={}",
                item.duplicates, item.dropped_rows
            );
        }
    }
    if results.is_empty() {
        println!("no tournaments with source data");
    }
    Ok(())
}
