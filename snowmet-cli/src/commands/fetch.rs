use anyhow::{Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use snowmet::filename::Product;
use snowmet::Period;

use super::GridOptions;

pub fn run(grid: &GridOptions, start: NaiveDate, end: NaiveDate, product: Product) -> Result<()> {
    let period = Period::new(start, end).context("Invalid date range")?;
    let service = grid.service(product)?;

    let pb = ProgressBar::new(period.day_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut failed = Vec::new();
    let stats = service.prefetch(&period, |date, ok| {
        if !ok {
            failed.push(date);
        }
        pb.set_message(date.to_string());
        pb.inc(1);
    });
    pb.finish_with_message("done");

    println!("Grids loaded: {}", stats.grids_loaded);
    if stats.already_cached > 0 {
        println!("Already cached: {}", stats.already_cached);
    }
    if !failed.is_empty() {
        let dates: Vec<String> = failed.iter().map(NaiveDate::to_string).collect();
        println!("Unavailable ({}): {}", stats.failed, dates.join(", "));
    }
    println!("Elapsed: {}ms", stats.elapsed_ms);
    println!("Grid directory: {}", service.grid_dir().display());

    Ok(())
}
