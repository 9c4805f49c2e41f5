use anyhow::Result;
use snowmet::filename::{archive_filename, raster_filename, Product};
use snowmet::{GridEra, SnowDepthService};
use std::fs;

use super::{format_size, GridOptions};

pub fn run(grid: &GridOptions, product: Product) -> Result<()> {
    let service = SnowDepthService::builder(&grid.cache_dir)
        .product(product)
        .build()?;
    let dir = service.grid_dir();

    if !dir.exists() {
        anyhow::bail!("Grid directory does not exist: {}", dir.display());
    }

    let dates = service.cached_dates();
    if dates.is_empty() {
        println!("No {} grids found in: {}", product, dir.display());
        return Ok(());
    }

    let mut legacy_count = 0;
    let mut current_count = 0;
    let mut archive_only = 0;
    let mut total_size: u64 = 0;

    println!("{:<12} {:>10} {:>12}", "DATE", "LAYOUT", "SIZE");
    println!("{}", "-".repeat(36));

    for date in &dates {
        let raster = fs::metadata(dir.join(raster_filename(*date, product)))
            .ok()
            .map(|m| m.len());
        let archive = fs::metadata(dir.join(archive_filename(*date)))
            .ok()
            .map(|m| m.len());
        let size = raster.unwrap_or(0) + archive.unwrap_or(0);
        total_size += size;

        let layout = match raster.and_then(|s| GridEra::from_size(s as usize)) {
            Some(GridEra::Legacy) => {
                legacy_count += 1;
                "legacy"
            }
            Some(GridEra::Current) => {
                current_count += 1;
                "current"
            }
            None if raster.is_none() => {
                archive_only += 1;
                "tar only"
            }
            None => "???",
        };

        println!("{:<12} {:>10} {:>12}", date, layout, format_size(size));
    }

    // Summary
    println!();
    println!("Summary:");
    println!("  Total dates: {}", dates.len());
    if legacy_count > 0 {
        println!("  Legacy layout: {}", legacy_count);
    }
    if current_count > 0 {
        println!("  Current layout: {}", current_count);
    }
    if archive_only > 0 {
        println!("  Not yet extracted: {}", archive_only);
    }
    println!("  Total size: {}", format_size(total_size));
    println!("  Grid directory: {}", dir.display());

    Ok(())
}
