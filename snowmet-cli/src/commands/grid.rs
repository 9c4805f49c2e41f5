use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use snowmet::filename::{raster_filename, Product};
use snowmet::grid::{GeoTransform, GridSummary};
use snowmet::GridEra;

use super::{format_size, GridOptions};

#[derive(Serialize)]
struct GridInfo {
    date: NaiveDate,
    product: String,
    path: String,
    era: &'static str,
    transform: GeoTransform,
    summary: GridSummary,
}

pub fn run(grid: &GridOptions, date: NaiveDate, product: Product, json: bool) -> Result<()> {
    let service = grid.service(product)?;
    let snow_grid = service
        .grid_for_date(date)
        .with_context(|| format!("Failed to load {} grid for {}", product, date))?;

    let path = service.grid_dir().join(raster_filename(date, product));
    let file_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    // Row 0 = north edge, Col 0 = west edge
    let transform = *snow_grid.transform();
    let summary = snow_grid.summary();
    let era = match snow_grid.era() {
        GridEra::Legacy => "legacy",
        GridEra::Current => "current",
    };

    if json {
        let info = GridInfo {
            date,
            product: product.to_string(),
            path: path.display().to_string(),
            era,
            transform,
            summary,
        };
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Grid: {} {}", date, product);
    println!("Path: {}", path.display());
    println!();
    println!(
        "Layout: {} ({}x{} cells)",
        era, transform.ncols, transform.nrows
    );
    println!(
        "Coverage: {:.4}N-{:.4}N, {:.4}W-{:.4}W",
        transform.south,
        transform.north,
        transform.west.abs(),
        transform.east.abs()
    );
    println!(
        "Cell size: {:.6} x {:.6} deg",
        transform.cell_width, transform.cell_height
    );
    println!("File size: {}", format_size(file_size));
    println!();

    if let (Some(min), Some(max)) = (summary.min_m, summary.max_m) {
        println!("Min value: {:.3}m", min);
        println!("Max value: {:.3}m", max);
    }

    if summary.nodata_cells > 0 {
        let pct = (summary.nodata_cells as f64 / summary.cells as f64) * 100.0;
        println!("Nodata cells: {} ({:.1}%)", summary.nodata_cells, pct);
    }

    Ok(())
}
