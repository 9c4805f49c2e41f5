use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use snowmet::fetch::FetchConfig;
use snowmet::filename::Product;
use snowmet::source::{ArchiveDescriptor, GridModelDescriptor, SourceDescriptor};
use snowmet::{AltitudeUnit, Period, RunConfig, StationMetadata};
use std::path::PathBuf;
use tracing::info;

use super::GridOptions;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SourceKind {
    /// Open-Meteo compatible model-query service
    OpenMeteo,
    /// Hourly reanalysis cube store
    Archive,
}

#[derive(Args)]
pub struct BuildArgs {
    /// Station identifier (no whitespace)
    #[arg(long)]
    id: String,

    /// Station name (defaults to the identifier)
    #[arg(long)]
    name: Option<String>,

    /// Latitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_negative_numbers = true)]
    lon: f64,

    /// Station altitude
    #[arg(long, allow_negative_numbers = true)]
    altitude: f64,

    /// Altitude is given in feet
    #[arg(long)]
    feet: bool,

    /// First day (YYYY-MM-DD)
    #[arg(long)]
    start: NaiveDate,

    /// Last day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    end: NaiveDate,

    /// Offset of the written timestamps from UTC, in hours
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    tz: f64,

    /// Weather source
    #[arg(long, value_enum, default_value = "open-meteo")]
    source: SourceKind,

    /// Model passed to the query service
    #[arg(long, default_value = "best_match")]
    model: String,

    /// Query service endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Base URL or directory of the archive cube store
    #[arg(long, env = "SNOWMET_ARCHIVE_URL")]
    archive_url: Option<String>,

    /// Last date covered by the archive
    #[arg(long)]
    archive_end: Option<NaiveDate>,

    /// Leave HS as nodata instead of reading the snow depth grids
    #[arg(long)]
    no_snow_depth: bool,

    /// Request timeout in seconds
    #[arg(long, default_value = "120")]
    timeout: u64,

    /// Retries after a transient fetch failure
    #[arg(long, default_value = "1")]
    retries: u32,

    /// Output SMET file (defaults to <id>.smet)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(short, long)]
    json: bool,
}

pub fn run(grid: &GridOptions, args: BuildArgs) -> Result<()> {
    let unit = if args.feet {
        AltitudeUnit::Feet
    } else {
        AltitudeUnit::Meters
    };
    let name = args.name.unwrap_or_else(|| args.id.clone());
    let station = StationMetadata::new(&args.id, name, args.lat, args.lon, args.altitude, unit)
        .with_timezone(args.tz);
    let period = Period::new(args.start, args.end).context("Invalid date range")?;

    let source = match args.source {
        SourceKind::OpenMeteo => {
            let mut descriptor = GridModelDescriptor::default().with_model(args.model);
            if let Some(endpoint) = args.endpoint {
                descriptor = descriptor.with_endpoint(endpoint);
            }
            SourceDescriptor::GridModel(descriptor)
        }
        SourceKind::Archive => {
            let location = args.archive_url.context(
                "No archive location. Use --archive-url or set SNOWMET_ARCHIVE_URL",
            )?;
            let mut descriptor = ArchiveDescriptor::era5_land(location);
            if let Some(end) = args.archive_end {
                descriptor = descriptor.with_coverage_end(end);
            }
            SourceDescriptor::Archive(descriptor)
        }
    };

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("{}.smet", args.id)));

    let config = RunConfig {
        station,
        period,
        source,
        output,
        cache_dir: Some(grid.cache_dir.clone()),
        fetch: FetchConfig::default()
            .with_timeout(args.timeout)
            .with_max_retries(args.retries),
        snow_depth: !args.no_snow_depth,
    };

    let service = if config.snow_depth {
        Some(grid.service(Product::SnowDepth)?)
    } else {
        None
    };

    let summary = snowmet::run(&config, service.as_ref()).with_context(|| {
        format!(
            "Failed to build forcing for {} ({} to {})",
            config.station.id,
            config.period.start(),
            config.period.end()
        )
    })?;
    info!(rows = summary.rows, elapsed_ms = summary.elapsed_ms, "done");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Station: {}", summary.station_id);
        println!("Source: {}", summary.source_id);
        println!("Rows: {}", summary.rows);
        println!("Fields: {}", summary.fields.join(" "));
        if let Some(snow) = &summary.snow_depth {
            println!(
                "Snow depth: {}/{} days with values",
                snow.dates_with_value, snow.dates
            );
        }
        println!("Output written to: {}", summary.output.display());
    }

    Ok(())
}
