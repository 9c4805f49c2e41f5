use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use snowmet::filename::Product;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::GridOptions;

/// SMET forcing builder and snow depth grid tool
#[derive(Parser)]
#[command(name = "snowmet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Root of the on-disk caches (responses and grids)
    #[arg(
        short = 'd',
        long,
        env = "SNOWMET_CACHE_DIR",
        default_value = "./snowmet_cache",
        global = true
    )]
    cache_dir: PathBuf,

    /// Maximum decoded grids in memory
    #[arg(
        short,
        long,
        env = "SNOWMET_GRID_CACHE_SIZE",
        default_value = "400",
        global = true
    )]
    cache_size: u64,

    /// Never download grid archives
    #[arg(long, env = "SNOWMET_OFFLINE", global = true)]
    offline: bool,

    /// URL template for grid archives ({year}, {month_dir}, {date})
    #[arg(long, env = "SNOWMET_SNODAS_URL", global = true)]
    snodas_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a SMET forcing file for one station
    Build(commands::build::BuildArgs),

    /// Query a grid product for a single coordinate and date
    Depth {
        /// Date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Latitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,

        /// Grid product (depth, swe, cover, depth_change, accumulation, melt)
        #[arg(short, long, default_value = "depth")]
        product: Product,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Display information about one date's grid
    Grid {
        /// Date (YYYY-MM-DD)
        date: NaiveDate,

        /// Grid product (depth, swe, cover, depth_change, accumulation, melt)
        #[arg(short, long, default_value = "depth")]
        product: Product,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List cached grid dates
    List {
        /// Grid product (depth, swe, cover, depth_change, accumulation, melt)
        #[arg(short, long, default_value = "depth")]
        product: Product,
    },

    /// Download and extract grids for a date range
    Fetch {
        /// First date (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Grid product (depth, swe, cover, depth_change, accumulation, melt)
        #[arg(short, long, default_value = "depth")]
        product: Product,
    },
}

fn main() -> Result<()> {
    // Initialize tracing (stderr)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snowmet=info,snowmet_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let grid = GridOptions {
        cache_dir: cli.cache_dir,
        cache_size: cli.cache_size,
        offline: cli.offline,
        snodas_url: cli.snodas_url,
    };

    match cli.command {
        Commands::Build(args) => commands::build::run(&grid, args),
        Commands::Depth {
            date,
            lat,
            lon,
            product,
            json,
        } => commands::depth::run(&grid, date, lat, lon, product, json),
        Commands::Grid {
            date,
            product,
            json,
        } => commands::grid::run(&grid, date, product, json),
        Commands::List { product } => commands::list::run(&grid, product),
        Commands::Fetch {
            start,
            end,
            product,
        } => commands::fetch::run(&grid, start, end, product),
    }
}
