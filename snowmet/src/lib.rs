//! # snowmet - Meteorological forcing for snow-cover models
//!
//! Fetches hourly weather for a single point from a forecast-model query
//! service or a reanalysis cube archive, harmonizes it into one canonical
//! hourly schema, fills snow height from daily snow depth grids and writes
//! the result as a SMET 1.1 ASCII file.
//!
//! ## Features
//!
//! - **Two source kinds**: Open-Meteo compatible services and Zarr-style
//!   hourly cubes (local directory or HTTP)
//! - **Canonical schema**: `TA RH VW DW ISWR [ILWR] PSUM HS` in SI units
//! - **Snow depth grids**: memory-mapped daily rasters, auto-detected from file size
//! - **Write-once caches**: daily responses and grid archives on disk
//!
//! ## Quick Start
//!
//! ```ignore
//! use snowmet::{run, AltitudeUnit, Period, RunConfig, SnowDepthServiceBuilder, StationMetadata};
//! use snowmet::source::{GridModelDescriptor, SourceDescriptor};
//!
//! let config = RunConfig {
//!     station: StationMetadata::new("CSO", "Cameron Pass", 40.52, -105.89, 3150.0, AltitudeUnit::Meters),
//!     period: Period::new(start, end)?,
//!     source: SourceDescriptor::GridModel(GridModelDescriptor::default()),
//!     output: "CSO.smet".into(),
//!     cache_dir: Some("./snowmet_cache".into()),
//!     fetch: Default::default(),
//!     snow_depth: true,
//! };
//!
//! let snow = SnowDepthServiceBuilder::from_env().build()?;
//! let summary = run(&config, Some(&snow))?;
//! println!("{} rows written to {}", summary.rows, summary.output.display());
//! ```
//!
//! ## Snow Depth Grid Format
//!
//! Each daily raster is a headerless grid of 16-bit big-endian signed
//! integers, row 0 at the northern edge:
//!
//! - **Legacy** (before October 2013): 6935×3351 cells
//! - **Current**: 3353×3353 cells
//!
//! Values are millimeters; -9999 marks cells without data.

pub mod cache;
pub mod derived;
pub mod download;
pub mod error;
pub mod fetch;
pub mod filename;
pub mod frame;
pub mod grid;
pub mod harmonize;
pub mod period;
pub mod pipeline;
pub mod service;
pub mod smet;
pub mod source;
pub mod station;

// Re-export main types at crate root for convenience
pub use error::{CoverageBound, ForcingError, Result};
pub use frame::{CanonicalFrame, CanonicalRecord, Column, NativeFrame, NODATA};
pub use grid::{GridEra, GridLookup, SnowGrid, Unavailable};
pub use period::Period;
pub use pipeline::{build_frame, run, RunConfig, RunSummary};
pub use service::{CacheStats, EnrichStats, PrefetchStats, SnowDepthService, SnowDepthServiceBuilder};
pub use smet::{SmetDocument, SmetWriter};
pub use source::{SourceDescriptor, SourceRequest, WeatherSource};
pub use station::{AltitudeUnit, StationMetadata};
