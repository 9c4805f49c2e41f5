//! Snow depth service with per-date grid caching.
//!
//! This module provides [`SnowDepthService`], a high-level interface for
//! querying the daily snow grids with automatic archive download, raster
//! extraction and in-memory caching.
//!
//! Grids are kept on disk under `{cache_dir}/snodas/`:
//!
//! ```text
//! SNODAS_20240115.tar         downloaded archive
//! SNODAS_20240115_1036.dat    extracted raster, memory-mapped on load
//! ```
//!
//! ```ignore
//! use snowmet::{SnowDepthServiceBuilder, download::DownloadConfig};
//!
//! let service = SnowDepthServiceBuilder::new("/data/snowmet")
//!     .cache_size(60)
//!     .auto_download(DownloadConfig::default())
//!     .build()?;
//!
//! // Downloads and extracts the 2024-01-15 archive if not present locally
//! let depth = service.lookup(date, 40.52, -105.89);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use moka::sync::Cache;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::write_once;
use crate::download::{extract_product, DownloadConfig, Downloader};
use crate::error::{ForcingError, Result};
use crate::filename::{archive_filename, date_key, parse_raster_filename, raster_filename, Product};
use crate::frame::{CanonicalFrame, Column};
use crate::grid::{GridLookup, SnowGrid, Unavailable};
use crate::period::Period;

/// Default number of decoded grids held in memory.
pub const DEFAULT_CACHE_SIZE: u64 = 400;

/// Default root of the on-disk caches.
pub const DEFAULT_CACHE_DIR: &str = "./snowmet_cache";

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of dates currently in the cache.
    pub entry_count: u64,
    /// Number of cache hits (requests served from cache).
    pub hit_count: u64,
    /// Number of cache misses (grids loaded from disk or network).
    pub miss_count: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Outcome of enriching a frame's `HS` column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichStats {
    /// Distinct UTC dates in the frame.
    pub dates: u64,
    /// Dates for which a depth value was found.
    pub dates_with_value: u64,
    /// Dates left as nodata.
    pub dates_unavailable: u64,
    /// Rows that received a value.
    pub rows_filled: u64,
}

/// Statistics from a prefetch operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrefetchStats {
    /// Number of dates in the requested range.
    pub dates_requested: u64,
    /// Number of grids newly loaded.
    pub grids_loaded: u64,
    /// Number of grids already in memory.
    pub already_cached: u64,
    /// Number of dates that failed to load.
    pub failed: u64,
    /// Total elapsed time in milliseconds.
    pub elapsed_ms: u64,
}

/// High-level snow grid service with automatic grid caching.
///
/// Each date is resolved at most once per service: a decoded grid stays in
/// memory (up to the configured capacity), and a date that could not be
/// loaded is remembered as unavailable rather than retried.
///
/// # Example
///
/// ```ignore
/// use snowmet::SnowDepthService;
///
/// let service = SnowDepthService::new("/data/snowmet", 30);
///
/// let depth = service.lookup(date, 40.52, -105.89);
/// if let Some(m) = depth.meters() {
///     println!("Snow depth: {:.2}m", m);
/// }
///
/// let stats = service.cache_stats();
/// println!("Cache hit rate: {:.1}%", stats.hit_rate() * 100.0);
/// ```
pub struct SnowDepthService {
    /// Root cache directory.
    cache_dir: PathBuf,
    /// Product served by lookups.
    product: Product,
    /// Decoded grids keyed by date key; `None` marks a date that failed.
    grid_cache: Cache<String, Option<Arc<SnowGrid>>>,
    /// Number of cache hits.
    hit_count: AtomicU64,
    /// Number of cache misses.
    miss_count: AtomicU64,
    /// Optional downloader for missing archives.
    downloader: Option<Downloader>,
}

impl SnowDepthService {
    /// Create a service reading only grids already on disk.
    ///
    /// # Arguments
    ///
    /// * `cache_dir` - Root cache directory (grids live in its `snodas/` subdirectory)
    /// * `cache_size` - Maximum number of decoded grids kept in memory
    pub fn new<P: AsRef<Path>>(cache_dir: P, cache_size: u64) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            product: Product::default(),
            grid_cache: Cache::builder().max_capacity(cache_size).build(),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            downloader: None,
        }
    }

    /// Create a builder for more configuration options.
    pub fn builder<P: AsRef<Path>>(cache_dir: P) -> SnowDepthServiceBuilder {
        SnowDepthServiceBuilder::new(cache_dir)
    }

    /// Directory holding archives and extracted rasters.
    pub fn grid_dir(&self) -> PathBuf {
        self.cache_dir.join("snodas")
    }

    pub fn product(&self) -> Product {
        self.product
    }

    /// Value at a coordinate on a date. Never fails.
    ///
    /// # Returns
    ///
    /// - `GridLookup::Meters(m)` - value in meters
    /// - `GridLookup::Unavailable(OutsideDomain | NoData)` - no value at that cell
    /// - `GridLookup::Unavailable(Missing)` - no grid for the date
    pub fn lookup(&self, date: NaiveDate, lat: f64, lon: f64) -> GridLookup {
        match self.grid_for_date(date) {
            Ok(grid) => grid.lookup(lat, lon),
            Err(_) => GridLookup::Unavailable(Unavailable::Missing),
        }
    }

    /// Decoded grid for a date, from memory, disk, or download if enabled.
    ///
    /// A date that failed once fails again with
    /// [`ForcingError::GridNotAvailable`] without another attempt.
    pub fn grid_for_date(&self, date: NaiveDate) -> Result<Arc<SnowGrid>> {
        let key = date_key(date);
        if let Some(entry) = self.grid_cache.get(&key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return entry.ok_or(ForcingError::GridNotAvailable { date });
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);
        match self.load_grid(date) {
            Ok(grid) => {
                let grid = Arc::new(grid);
                self.grid_cache.insert(key, Some(grid.clone()));
                Ok(grid)
            }
            Err(e) => {
                warn!(%date, error = %e, "grid unavailable, date left without snow depth");
                self.grid_cache.insert(key, None);
                Err(e)
            }
        }
    }

    /// Load a grid from an extracted raster, a cached archive, or the network.
    fn load_grid(&self, date: NaiveDate) -> Result<SnowGrid> {
        let dir = self.grid_dir();
        let raster_path = dir.join(raster_filename(date, self.product));
        if raster_path.exists() {
            debug!(%date, path = %raster_path.display(), "loading cached raster");
            return SnowGrid::from_file(&raster_path);
        }

        let archive_path = dir.join(archive_filename(date));
        if !archive_path.exists() {
            match &self.downloader {
                Some(downloader) => {
                    downloader.download_archive(date, &dir)?;
                }
                None => return Err(ForcingError::GridNotAvailable { date }),
            }
        }

        let tar = fs::read(&archive_path)?;
        let raster = extract_product(&tar, self.product, date)?;
        write_once(&raster_path, &raster)?;
        SnowGrid::from_file(&raster_path)
    }

    /// Fill the `HS` column of a frame from the grids.
    ///
    /// Rows are grouped by UTC date so each date is looked up once. Dates
    /// without a value are left missing.
    pub fn enrich(&self, frame: &mut CanonicalFrame, lat: f64, lon: f64) -> Result<EnrichStats> {
        let mut groups: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (i, ts) in frame.timestamps().iter().enumerate() {
            groups.entry(ts.date_naive()).or_default().push(i);
        }

        if !frame.has_column(Column::Hs) {
            frame.insert(Column::Hs, vec![None; frame.len()])?;
        }

        let mut stats = EnrichStats::default();
        let mut values: Vec<(usize, f64)> = Vec::new();
        for (date, indices) in &groups {
            stats.dates += 1;
            match self.lookup(*date, lat, lon) {
                GridLookup::Meters(m) => {
                    stats.dates_with_value += 1;
                    stats.rows_filled += indices.len() as u64;
                    values.extend(indices.iter().map(|&i| (i, m)));
                }
                GridLookup::Unavailable(reason) => {
                    debug!(%date, ?reason, "no snow depth");
                    stats.dates_unavailable += 1;
                }
            }
        }

        if let Some(hs) = frame.column_mut(Column::Hs) {
            for (i, m) in values {
                hs[i] = Some(m);
            }
        }

        info!(
            dates = stats.dates,
            with_value = stats.dates_with_value,
            unavailable = stats.dates_unavailable,
            "snow depth enrichment"
        );
        Ok(stats)
    }

    /// Dates with an extracted raster of this product or a downloaded archive.
    pub fn cached_dates(&self) -> Vec<NaiveDate> {
        let entries = match fs::read_dir(self.grid_dir()) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut dates = BTreeSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if let Some((date, product)) = parse_raster_filename(&name) {
                if product == self.product {
                    dates.insert(date);
                }
            } else if let Some(key) = name
                .strip_prefix("SNODAS_")
                .and_then(|s| s.strip_suffix(".tar"))
            {
                if let Ok(date) = NaiveDate::parse_from_str(key, "%Y%m%d") {
                    dates.insert(date);
                }
            }
        }

        dates.into_iter().collect()
    }

    /// Load every grid of a date range into the cache.
    ///
    /// `progress` is called after each date with whether it succeeded.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let stats = service.prefetch(&period, |date, ok| println!("{} {}", date, ok));
    /// println!("Loaded {} grids in {}ms", stats.grids_loaded, stats.elapsed_ms);
    /// ```
    pub fn prefetch(&self, period: &Period, mut progress: impl FnMut(NaiveDate, bool)) -> PrefetchStats {
        let start = Instant::now();
        let mut stats = PrefetchStats::default();

        for date in period.days() {
            stats.dates_requested += 1;

            if let Some(entry) = self.grid_cache.get(&date_key(date)) {
                let ok = entry.is_some();
                if ok {
                    stats.already_cached += 1;
                } else {
                    stats.failed += 1;
                }
                progress(date, ok);
                continue;
            }

            let ok = self.grid_for_date(date).is_ok();
            if ok {
                stats.grids_loaded += 1;
            } else {
                stats.failed += 1;
            }
            progress(date, ok);
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        stats
    }

    /// Check if auto-download is enabled.
    pub fn has_auto_download(&self) -> bool {
        self.downloader.is_some()
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.grid_cache.run_pending_tasks();
        CacheStats {
            entry_count: self.grid_cache.entry_count(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }

    /// Get the root cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the maximum cache size.
    pub fn cache_capacity(&self) -> u64 {
        self.grid_cache.policy().max_capacity().unwrap_or(0)
    }

    /// Clear all grids (and remembered failures) from the cache.
    pub fn clear_cache(&self) {
        self.grid_cache.invalidate_all();
    }
}

/// Builder for creating [`SnowDepthService`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// use snowmet::{filename::Product, SnowDepthServiceBuilder};
///
/// let service = SnowDepthServiceBuilder::new("/data/snowmet")
///     .cache_size(100)
///     .product(Product::SnowWaterEquivalent)
///     .build()?;
/// ```
pub struct SnowDepthServiceBuilder {
    cache_dir: PathBuf,
    cache_size: u64,
    product: Product,
    download_config: Option<DownloadConfig>,
}

impl SnowDepthServiceBuilder {
    /// Create a new builder with the specified cache directory.
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            cache_size: DEFAULT_CACHE_SIZE,
            product: Product::default(),
            download_config: None,
        }
    }

    /// Create a builder configured from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `SNOWMET_CACHE_DIR` | Root of the on-disk caches | `./snowmet_cache` |
    /// | `SNOWMET_GRID_CACHE_SIZE` | Maximum grids in memory | 400 |
    /// | `SNOWMET_SNODAS_URL` | URL template for grid archives | public archive |
    /// | `SNOWMET_OFFLINE` | `true`/`1` disables downloads | false |
    ///
    /// # URL Template Placeholders
    ///
    /// - `{year}` - Four-digit year
    /// - `{month_dir}` - Month directory (e.g., "01_Jan")
    /// - `{date}` - Date key (e.g., "20240115")
    pub fn from_env() -> Self {
        let cache_dir = std::env::var("SNOWMET_CACHE_DIR")
            .unwrap_or_else(|_| DEFAULT_CACHE_DIR.to_string());

        let cache_size: u64 = std::env::var("SNOWMET_GRID_CACHE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_SIZE);

        let offline = std::env::var("SNOWMET_OFFLINE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let download_config = if offline {
            None
        } else {
            Some(match std::env::var("SNOWMET_SNODAS_URL") {
                Ok(template) => DownloadConfig::with_url_template(template),
                Err(_) => DownloadConfig::default(),
            })
        };

        Self {
            cache_dir: PathBuf::from(cache_dir),
            cache_size,
            product: Product::default(),
            download_config,
        }
    }

    /// Set the root cache directory.
    pub fn cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Set the maximum number of grids to keep in memory.
    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Set the product served by lookups.
    pub fn product(mut self, product: Product) -> Self {
        self.product = product;
        self
    }

    /// Enable downloading of missing archives.
    pub fn auto_download(mut self, config: DownloadConfig) -> Self {
        self.download_config = Some(config);
        self
    }

    /// Disable downloading; only grids already on disk are used.
    pub fn offline(mut self) -> Self {
        self.download_config = None;
        self
    }

    /// Build the [`SnowDepthService`].
    ///
    /// # Errors
    ///
    /// Returns an error if the downloader cannot be created (e.g., due to TLS
    /// initialization failure).
    pub fn build(self) -> Result<SnowDepthService> {
        let downloader = match self.download_config {
            Some(config) => Some(Downloader::new(config)?),
            None => None,
        };

        Ok(SnowDepthService {
            cache_dir: self.cache_dir,
            product: self.product,
            grid_cache: Cache::builder().max_capacity(self.cache_size).build(),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            downloader,
        })
    }
}
