//! Daily grid archive download and extraction.
//!
//! The archive publishes one tar file per day. Each tar holds a
//! gzip-compressed raster (`.dat.gz`) plus a text header per product;
//! [`extract_product`] pulls one product's raster out of it.
//!
//! # Data Source
//!
//! The default template points at the masked (contiguous US) archive:
//!
//! ```text
//! https://noaadata.apps.nsidc.org/NOAA/G02158/masked/{year}/{month_dir}/SNODAS_{date}.tar
//! ```
//!
//! Mirrors can be used via a custom template with the same placeholders.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};

use crate::cache::write_once;
use crate::error::{ForcingError, Result};
use crate::fetch::{FetchConfig, HttpFetcher};
use crate::filename::{archive_filename, date_key, member_product, month_dir, Product};
use crate::grid::GridEra;

/// Masked archive of the public data center.
pub const DEFAULT_URL_TEMPLATE: &str =
    "https://noaadata.apps.nsidc.org/NOAA/G02158/masked/{year}/{month_dir}/SNODAS_{date}.tar";

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Identifier used in fetch errors.
const SOURCE_ID: &str = "snodas";

/// Configuration for downloading grid archives.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// URL template with `{year}`, `{month_dir}` and `{date}` placeholders.
    pub url_template: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Number of retry attempts on failure.
    pub max_retries: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: 3,
        }
    }
}

impl DownloadConfig {
    /// Create a configuration with a custom URL template.
    ///
    /// # Example
    ///
    /// ```
    /// use snowmet::download::DownloadConfig;
    ///
    /// let config = DownloadConfig::with_url_template(
    ///     "https://mirror.example.com/snodas/{year}/{month_dir}/SNODAS_{date}.tar",
    /// );
    /// ```
    pub fn with_url_template(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the maximum number of retry attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Download URL of the archive for `date`.
    pub fn build_url(&self, date: NaiveDate) -> Result<String> {
        if self.url_template.is_empty() {
            return Err(ForcingError::invalid("no grid archive URL template configured"));
        }
        Ok(self
            .url_template
            .replace("{year}", &format!("{:04}", date.year()))
            .replace("{month_dir}", &month_dir(date))
            .replace("{date}", &date_key(date)))
    }
}

/// Grid archive downloader.
pub struct Downloader {
    fetcher: HttpFetcher,
    config: DownloadConfig,
}

impl Downloader {
    /// Create a new downloader with the given configuration.
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(
            FetchConfig::default()
                .with_timeout(config.timeout_secs)
                .with_max_retries(config.max_retries),
        )?;
        Ok(Self { fetcher, config })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download the archive for `date` into `dest_dir`.
    ///
    /// An archive already present is reused without a request.
    ///
    /// # Returns
    ///
    /// The path to the `.tar` file.
    pub fn download_archive(&self, date: NaiveDate, dest_dir: &Path) -> Result<PathBuf> {
        let dest_path = dest_dir.join(archive_filename(date));
        if dest_path.exists() {
            debug!(%date, "archive already cached");
            return Ok(dest_path);
        }

        let url = self.config.build_url(date)?;
        info!(%date, %url, "downloading grid archive");
        let bytes = self.fetcher.get(&url, SOURCE_ID)?;
        write_once(&dest_path, &bytes)?;

        Ok(dest_path)
    }
}

/// Extract the raster of `product` from a daily tar archive.
///
/// Gzip-compressed (`.dat.gz`) and plain (`.dat`) members are accepted. The
/// extracted raster must have one of the known grid sizes.
pub fn extract_product(tar_bytes: &[u8], product: Product, date: NaiveDate) -> Result<Vec<u8>> {
    let context = archive_filename(date);
    let mut archive = Archive::new(Cursor::new(tar_bytes));

    for entry in archive.entries().map_err(|e| ForcingError::decode(&context, e))? {
        let mut entry = entry.map_err(|e| ForcingError::decode(&context, e))?;
        let name = entry
            .path()
            .map_err(|e| ForcingError::decode(&context, e))?
            .to_string_lossy()
            .to_string();
        if member_product(&name) != Some(product) {
            continue;
        }

        let mut raw = Vec::new();
        entry
            .read_to_end(&mut raw)
            .map_err(|e| ForcingError::decode(&name, e))?;

        let data = if name.to_ascii_lowercase().ends_with(".gz") {
            let mut data = Vec::new();
            GzDecoder::new(&raw[..])
                .read_to_end(&mut data)
                .map_err(|e| ForcingError::decode(&name, format!("failed to decompress gzip: {}", e)))?;
            data
        } else {
            raw
        };

        if GridEra::from_size(data.len()).is_none() {
            return Err(ForcingError::InvalidGridSize { size: data.len() });
        }
        debug!(%date, member = %name, bytes = data.len(), "extracted raster");
        return Ok(data);
    }

    Err(ForcingError::decode(
        context,
        format!("no {} member (code {})", product, product.code()),
    ))
}
