//! Write-once on-disk cache of daily source responses.
//!
//! Entries are keyed by source id, coordinate (rounded to 4 decimals),
//! station altitude (rounded to the meter) and UTC date, and hold one
//! complete day of native samples as JSON:
//!
//! ```text
//! {root}/responses/{source}/{lat}_{lon}_{alt}m/{YYYY-MM-DD}.json
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::Result;
use crate::frame::NativeFrame;

/// Write `bytes` to `path` unless a file is already there.
///
/// The data goes to a temporary file in the target directory first and is
/// then moved into place without overwriting, so readers never observe a
/// partial entry. Returns `false` when the entry already existed.
pub fn write_once(path: &Path, bytes: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}

/// What a cached response was requested for, apart from the date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryKey<'a> {
    pub source_id: &'a str,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
}

impl EntryKey<'_> {
    fn location_dir(&self) -> String {
        format!(
            "{:.4}_{:.4}_{:.0}m",
            self.latitude, self.longitude, self.altitude_m
        )
    }
}

/// Whether `frame` holds a full day: 24 hours, every sample present.
fn is_complete_day(frame: &NativeFrame) -> bool {
    frame.len() == 24 && !frame.series.is_empty() && !frame.has_gaps()
}

/// Daily response cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for one request key and date.
    pub fn entry_path(&self, key: &EntryKey<'_>, date: NaiveDate) -> PathBuf {
        self.root
            .join("responses")
            .join(key.source_id)
            .join(key.location_dir())
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Load a cached day. Unreadable or incomplete entries are skipped with
    /// a warning.
    pub fn load(&self, key: &EntryKey<'_>, date: NaiveDate) -> Option<NativeFrame> {
        let path = self.entry_path(key, date);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache entry");
                return None;
            }
        };
        match serde_json::from_slice::<NativeFrame>(&bytes) {
            Ok(frame) if is_complete_day(&frame) => {
                debug!(source = key.source_id, %date, "response cache hit");
                Some(frame)
            }
            Ok(frame) => {
                warn!(path = %path.display(), rows = frame.len(), "incomplete cache entry ignored");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache entry ignored");
                None
            }
        }
    }

    /// Store one day of samples.
    ///
    /// Only complete days strictly before today (UTC) are stored; returns
    /// whether a new entry was written.
    pub fn store(&self, key: &EntryKey<'_>, date: NaiveDate, frame: &NativeFrame) -> Result<bool> {
        if !is_complete_day(frame) || date >= Utc::now().date_naive() {
            return Ok(false);
        }
        let path = self.entry_path(key, date);
        let bytes = serde_json::to_vec(frame)?;
        write_once(&path, &bytes)
    }
}
