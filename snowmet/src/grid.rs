//! Daily snow grid decoding and nearest-cell lookup.
//!
//! This module provides the [`SnowGrid`] struct for reading one day's raw
//! snow raster and extracting values at specific coordinates.
//!
//! A raster is a headerless block of big-endian `i16` cells, row-major with
//! row 0 at the northern edge. Two layouts have been published; the one in
//! use is detected from the byte length.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use serde::Serialize;

use crate::error::{ForcingError, Result};

/// Raw cell value marking no data.
pub const NODATA_RAW: i16 = -9999;

/// Raw cells are millimeters.
const RAW_PER_METER: f64 = 1000.0;

/// Values below this many meters are reported as bare ground.
const MIN_REPORTED_M: f64 = 0.01;

/// Column and row counts of the pre-October-2013 grid.
const LEGACY_COLS: usize = 6935;
const LEGACY_ROWS: usize = 3351;

/// Column and row counts of the current grid.
const CURRENT_COLS: usize = 3353;
const CURRENT_ROWS: usize = 3353;

/// File size of the legacy grid: 6935 × 3351 × 2 bytes
const LEGACY_SIZE: usize = LEGACY_COLS * LEGACY_ROWS * 2; // 46,478,370 bytes

/// File size of the current grid: 3353 × 3353 × 2 bytes
const CURRENT_SIZE: usize = CURRENT_COLS * CURRENT_ROWS * 2; // 22,485,218 bytes

/// Published layout of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GridEra {
    /// Before October 2013.
    Legacy,
    /// October 2013 onwards.
    Current,
}

impl GridEra {
    /// Detect the era from a raster's byte length.
    pub fn from_size(size: usize) -> Option<GridEra> {
        match size {
            LEGACY_SIZE => Some(GridEra::Legacy),
            CURRENT_SIZE => Some(GridEra::Current),
            _ => None,
        }
    }

    pub fn byte_size(&self) -> usize {
        match self {
            GridEra::Legacy => LEGACY_SIZE,
            GridEra::Current => CURRENT_SIZE,
        }
    }

    /// Georeferencing of this layout.
    pub fn transform(&self) -> GeoTransform {
        match self {
            GridEra::Legacy => GeoTransform::new(
                -124.733_75,
                52.874_583_333_333_33,
                -66.942_083_333_333_33,
                24.949_583_333_333_33,
                LEGACY_COLS,
                LEGACY_ROWS,
            ),
            GridEra::Current => GeoTransform::new(
                -124.733_333_333_333_33,
                52.875,
                -66.941_666_666_666_67,
                24.95,
                CURRENT_COLS,
                CURRENT_ROWS,
            ),
        }
    }
}

/// Extent and cell size of a north-up grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoTransform {
    pub west: f64,
    pub north: f64,
    pub east: f64,
    pub south: f64,
    pub ncols: usize,
    pub nrows: usize,
    /// Degrees of longitude per column.
    pub cell_width: f64,
    /// Degrees of latitude per row.
    pub cell_height: f64,
}

impl GeoTransform {
    pub fn new(west: f64, north: f64, east: f64, south: f64, ncols: usize, nrows: usize) -> Self {
        Self {
            west,
            north,
            east,
            south,
            ncols,
            nrows,
            cell_width: (east - west) / ncols as f64,
            cell_height: (north - south) / nrows as f64,
        }
    }

    /// Whether the coordinate lies within the bounding box (edges included).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.south..=self.north).contains(&lat) && (self.west..=self.east).contains(&lon)
    }

    /// `(row, col)` of the cell containing the coordinate.
    pub fn cell_index(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        if !self.contains(lat, lon) {
            return None;
        }
        let row = ((self.north - lat) / self.cell_height).floor() as usize;
        let col = ((lon - self.west) / self.cell_width).floor() as usize;
        // The southern and eastern edges belong to the last cell.
        Some((row.min(self.nrows - 1), col.min(self.ncols - 1)))
    }

    /// Coordinate `(lat, lon)` of a cell centre.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.north - (row as f64 + 0.5) * self.cell_height,
            self.west + (col as f64 + 0.5) * self.cell_width,
        )
    }
}

/// Why a lookup produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unavailable {
    /// Coordinate outside the grid's bounding box.
    OutsideDomain,
    /// Cell holds the nodata sentinel.
    NoData,
    /// No grid could be loaded for the date.
    Missing,
}

/// Result of a point lookup. Never an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GridLookup {
    Meters(f64),
    Unavailable(Unavailable),
}

impl GridLookup {
    pub fn meters(&self) -> Option<f64> {
        match self {
            GridLookup::Meters(m) => Some(*m),
            GridLookup::Unavailable(_) => None,
        }
    }
}

/// Raw grid value in meters.
pub fn raw_to_meters(raw: i16) -> Option<f64> {
    if raw == NODATA_RAW {
        return None;
    }
    let m = raw as f64 / RAW_PER_METER;
    Some(if m < MIN_REPORTED_M { 0.0 } else { m })
}

enum GridData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for GridData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            GridData::Mapped(m) => m,
            GridData::Owned(v) => v,
        }
    }
}

/// Cell statistics of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridSummary {
    pub cells: usize,
    pub nodata_cells: usize,
    /// Smallest and largest valid value in meters.
    pub min_m: Option<f64>,
    pub max_m: Option<f64>,
}

/// One decoded daily grid.
///
/// # Example
///
/// ```ignore
/// use snowmet::SnowGrid;
///
/// let grid = SnowGrid::from_file("SNODAS_20240115_1036.dat")?;
/// let depth = grid.lookup(40.52, -105.89);
/// println!("Snow depth: {:?}", depth);
/// ```
pub struct SnowGrid {
    data: GridData,
    era: GridEra,
    transform: GeoTransform,
}

impl SnowGrid {
    /// Load a raster file, memory-mapped.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened or memory-mapped
    /// - The file size matches neither grid layout
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;

        // SAFETY: cached rasters are written once and never modified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };

        Self::with_data(GridData::Mapped(mmap))
    }

    /// Wrap raster bytes held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::with_data(GridData::Owned(bytes))
    }

    fn with_data(data: GridData) -> Result<Self> {
        let era = GridEra::from_size(data.len())
            .ok_or(ForcingError::InvalidGridSize { size: data.len() })?;
        Ok(Self {
            data,
            era,
            transform: era.transform(),
        })
    }

    pub fn era(&self) -> GridEra {
        self.era
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// `(row, col)` of the cell containing the coordinate, floored.
    pub fn cell_index(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        self.transform.cell_index(lat, lon)
    }

    /// Raw value at a cell, or `None` outside the grid.
    pub fn raw_at(&self, row: usize, col: usize) -> Option<i16> {
        if row >= self.transform.nrows || col >= self.transform.ncols {
            return None;
        }
        let offset = (row * self.transform.ncols + col) * 2;
        Some(i16::from_be_bytes([self.data[offset], self.data[offset + 1]]))
    }

    /// Value in meters at the coordinate.
    pub fn lookup(&self, lat: f64, lon: f64) -> GridLookup {
        let Some((row, col)) = self.cell_index(lat, lon) else {
            return GridLookup::Unavailable(Unavailable::OutsideDomain);
        };
        match self.raw_at(row, col).and_then(raw_to_meters) {
            Some(m) => GridLookup::Meters(m),
            None => GridLookup::Unavailable(Unavailable::NoData),
        }
    }

    /// Count nodata cells and the range of valid values.
    pub fn summary(&self) -> GridSummary {
        let mut summary = GridSummary {
            cells: self.data.len() / 2,
            nodata_cells: 0,
            min_m: None,
            max_m: None,
        };
        for pair in self.data.chunks_exact(2) {
            match raw_to_meters(i16::from_be_bytes([pair[0], pair[1]])) {
                None => summary.nodata_cells += 1,
                Some(m) => {
                    summary.min_m = Some(summary.min_m.map_or(m, |v| v.min(m)));
                    summary.max_m = Some(summary.max_m.map_or(m, |v| v.max(m)));
                }
            }
        }
        summary
    }
}
