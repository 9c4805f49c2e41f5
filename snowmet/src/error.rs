//! Error types for the snowmet library.

use std::fmt;

use chrono::NaiveDate;
use thiserror::Error;

/// Which end of a coverage window a request violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageBound {
    /// The request starts before the first covered date.
    Start,
    /// The request ends after the last covered date.
    End,
}

impl fmt::Display for CoverageBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageBound::Start => f.write_str("start"),
            CoverageBound::End => f.write_str("end"),
        }
    }
}

/// Errors that can occur while fetching, harmonizing or writing forcing data.
#[derive(Error, Debug)]
pub enum ForcingError {
    /// IO error when reading or writing files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON from a service or cache entry.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Requested interval lies outside the archive horizon of a source.
    #[error(
        "{source_id}: requested {bound} date {requested} is outside coverage \
         (boundary {boundary})"
    )]
    OutOfCoverage {
        source_id: String,
        bound: CoverageBound,
        requested: NaiveDate,
        boundary: NaiveDate,
    },

    /// Fetch failed after retrying.
    #[error("{source_id}: source unavailable at {url}: {reason}")]
    SourceUnavailable {
        source_id: String,
        url: String,
        reason: String,
    },

    /// Coordinate is outside the grid footprint of a source.
    #[error("{source_id}: location lat={lat}, lon={lon} is outside the source domain: {reason}")]
    LocationOutOfDomain {
        source_id: String,
        lat: f64,
        lon: f64,
        reason: String,
    },

    /// Malformed or unexpected binary data.
    #[error("Decode error for {context}: {reason}")]
    Decode { context: String, reason: String },

    /// A required canonical column is absent or malformed.
    #[error("Schema error in column {column}: {reason}")]
    Schema { column: String, reason: String },

    /// Raster byte length matches neither known grid layout.
    #[error(
        "Invalid grid size: {size} bytes (expected 46478370 for the legacy grid \
         or 22485218 for the current grid)"
    )]
    InvalidGridSize { size: usize },

    /// No grid file is available for the date (not cached and no downloader).
    #[error("Grid for {date} not available")]
    GridNotAvailable { date: NaiveDate },

    /// Configuration or request rejected before any work was done.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl ForcingError {
    pub(crate) fn schema(column: impl Into<String>, reason: impl Into<String>) -> Self {
        ForcingError::Schema {
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ForcingError::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(context: impl Into<String>, reason: impl fmt::Display) -> Self {
        ForcingError::Decode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using [`ForcingError`].
pub type Result<T> = std::result::Result<T, ForcingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ForcingError::InvalidGridSize { size: 1000 };
        assert!(err.to_string().contains("1000"));

        let err = ForcingError::OutOfCoverage {
            source_id: "era5-land".to_string(),
            bound: CoverageBound::End,
            requested: NaiveDate::from_ymd_opt(2030, 1, 31).unwrap(),
            boundary: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        };
        let msg = err.to_string();
        assert!(msg.contains("end date 2030-01-31"));
        assert!(msg.contains("2024-12-31"));

        let err = ForcingError::LocationOutOfDomain {
            source_id: "open-meteo".to_string(),
            lat: 91.0,
            lon: 0.0,
            reason: "nearest cell 80.0 km away".to_string(),
        };
        assert!(err.to_string().contains("91"));

        let err = ForcingError::GridNotAvailable {
            date: NaiveDate::from_ymd_opt(2020, 1, 15).unwrap(),
        };
        assert!(err.to_string().contains("2020-01-15"));
    }
}
