//! Station metadata written into the SMET header.

use crate::error::{ForcingError, Result};

const FEET_TO_METERS: f64 = 0.3048;

/// Unit of a configured station altitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AltitudeUnit {
    #[default]
    Meters,
    Feet,
}

impl AltitudeUnit {
    /// Convert an altitude in this unit to meters.
    pub fn to_meters(&self, value: f64) -> f64 {
        match self {
            AltitudeUnit::Meters => value,
            AltitudeUnit::Feet => value * FEET_TO_METERS,
        }
    }
}

/// Identity and location of the virtual station a forcing file describes.
#[derive(Debug, Clone, PartialEq)]
pub struct StationMetadata {
    /// Station identifier (no whitespace).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Latitude in decimal degrees (WGS84).
    pub latitude: f64,
    /// Longitude in decimal degrees (WGS84).
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude_m: f64,
    /// Offset of the written timestamps from UTC, in hours.
    pub timezone_offset: f64,
    /// Coordinate system tag (EPSG code).
    pub epsg: u32,
}

impl StationMetadata {
    /// Create station metadata with a UTC timezone and WGS84 coordinates.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        altitude_unit: AltitudeUnit,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude,
            longitude,
            altitude_m: altitude_unit.to_meters(altitude),
            timezone_offset: 0.0,
            epsg: 4326,
        }
    }

    /// Set the timezone offset in hours.
    pub fn with_timezone(mut self, offset_hours: f64) -> Self {
        self.timezone_offset = offset_hours;
        self
    }

    /// Check identifiers and coordinate ranges.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.chars().any(char::is_whitespace) {
            return Err(ForcingError::invalid(format!(
                "station id '{}' must be non-empty without whitespace",
                self.id
            )));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(ForcingError::invalid(format!(
                "coordinates out of range: lat={}, lon={}",
                self.latitude, self.longitude
            )));
        }
        if !(-14.0..=14.0).contains(&self.timezone_offset) {
            return Err(ForcingError::invalid(format!(
                "timezone offset {} h out of range",
                self.timezone_offset
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feet_converted_to_meters() {
        let station = StationMetadata::new("WFJ", "Weissfluhjoch", 46.83, 9.81, 1000.0, AltitudeUnit::Feet);
        assert!((station.altitude_m - 304.8).abs() < 1e-9);
    }

    #[test]
    fn test_validate() {
        let station = StationMetadata::new("CSO", "Cameron Pass", 40.52, -105.89, 3150.0, AltitudeUnit::Meters);
        assert!(station.validate().is_ok());

        let bad = StationMetadata { latitude: 95.0, ..station.clone() };
        assert!(bad.validate().is_err());

        let bad = StationMetadata { id: "two words".to_string(), ..station };
        assert!(bad.validate().is_err());
    }
}
