//! Archive adapter: nearest-cell extraction from hourly reanalysis cubes.

use std::cell::OnceCell;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use haversine::{distance, Location as HaversineLocation, Units};
use tracing::{debug, info};

use crate::cache::ResponseCache;
use crate::error::{ForcingError, Result};
use crate::fetch::{FetchConfig, HttpFetcher};
use crate::frame::{Accumulation, NativeFrame, NativeSeries, Quantity, Unit};
use crate::period::Period;
use crate::source::cube::{CubeArray, CubeStore, HttpStore, LocalStore};
use crate::source::{fetch_days_cached, CoverageWindow, SourceRequest, WeatherSource};

/// One cube array and what it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveVariable {
    pub array: String,
    pub quantity: Quantity,
    /// Unit assumed when the array carries no parseable `units` attribute.
    pub unit: Unit,
    pub accumulation: Accumulation,
}

impl ArchiveVariable {
    pub fn new(array: &str, quantity: Quantity, unit: Unit, accumulation: Accumulation) -> Self {
        Self {
            array: array.to_string(),
            quantity,
            unit,
            accumulation,
        }
    }
}

/// Layout and reach of an archive cube store.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveDescriptor {
    pub id: String,
    /// Base URL (`http://`, `https://`) or local directory of the store.
    pub location: String,
    pub coverage: CoverageWindow,
    /// Timestamp of index 0 on the hourly time axis.
    pub time_origin: DateTime<Utc>,
    pub latitude_array: String,
    pub longitude_array: String,
    pub variables: Vec<ArchiveVariable>,
    pub max_cell_distance_km: f64,
    /// Days fetched ahead of the requested start for differencing.
    pub spinup_days: u32,
}

impl ArchiveDescriptor {
    /// ERA5-Land style layout: 2 m temperature and dew point, surface
    /// pressure, 10 m wind components, accumulated radiation and
    /// precipitation since 00 UTC.
    pub fn era5_land(location: impl Into<String>) -> Self {
        Self {
            id: "era5-land".to_string(),
            location: location.into(),
            coverage: CoverageWindow::new(
                NaiveDate::from_ymd_opt(1950, 1, 1),
                NaiveDate::from_ymd_opt(2024, 12, 31),
            ),
            time_origin: Utc.with_ymd_and_hms(1950, 1, 1, 0, 0, 0).single().unwrap_or_default(),
            latitude_array: "latitude".to_string(),
            longitude_array: "longitude".to_string(),
            variables: vec![
                ArchiveVariable::new("t2m", Quantity::AirTemperature, Unit::Kelvin, Accumulation::Instant),
                ArchiveVariable::new("d2m", Quantity::DewPoint, Unit::Kelvin, Accumulation::Instant),
                ArchiveVariable::new("sp", Quantity::SurfacePressure, Unit::Pascal, Accumulation::Instant),
                ArchiveVariable::new("u10", Quantity::WindU, Unit::MetersPerSecond, Accumulation::Instant),
                ArchiveVariable::new("v10", Quantity::WindV, Unit::MetersPerSecond, Accumulation::Instant),
                ArchiveVariable::new(
                    "ssrd",
                    Quantity::ShortwaveDown,
                    Unit::JoulesPerSquareMeter,
                    Accumulation::Cumulative,
                ),
                ArchiveVariable::new(
                    "strd",
                    Quantity::LongwaveDown,
                    Unit::JoulesPerSquareMeter,
                    Accumulation::Cumulative,
                ),
                ArchiveVariable::new("tp", Quantity::Precipitation, Unit::Meters, Accumulation::Cumulative),
            ],
            max_cell_distance_km: 15.0,
            spinup_days: 1,
        }
    }

    pub fn with_coverage_end(mut self, end: NaiveDate) -> Self {
        self.coverage.end = Some(end);
        self
    }
}

/// Grid coordinates of the store, loaded on first use.
#[derive(Debug)]
struct Axes {
    latitudes: Vec<Option<f64>>,
    longitudes: Vec<Option<f64>>,
}

/// Index pair of a grid cell and its centre.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Cell {
    lat_idx: usize,
    lon_idx: usize,
    lat: f64,
    lon: f64,
}

/// Angular separation of two longitudes in degrees, `[0, 180]`.
fn longitude_gap(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

fn nearest(values: &[Option<f64>], gap: impl Fn(f64) -> f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, gap(v))))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Archive adapter over a [`CubeStore`].
pub struct ArchiveSource {
    descriptor: ArchiveDescriptor,
    store: Box<dyn CubeStore>,
    cache: Option<ResponseCache>,
    axes: OnceCell<Axes>,
}

impl ArchiveSource {
    /// Open the store named by `descriptor.location`.
    pub fn open(
        descriptor: ArchiveDescriptor,
        fetch: &FetchConfig,
        cache: Option<ResponseCache>,
    ) -> Result<Self> {
        let location = descriptor.location.as_str();
        let store: Box<dyn CubeStore> =
            if location.starts_with("http://") || location.starts_with("https://") {
                Box::new(HttpStore::new(
                    location,
                    descriptor.id.clone(),
                    HttpFetcher::new(fetch.clone())?,
                ))
            } else {
                Box::new(LocalStore::new(location))
            };
        Ok(Self::with_store(descriptor, store, cache))
    }

    pub fn with_store(
        descriptor: ArchiveDescriptor,
        store: Box<dyn CubeStore>,
        cache: Option<ResponseCache>,
    ) -> Self {
        Self {
            descriptor,
            store,
            cache,
            axes: OnceCell::new(),
        }
    }

    fn axes(&self) -> Result<&Axes> {
        if let Some(axes) = self.axes.get() {
            return Ok(axes);
        }
        let store = self.store.as_ref();
        let lat = CubeArray::open(store, &self.descriptor.latitude_array)?;
        let lon = CubeArray::open(store, &self.descriptor.longitude_array)?;
        if lat.shape().len() != 1 || lon.shape().len() != 1 {
            return Err(ForcingError::decode(
                store.describe(),
                "coordinate arrays must be one-dimensional",
            ));
        }
        let axes = Axes {
            latitudes: lat.read_all(store)?,
            longitudes: lon.read_all(store)?,
        };
        debug!(
            source = %self.descriptor.id,
            lats = axes.latitudes.len(),
            lons = axes.longitudes.len(),
            "loaded grid axes"
        );
        Ok(self.axes.get_or_init(|| axes))
    }

    fn out_of_domain(&self, lat: f64, lon: f64, reason: String) -> ForcingError {
        ForcingError::LocationOutOfDomain {
            source_id: self.descriptor.id.clone(),
            lat,
            lon,
            reason,
        }
    }

    fn nearest_cell(&self, lat: f64, lon: f64) -> Result<Cell> {
        let axes = self.axes()?;
        let (Some(lat_idx), Some(lon_idx)) = (
            nearest(&axes.latitudes, |v| (v - lat).abs()),
            nearest(&axes.longitudes, |v| longitude_gap(v, lon)),
        ) else {
            return Err(self.out_of_domain(lat, lon, "grid has no coordinates".to_string()));
        };

        let cell_lat = axes.latitudes[lat_idx].unwrap_or(f64::NAN);
        let mut cell_lon = axes.longitudes[lon_idx].unwrap_or(f64::NAN);
        if cell_lon > 180.0 {
            cell_lon -= 360.0;
        }

        let km = distance(
            HaversineLocation {
                latitude: lat,
                longitude: lon,
            },
            HaversineLocation {
                latitude: cell_lat,
                longitude: cell_lon,
            },
            Units::Kilometers,
        );
        if !(km <= self.descriptor.max_cell_distance_km) {
            return Err(self.out_of_domain(
                lat,
                lon,
                format!(
                    "nearest cell ({:.4}, {:.4}) is {:.1} km away (limit {:.1} km)",
                    cell_lat, cell_lon, km, self.descriptor.max_cell_distance_km
                ),
            ));
        }

        Ok(Cell {
            lat_idx,
            lon_idx,
            lat: cell_lat,
            lon: cell_lon,
        })
    }

    fn fetch_run(&self, request: &SourceRequest, period: &Period) -> Result<NativeFrame> {
        let cell = self.nearest_cell(request.latitude, request.longitude)?;
        let store = self.store.as_ref();

        let offset = (period.first_hour() - self.descriptor.time_origin).num_hours();
        if offset < 0 {
            return Err(ForcingError::invalid(format!(
                "{} precedes the time axis origin {}",
                period.first_hour(),
                self.descriptor.time_origin
            )));
        }
        let start = offset as usize;
        let wanted = start + period.hours();

        info!(
            source = %self.descriptor.id,
            start = %period.start(),
            end = %period.end(),
            cell_lat = cell.lat,
            cell_lon = cell.lon,
            "reading archive cubes"
        );

        let mut frame: Option<NativeFrame> = None;
        let mut any_value = false;
        for variable in &self.descriptor.variables {
            let array = CubeArray::open(store, &variable.array)?;
            let end = wanted.min(array.shape()[0]);
            let values = if start < end {
                array.read_range(store, start..end, &[cell.lat_idx, cell.lon_idx])?
            } else {
                Vec::new()
            };
            any_value |= values.iter().any(Option::is_some);

            let frame = frame.get_or_insert_with(|| {
                let timestamps = (0..values.len())
                    .map(|i| period.first_hour() + Duration::hours(i as i64))
                    .collect();
                NativeFrame::new(timestamps)
            });
            let unit = array.units().and_then(Unit::parse).unwrap_or(variable.unit);
            frame.insert(
                variable.quantity,
                NativeSeries::new(unit, variable.accumulation, values),
            )?;
        }

        let frame = frame.unwrap_or_default();
        if !any_value && !frame.is_empty() {
            return Err(self.out_of_domain(
                request.latitude,
                request.longitude,
                format!("cell ({:.4}, {:.4}) is masked", cell.lat, cell.lon),
            ));
        }
        Ok(frame)
    }
}

impl WeatherSource for ArchiveSource {
    fn id(&self) -> &str {
        &self.descriptor.id
    }

    fn coverage(&self) -> CoverageWindow {
        self.descriptor.coverage
    }

    fn lookback_days(&self) -> u32 {
        self.descriptor.spinup_days
    }

    fn fetch(&self, request: &SourceRequest) -> Result<NativeFrame> {
        self.descriptor
            .coverage
            .check(&request.period, &self.descriptor.id)?;
        fetch_days_cached(self.cache.as_ref(), &self.descriptor.id, request, |period| {
            self.fetch_run(request, period)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as Counter;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn write_array(dir: &TempDir, name: &str, shape: &[usize], values: &[f32], units: Option<&str>) {
        let root = dir.path().join(name);
        fs::create_dir_all(&root).unwrap();
        let meta = serde_json::json!({
            "zarr_format": 2,
            "shape": shape,
            "chunks": shape,
            "dtype": "<f4",
            "compressor": null,
            "fill_value": "NaN",
            "order": "C",
        });
        fs::write(root.join(".zarray"), meta.to_string()).unwrap();
        if let Some(units) = units {
            fs::write(root.join(".zattrs"), serde_json::json!({ "units": units }).to_string()).unwrap();
        }
        let mut raw = Vec::new();
        for v in values {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let key = vec!["0"; shape.len()].join(".");
        fs::write(root.join(key), raw).unwrap();
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// 48 hours from 2000-01-01, latitudes [47.0, 46.9], longitudes
    /// [9.7, 9.8, 350.0]; cell (0, 2) is masked.
    fn cube() -> (TempDir, ArchiveDescriptor) {
        let dir = TempDir::new().unwrap();
        write_array(&dir, "latitude", &[2], &[47.0, 46.9], None);
        write_array(&dir, "longitude", &[3], &[9.7, 9.8, 350.0], None);

        let hours = 48;
        let mut t2m = Vec::new();
        for h in 0..hours {
            for lat in 0..2 {
                for lon in 0..3 {
                    if lat == 0 && lon == 2 {
                        t2m.push(f32::NAN);
                    } else {
                        t2m.push(260.0 + h as f32 * 0.1 + lat as f32 * 10.0 + lon as f32);
                    }
                }
            }
        }
        write_array(&dir, "t2m", &[hours, 2, 3], &t2m, Some("K"));

        let descriptor = ArchiveDescriptor {
            id: "test-archive".to_string(),
            location: dir.path().display().to_string(),
            coverage: CoverageWindow::new(Some(d(2000, 1, 1)), Some(d(2000, 1, 2))),
            time_origin: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            latitude_array: "latitude".to_string(),
            longitude_array: "longitude".to_string(),
            variables: vec![ArchiveVariable::new(
                "t2m",
                Quantity::AirTemperature,
                Unit::Celsius,
                Accumulation::Instant,
            )],
            max_cell_distance_km: 15.0,
            spinup_days: 1,
        };
        (dir, descriptor)
    }

    fn request(lat: f64, lon: f64, start: NaiveDate, end: NaiveDate) -> SourceRequest {
        SourceRequest {
            latitude: lat,
            longitude: lon,
            altitude_m: 2000.0,
            period: Period::new(start, end).unwrap(),
        }
    }

    struct CountingStore {
        inner: LocalStore,
        gets: Rc<Counter<usize>>,
    }

    impl CubeStore for CountingStore {
        fn describe(&self) -> String {
            self.inner.describe()
        }

        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.gets.set(self.gets.get() + 1);
            self.inner.get(key)
        }
    }

    #[test]
    fn test_longitude_gap() {
        assert!((longitude_gap(350.0, -10.0)).abs() < 1e-9);
        assert!((longitude_gap(179.0, -179.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_fetch_nearest_cell() {
        let (_dir, descriptor) = cube();
        let source = ArchiveSource::open(descriptor, &FetchConfig::default(), None).unwrap();

        let frame = source
            .fetch(&request(46.91, 9.79, d(2000, 1, 2), d(2000, 1, 2)))
            .unwrap();
        assert_eq!(frame.len(), 24);

        let ta = frame.get(Quantity::AirTemperature).unwrap();
        // Units come from the array attributes, not the descriptor fallback.
        assert_eq!(ta.unit, Unit::Kelvin);
        // Hour 24, lat index 1, lon index 1.
        let expected = 260.0f32 + 24.0 * 0.1 + 10.0 + 1.0;
        assert!((ta.values[0].unwrap() - expected as f64).abs() < 1e-4);
    }

    #[test]
    fn test_longitude_wraps() {
        let (_dir, descriptor) = cube();
        let source = ArchiveSource::open(descriptor, &FetchConfig::default(), None).unwrap();
        let cell = source.nearest_cell(46.9, -10.0).unwrap();
        assert_eq!(cell.lon_idx, 2);
        assert!((cell.lon + 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_masked_cell_out_of_domain() {
        let (_dir, descriptor) = cube();
        let source = ArchiveSource::open(descriptor, &FetchConfig::default(), None).unwrap();
        let err = source
            .fetch(&request(47.0, -10.0, d(2000, 1, 1), d(2000, 1, 1)))
            .unwrap_err();
        assert!(matches!(err, ForcingError::LocationOutOfDomain { .. }));
    }

    #[test]
    fn test_distant_cell_out_of_domain() {
        let (_dir, descriptor) = cube();
        let source = ArchiveSource::open(descriptor, &FetchConfig::default(), None).unwrap();
        let err = source
            .fetch(&request(40.0, 9.8, d(2000, 1, 1), d(2000, 1, 1)))
            .unwrap_err();
        assert!(err.to_string().contains("km away"));
    }

    #[test]
    fn test_out_of_coverage_touches_no_store() {
        let (dir, descriptor) = cube();
        let gets = Rc::new(Counter::new(0));
        let store = CountingStore {
            inner: LocalStore::new(dir.path()),
            gets: gets.clone(),
        };
        let source = ArchiveSource::with_store(descriptor, Box::new(store), None);

        let err = source
            .fetch(&request(46.9, 9.8, d(2000, 1, 2), d(2000, 1, 5)))
            .unwrap_err();
        match err {
            ForcingError::OutOfCoverage { boundary, .. } => assert_eq!(boundary, d(2000, 1, 2)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(gets.get(), 0);
    }
}
