//! End-to-end forcing file generation.
//!
//! A run resolves the configured source, fetches and harmonizes its data,
//! optionally fills `HS` from the snow grids and writes one SMET file.

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::cache::ResponseCache;
use crate::error::{ForcingError, Result};
use crate::fetch::FetchConfig;
use crate::frame::CanonicalFrame;
use crate::harmonize::harmonize;
use crate::period::Period;
use crate::service::{EnrichStats, SnowDepthService};
use crate::smet::{field_layout, SmetWriter};
use crate::source::{SourceDescriptor, SourceRequest, WeatherSource};
use crate::station::StationMetadata;

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub station: StationMetadata,
    pub period: Period,
    pub source: SourceDescriptor,
    /// SMET file to write.
    pub output: PathBuf,
    /// Root of the response cache; `None` disables it.
    pub cache_dir: Option<PathBuf>,
    pub fetch: FetchConfig,
    /// Fill `HS` from the snow grids.
    pub snow_depth: bool,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub station_id: String,
    pub source_id: String,
    pub output: PathBuf,
    pub rows: usize,
    /// Data fields written, in file order.
    pub fields: Vec<String>,
    pub snow_depth: Option<EnrichStats>,
    pub elapsed_ms: u64,
}

/// Fetch and harmonize one request into a validated hourly frame.
///
/// Coverage is checked on the caller's period before any data is requested.
/// Extra days the source needs ahead of the period are fetched and then cut
/// off again, so the frame holds exactly the requested hours.
pub fn build_frame(source: &dyn WeatherSource, request: &SourceRequest) -> Result<CanonicalFrame> {
    let coverage = source.coverage();
    coverage.check(&request.period, source.id())?;

    let fetch_period = request
        .period
        .extend_back(source.lookback_days(), coverage.start);
    let native = source.fetch(&SourceRequest {
        period: fetch_period,
        ..*request
    })?;

    let canonical = harmonize(&native, request.altitude_m)?;
    let frame = canonical.slice(request.period.first_hour(), request.period.last_hour());

    if frame.len() != request.period.hours() {
        return Err(ForcingError::schema(
            "timestamp",
            format!(
                "{} rows for {} to {} (expected {})",
                frame.len(),
                request.period.start(),
                request.period.end(),
                request.period.hours()
            ),
        ));
    }
    frame.validate()?;
    Ok(frame)
}

/// Run the whole pipeline and write the SMET file.
///
/// Snow depth is only filled when `config.snow_depth` is set and a service
/// is given; otherwise `HS` stays nodata.
pub fn run(config: &RunConfig, snow: Option<&SnowDepthService>) -> Result<RunSummary> {
    let started = Instant::now();
    config.station.validate()?;

    let cache = config.cache_dir.as_ref().map(ResponseCache::new);
    let source = config.source.open(cache, &config.fetch)?;
    let request = SourceRequest {
        latitude: config.station.latitude,
        longitude: config.station.longitude,
        altitude_m: config.station.altitude_m,
        period: config.period,
    };

    info!(
        station = %config.station.id,
        source = source.id(),
        start = %config.period.start(),
        end = %config.period.end(),
        "building forcing"
    );
    let mut frame = build_frame(source.as_ref(), &request)?;

    let snow_depth = match snow {
        Some(service) if config.snow_depth => {
            Some(service.enrich(&mut frame, request.latitude, request.longitude)?)
        }
        _ => None,
    };

    SmetWriter::new()
        .with_source(source.id())
        .write(&config.output, &frame, &config.station)?;

    Ok(RunSummary {
        station_id: config.station.id.clone(),
        source_id: source.id().to_string(),
        output: config.output.clone(),
        rows: frame.len(),
        fields: field_layout(&frame)
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        snow_depth,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Accumulation, Column, NativeFrame, NativeSeries, Quantity, Unit};
    use crate::period::hourly_axis;
    use crate::source::CoverageWindow;
    use chrono::NaiveDate;
    use std::cell::RefCell;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Serves constant weather and records the periods it was asked for.
    struct FixedSource {
        coverage: CoverageWindow,
        lookback: u32,
        drop_last: bool,
        calls: RefCell<Vec<Period>>,
    }

    impl FixedSource {
        fn new(coverage: CoverageWindow, lookback: u32) -> Self {
            Self {
                coverage,
                lookback,
                drop_last: false,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl WeatherSource for FixedSource {
        fn id(&self) -> &str {
            "fixed"
        }

        fn coverage(&self) -> CoverageWindow {
            self.coverage
        }

        fn lookback_days(&self) -> u32 {
            self.lookback
        }

        fn fetch(&self, request: &SourceRequest) -> Result<NativeFrame> {
            self.calls.borrow_mut().push(request.period);
            let mut axis = hourly_axis(request.period.first_hour(), request.period.last_hour());
            if self.drop_last {
                axis.pop();
            }
            let n = axis.len();
            let mut frame = NativeFrame::new(axis);
            let series = |unit, acc, v: f64| NativeSeries::new(unit, acc, vec![Some(v); n]);
            frame.insert(Quantity::AirTemperature, series(Unit::Celsius, Accumulation::Instant, -3.0))?;
            frame.insert(Quantity::RelativeHumidity, series(Unit::Percent, Accumulation::Instant, 80.0))?;
            frame.insert(Quantity::WindSpeed, series(Unit::KilometersPerHour, Accumulation::Instant, 18.0))?;
            frame.insert(Quantity::WindDirection, series(Unit::Degrees, Accumulation::Instant, 200.0))?;
            frame.insert(
                Quantity::ShortwaveDown,
                series(Unit::WattsPerSquareMeter, Accumulation::Incremental, 50.0),
            )?;
            frame.insert(
                Quantity::Precipitation,
                series(Unit::Millimeters, Accumulation::Incremental, 0.2),
            )?;
            Ok(frame)
        }
    }

    fn request(start: NaiveDate, end: NaiveDate) -> SourceRequest {
        SourceRequest {
            latitude: 46.83,
            longitude: 9.81,
            altitude_m: 2540.0,
            period: Period::new(start, end).unwrap(),
        }
    }

    #[test]
    fn test_build_frame_rows_and_units() {
        let source = FixedSource::new(CoverageWindow::default(), 0);
        let frame = build_frame(&source, &request(d(2023, 2, 1), d(2023, 2, 3))).unwrap();

        assert_eq!(frame.len(), 72);
        let ta = frame.column(Column::Ta).unwrap();
        assert!((ta[0].unwrap() - 270.15).abs() < 1e-9);
        let vw = frame.column(Column::Vw).unwrap();
        assert!((vw[0].unwrap() - 5.0).abs() < 1e-9);
        assert!(!frame.has_column(Column::Ilwr));
        assert!(!frame.has_values(Column::Hs));
    }

    #[test]
    fn test_lookback_trimmed() {
        let source = FixedSource::new(CoverageWindow::new(Some(d(2023, 1, 1)), None), 2);
        let frame = build_frame(&source, &request(d(2023, 2, 1), d(2023, 2, 1))).unwrap();
        assert_eq!(frame.len(), 24);
        assert_eq!(frame.timestamps()[0], Period::new(d(2023, 2, 1), d(2023, 2, 1)).unwrap().first_hour());
        assert_eq!(source.calls.borrow()[0].start(), d(2023, 1, 30));

        // The spin-up never reaches before the coverage start.
        let frame = build_frame(&source, &request(d(2023, 1, 1), d(2023, 1, 1))).unwrap();
        assert_eq!(frame.len(), 24);
        assert_eq!(source.calls.borrow()[1].start(), d(2023, 1, 1));
    }

    #[test]
    fn test_out_of_coverage_before_fetch() {
        let source = FixedSource::new(CoverageWindow::new(None, Some(d(2023, 12, 31))), 0);
        let err = build_frame(&source, &request(d(2023, 12, 30), d(2024, 1, 2))).unwrap_err();
        assert!(matches!(err, ForcingError::OutOfCoverage { .. }));
        assert!(source.calls.borrow().is_empty());
    }

    #[test]
    fn test_short_source_rejected() {
        let mut source = FixedSource::new(CoverageWindow::default(), 0);
        source.drop_last = true;
        let err = build_frame(&source, &request(d(2023, 2, 1), d(2023, 2, 1))).unwrap_err();
        assert!(matches!(err, ForcingError::Schema { .. }));
    }
}
