//! Weather source adapters.
//!
//! Every source implements [`WeatherSource`] and returns a [`NativeFrame`]
//! in its own units; harmonization happens afterwards. Sources are selected
//! through a [`SourceDescriptor`].

pub mod archive;
pub mod cube;
pub mod open_meteo;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::cache::{EntryKey, ResponseCache};
use crate::error::{CoverageBound, ForcingError, Result};
use crate::fetch::{FetchConfig, HttpFetcher};
use crate::frame::NativeFrame;
use crate::period::Period;

pub use archive::{ArchiveDescriptor, ArchiveSource, ArchiveVariable};
pub use cube::{CubeArray, CubeStore, HttpStore, LocalStore};
pub use open_meteo::{GridModelDescriptor, OpenMeteoSource};

/// What a source is asked for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub period: Period,
}

/// Dates for which a source has data. Open ends are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoverageWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl CoverageWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Fail with [`ForcingError::OutOfCoverage`] if `period` leaves the window.
    pub fn check(&self, period: &Period, source_id: &str) -> Result<()> {
        if let Some(start) = self.start {
            if period.start() < start {
                return Err(ForcingError::OutOfCoverage {
                    source_id: source_id.to_string(),
                    bound: CoverageBound::Start,
                    requested: period.start(),
                    boundary: start,
                });
            }
        }
        if let Some(end) = self.end {
            if period.end() > end {
                return Err(ForcingError::OutOfCoverage {
                    source_id: source_id.to_string(),
                    bound: CoverageBound::End,
                    requested: period.end(),
                    boundary: end,
                });
            }
        }
        Ok(())
    }
}

/// A weather data source.
pub trait WeatherSource {
    /// Identifier used in logs, errors and cache keys.
    fn id(&self) -> &str;

    fn coverage(&self) -> CoverageWindow;

    /// Days of data needed before the first requested day, e.g. to
    /// difference running accumulations.
    fn lookback_days(&self) -> u32 {
        0
    }

    /// Hourly native samples for every hour of `request.period`.
    fn fetch(&self, request: &SourceRequest) -> Result<NativeFrame>;
}

/// Which adapter to use and how to reach it.
#[derive(Debug, Clone)]
pub enum SourceDescriptor {
    GridModel(GridModelDescriptor),
    Archive(ArchiveDescriptor),
}

impl SourceDescriptor {
    pub fn id(&self) -> String {
        match self {
            SourceDescriptor::GridModel(d) => d.id(),
            SourceDescriptor::Archive(d) => d.id.clone(),
        }
    }

    pub fn coverage(&self) -> CoverageWindow {
        match self {
            SourceDescriptor::GridModel(d) => d.coverage,
            SourceDescriptor::Archive(d) => d.coverage,
        }
    }

    /// Instantiate the adapter.
    pub fn open(
        &self,
        cache: Option<ResponseCache>,
        fetch: &FetchConfig,
    ) -> Result<Box<dyn WeatherSource>> {
        Ok(match self {
            SourceDescriptor::GridModel(d) => Box::new(OpenMeteoSource::new(
                d.clone(),
                HttpFetcher::new(fetch.clone())?,
                cache,
            )),
            SourceDescriptor::Archive(d) => Box::new(ArchiveSource::open(d.clone(), fetch, cache)?),
        })
    }
}

/// Serve `request` day by day from `cache`, calling `fetch_run` once per
/// contiguous run of missing days.
///
/// Fetched runs are re-sampled to whole hours and split into days; only days
/// without gaps are stored. The result always spans every hour of the
/// request period.
pub(crate) fn fetch_days_cached<F>(
    cache: Option<&ResponseCache>,
    source_id: &str,
    request: &SourceRequest,
    mut fetch_run: F,
) -> Result<NativeFrame>
where
    F: FnMut(&Period) -> Result<NativeFrame>,
{
    let key = EntryKey {
        source_id,
        latitude: request.latitude,
        longitude: request.longitude,
        altitude_m: request.altitude_m,
    };
    let mut days: BTreeMap<NaiveDate, NativeFrame> = BTreeMap::new();
    let mut missing: Vec<NaiveDate> = Vec::new();

    for date in request.period.days() {
        match cache.and_then(|c| c.load(&key, date)) {
            Some(frame) => {
                days.insert(date, frame);
            }
            None => missing.push(date),
        }
    }
    debug!(
        source = source_id,
        cached = days.len(),
        missing = missing.len(),
        "response cache lookup"
    );

    for run in contiguous_runs(&missing) {
        let fetched = fetch_run(&run)?;
        let fetched = fetched.reindex_hourly(run.first_hour(), run.last_hour());
        for (date, day) in fetched.split_days() {
            if let Some(cache) = cache {
                if let Err(e) = cache.store(&key, date, &day) {
                    warn!(source = source_id, %date, error = %e, "failed to cache response");
                }
            }
            days.insert(date, day);
        }
    }

    let joined = NativeFrame::concat(days.into_values())?;
    Ok(joined.reindex_hourly(request.period.first_hour(), request.period.last_hour()))
}

/// Group sorted dates into periods of consecutive days.
fn contiguous_runs(dates: &[NaiveDate]) -> Vec<Period> {
    let mut runs: Vec<(NaiveDate, NaiveDate)> = Vec::new();
    for &date in dates {
        match runs.last_mut() {
            Some((_, end)) if end.succ_opt() == Some(date) => *end = date,
            _ => runs.push((date, date)),
        }
    }
    runs.into_iter()
        .filter_map(|(start, end)| Period::new(start, end).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Accumulation, NativeSeries, Quantity, Unit};
    use crate::period::hourly_axis;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn request(start: NaiveDate, end: NaiveDate) -> SourceRequest {
        SourceRequest {
            latitude: 46.83,
            longitude: 9.81,
            altitude_m: 2540.0,
            period: Period::new(start, end).unwrap(),
        }
    }

    fn synthetic(period: &Period) -> NativeFrame {
        let axis = hourly_axis(period.first_hour(), period.last_hour());
        let n = axis.len();
        let mut frame = NativeFrame::new(axis);
        frame
            .insert(
                Quantity::AirTemperature,
                NativeSeries::new(Unit::Kelvin, Accumulation::Instant, vec![Some(265.0); n]),
            )
            .unwrap();
        frame
    }

    #[test]
    fn test_coverage_check() {
        let window = CoverageWindow::new(Some(d(1950, 1, 1)), Some(d(2024, 12, 31)));
        let inside = Period::new(d(2000, 1, 1), d(2000, 1, 31)).unwrap();
        assert!(window.check(&inside, "archive").is_ok());

        let late = Period::new(d(2024, 12, 1), d(2025, 1, 31)).unwrap();
        match window.check(&late, "archive") {
            Err(ForcingError::OutOfCoverage {
                bound, boundary, ..
            }) => {
                assert_eq!(bound, CoverageBound::End);
                assert_eq!(boundary, d(2024, 12, 31));
            }
            other => panic!("unexpected {:?}", other),
        }

        let early = Period::new(d(1949, 12, 31), d(1950, 1, 2)).unwrap();
        assert!(matches!(
            window.check(&early, "archive"),
            Err(ForcingError::OutOfCoverage {
                bound: CoverageBound::Start,
                ..
            })
        ));

        assert!(CoverageWindow::default().check(&late, "x").is_ok());
    }

    #[test]
    fn test_contiguous_runs() {
        let dates = [d(2020, 1, 1), d(2020, 1, 2), d(2020, 1, 5), d(2020, 1, 7), d(2020, 1, 8)];
        let runs = contiguous_runs(&dates);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].day_count(), 2);
        assert_eq!(runs[1].start(), d(2020, 1, 5));
        assert_eq!(runs[2].end(), d(2020, 1, 8));
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[test]
    fn test_cached_days_not_refetched() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path());
        let calls = RefCell::new(Vec::new());

        let fetch = |p: &Period| {
            calls.borrow_mut().push(*p);
            Ok(synthetic(p))
        };

        let first = fetch_days_cached(Some(&cache), "test", &request(d(2020, 1, 2), d(2020, 1, 3)), fetch)
            .unwrap();
        assert_eq!(first.len(), 48);

        let second =
            fetch_days_cached(Some(&cache), "test", &request(d(2020, 1, 1), d(2020, 1, 4)), |p: &Period| {
                calls.borrow_mut().push(*p);
                Ok(synthetic(p))
            })
            .unwrap();
        assert_eq!(second.len(), 96);

        let calls = calls.into_inner();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], Period::new(d(2020, 1, 1), d(2020, 1, 1)).unwrap());
        assert_eq!(calls[2], Period::new(d(2020, 1, 4), d(2020, 1, 4)).unwrap());
    }

    fn truncated(period: &Period, hours: usize) -> NativeFrame {
        let mut f = synthetic(period);
        f.timestamps.truncate(hours);
        for s in f.series.values_mut() {
            s.values.truncate(hours);
        }
        f
    }

    #[test]
    fn test_partial_day_refetched() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path());
        let req = request(d(2020, 1, 1), d(2020, 1, 1));
        let calls = RefCell::new(0);

        let first = fetch_days_cached(Some(&cache), "test", &req, |p: &Period| {
            *calls.borrow_mut() += 1;
            Ok(truncated(p, 10))
        })
        .unwrap();
        assert!(first.has_gaps());

        let second = fetch_days_cached(Some(&cache), "test", &req, |p: &Period| {
            *calls.borrow_mut() += 1;
            Ok(synthetic(p))
        })
        .unwrap();
        assert_eq!(*calls.borrow(), 2);
        assert!(!second.has_gaps());

        // The complete day is now served from disk.
        fetch_days_cached(Some(&cache), "test", &req, |_: &Period| {
            panic!("complete day should come from the cache")
        })
        .unwrap();
    }

    #[test]
    fn test_other_altitude_refetched() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path());
        let low = request(d(2020, 1, 1), d(2020, 1, 1));
        let high = SourceRequest {
            altitude_m: 3500.0,
            ..low
        };
        let calls = RefCell::new(0);
        let fetch = |p: &Period| {
            *calls.borrow_mut() += 1;
            Ok(synthetic(p))
        };

        fetch_days_cached(Some(&cache), "test", &low, fetch).unwrap();
        fetch_days_cached(Some(&cache), "test", &high, fetch).unwrap();
        fetch_days_cached(Some(&cache), "test", &low, fetch).unwrap();
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn test_short_response_padded() {
        let frame = fetch_days_cached(None, "test", &request(d(2020, 1, 1), d(2020, 1, 1)), |p: &Period| {
            Ok(truncated(p, 10))
        })
        .unwrap();
        assert_eq!(frame.len(), 24);
        assert_eq!(frame.get(Quantity::AirTemperature).unwrap().values[23], None);
    }
}
