//! Grid-model adapter for Open-Meteo compatible query services.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use haversine::{distance, Location as HaversineLocation, Units};
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use crate::cache::ResponseCache;
use crate::error::{ForcingError, Result};
use crate::fetch::HttpFetcher;
use crate::frame::{Accumulation, NativeFrame, NativeSeries, Quantity, Unit};
use crate::period::Period;
use crate::source::{fetch_days_cached, CoverageWindow, SourceRequest, WeatherSource};

/// Historical forecast endpoint of the public service.
pub const DEFAULT_ENDPOINT: &str = "https://historical-forecast-api.open-meteo.com/v1/forecast";

/// First day served by the historical forecast endpoint.
pub const DEFAULT_COVERAGE_START: (i32, u32, u32) = (2021, 3, 23);

/// Hourly variables requested, with the quantity and accumulation each maps to.
const VARIABLES: &[(&str, Quantity, Accumulation)] = &[
    ("temperature_2m", Quantity::AirTemperature, Accumulation::Instant),
    ("relative_humidity_2m", Quantity::RelativeHumidity, Accumulation::Instant),
    ("surface_pressure", Quantity::SurfacePressure, Accumulation::Instant),
    ("wind_speed_10m", Quantity::WindSpeed, Accumulation::Instant),
    ("wind_direction_10m", Quantity::WindDirection, Accumulation::Instant),
    ("shortwave_radiation", Quantity::ShortwaveDown, Accumulation::Incremental),
    ("precipitation", Quantity::Precipitation, Accumulation::Incremental),
];

/// How to reach a model-query service.
#[derive(Debug, Clone, PartialEq)]
pub struct GridModelDescriptor {
    pub endpoint: String,
    /// Model identifier passed as `models`.
    pub model: String,
    pub coverage: CoverageWindow,
    /// Largest accepted distance between the station and the returned cell.
    pub max_cell_distance_km: f64,
}

impl Default for GridModelDescriptor {
    fn default() -> Self {
        let (y, m, d) = DEFAULT_COVERAGE_START;
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "best_match".to_string(),
            coverage: CoverageWindow::new(NaiveDate::from_ymd_opt(y, m, d), None),
            max_cell_distance_km: 50.0,
        }
    }
}

impl GridModelDescriptor {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Source id, e.g. `open-meteo-best_match`.
    ///
    /// Endpoints other than the public default add a tag built from host,
    /// port and path, so responses of different services never share cache
    /// entries.
    pub fn id(&self) -> String {
        if self.endpoint == DEFAULT_ENDPOINT {
            return format!("open-meteo-{}", self.model);
        }
        format!("open-meteo-{}-{}", self.model, endpoint_tag(&self.endpoint))
    }

    /// Query URL for one run of days.
    pub fn url(&self, request: &SourceRequest, period: &Period) -> Result<Url> {
        let hourly: Vec<&str> = VARIABLES.iter().map(|(name, _, _)| *name).collect();
        let params = [
            ("latitude", format!("{}", request.latitude)),
            ("longitude", format!("{}", request.longitude)),
            ("elevation", format!("{}", request.altitude_m)),
            ("hourly", hourly.join(",")),
            ("start_date", period.start().format("%Y-%m-%d").to_string()),
            ("end_date", period.end().format("%Y-%m-%d").to_string()),
            ("models", self.model.clone()),
            ("timezone", "GMT".to_string()),
            ("timeformat", "unixtime".to_string()),
        ];
        Url::parse_with_params(&self.endpoint, &params)
            .map_err(|e| ForcingError::invalid(format!("bad endpoint '{}': {}", self.endpoint, e)))
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    hourly_units: HashMap<String, String>,
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<i64>,
    #[serde(flatten)]
    variables: HashMap<String, Vec<Option<f64>>>,
}

/// Filesystem-safe tag for an endpoint URL, e.g. `127.0.0.1-9-v1-forecast`.
fn endpoint_tag(endpoint: &str) -> String {
    let raw = match Url::parse(endpoint) {
        Ok(url) => format!(
            "{}:{}{}",
            url.host_str().unwrap_or_default(),
            url.port().map(|p| p.to_string()).unwrap_or_default(),
            url.path()
        ),
        Err(_) => endpoint.to_string(),
    };
    let mut tag = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' };
        if !(c == '-' && tag.ends_with('-')) {
            tag.push(c);
        }
    }
    tag.trim_matches('-').to_string()
}

/// Adapter for an Open-Meteo compatible service.
pub struct OpenMeteoSource {
    descriptor: GridModelDescriptor,
    id: String,
    fetcher: HttpFetcher,
    cache: Option<ResponseCache>,
}

impl OpenMeteoSource {
    pub fn new(descriptor: GridModelDescriptor, fetcher: HttpFetcher, cache: Option<ResponseCache>) -> Self {
        let id = descriptor.id();
        Self {
            descriptor,
            id,
            fetcher,
            cache,
        }
    }

    fn fetch_run(&self, request: &SourceRequest, period: &Period) -> Result<NativeFrame> {
        let url = self.descriptor.url(request, period)?;
        info!(source = %self.id, start = %period.start(), end = %period.end(), "querying model service");
        let body = self.fetcher.get(url.as_str(), &self.id)?;
        parse_response(&body, request, &self.descriptor, &self.id)
    }
}

impl WeatherSource for OpenMeteoSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn coverage(&self) -> CoverageWindow {
        self.descriptor.coverage
    }

    fn fetch(&self, request: &SourceRequest) -> Result<NativeFrame> {
        self.descriptor.coverage.check(&request.period, &self.id)?;
        fetch_days_cached(self.cache.as_ref(), &self.id, request, |period| {
            self.fetch_run(request, period)
        })
    }
}

/// Decode a service response into a native frame.
fn parse_response(
    body: &[u8],
    request: &SourceRequest,
    descriptor: &GridModelDescriptor,
    source_id: &str,
) -> Result<NativeFrame> {
    let response: Response = serde_json::from_slice(body)?;

    let km = distance(
        HaversineLocation {
            latitude: request.latitude,
            longitude: request.longitude,
        },
        HaversineLocation {
            latitude: response.latitude,
            longitude: response.longitude,
        },
        Units::Kilometers,
    );
    debug!(source = source_id, cell_lat = response.latitude, cell_lon = response.longitude, km, "grid cell");
    if km > descriptor.max_cell_distance_km {
        return Err(ForcingError::LocationOutOfDomain {
            source_id: source_id.to_string(),
            lat: request.latitude,
            lon: request.longitude,
            reason: format!(
                "nearest cell ({:.4}, {:.4}) is {:.1} km away (limit {:.1} km)",
                response.latitude, response.longitude, km, descriptor.max_cell_distance_km
            ),
        });
    }

    let timestamps = response
        .hourly
        .time
        .iter()
        .map(|t| {
            DateTime::<Utc>::from_timestamp(*t, 0)
                .ok_or_else(|| ForcingError::decode(source_id, format!("bad timestamp {}", t)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut frame = NativeFrame::new(timestamps);
    let mut variables = response.hourly.variables;
    for (name, quantity, accumulation) in VARIABLES {
        let Some(values) = variables.remove(*name) else {
            continue;
        };
        let label = response.hourly_units.get(*name).map(String::as_str).unwrap_or("");
        let unit = Unit::parse(label).ok_or_else(|| {
            ForcingError::decode(source_id, format!("unknown unit '{}' for {}", label, name))
        })?;
        frame.insert(*quantity, NativeSeries::new(unit, *accumulation, values))?;
    }

    Ok(frame)
}
