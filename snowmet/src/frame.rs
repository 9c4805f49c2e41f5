//! Native and canonical hourly frames.
//!
//! A [`NativeFrame`] is what a source adapter returns: per-quantity series in
//! whatever units the source speaks. A [`CanonicalFrame`] is the harmonized,
//! SMET-ready column store.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForcingError, Result};
use crate::period::hourly_axis;

/// Value written for missing data.
pub const NODATA: f64 = -999.0;

/// Physical quantity carried by a native series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    AirTemperature,
    RelativeHumidity,
    DewPoint,
    SpecificHumidity,
    SurfacePressure,
    WindSpeed,
    WindDirection,
    WindU,
    WindV,
    ShortwaveDown,
    LongwaveDown,
    Precipitation,
}

/// Native unit of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Kelvin,
    Celsius,
    Fahrenheit,
    Percent,
    Fraction,
    KgPerKg,
    Pascal,
    Hectopascal,
    MetersPerSecond,
    KilometersPerHour,
    Knots,
    MilesPerHour,
    Degrees,
    WattsPerSquareMeter,
    /// Energy per area integrated over one time step.
    JoulesPerSquareMeter,
    Millimeters,
    Meters,
    Inches,
}

impl Unit {
    /// Parse a unit label as reported by a model-query service or stored in
    /// cube metadata.
    ///
    /// ```
    /// use snowmet::frame::Unit;
    ///
    /// assert_eq!(Unit::parse("°C"), Some(Unit::Celsius));
    /// assert_eq!(Unit::parse("km/h"), Some(Unit::KilometersPerHour));
    /// assert_eq!(Unit::parse("m s**-1"), Some(Unit::MetersPerSecond));
    /// assert_eq!(Unit::parse("furlongs"), None);
    /// ```
    pub fn parse(label: &str) -> Option<Unit> {
        let unit = match label.trim() {
            "K" | "kelvin" => Unit::Kelvin,
            "°C" | "degC" | "C" | "celsius" => Unit::Celsius,
            "°F" | "degF" | "F" | "fahrenheit" => Unit::Fahrenheit,
            "%" | "percent" => Unit::Percent,
            "1" | "fraction" | "(0 - 1)" => Unit::Fraction,
            "kg/kg" | "kg kg**-1" | "kg kg-1" => Unit::KgPerKg,
            "Pa" => Unit::Pascal,
            "hPa" | "mbar" => Unit::Hectopascal,
            "m/s" | "m s**-1" | "m s-1" | "ms" => Unit::MetersPerSecond,
            "km/h" | "kmh" => Unit::KilometersPerHour,
            "kn" | "kt" | "knots" => Unit::Knots,
            "mp/h" | "mph" => Unit::MilesPerHour,
            "°" | "deg" | "degrees" => Unit::Degrees,
            "W/m²" | "W/m2" | "W m**-2" | "W m-2" => Unit::WattsPerSquareMeter,
            "J/m²" | "J/m2" | "J m**-2" | "J m-2" => Unit::JoulesPerSquareMeter,
            "mm" => Unit::Millimeters,
            "m" => Unit::Meters,
            "inch" | "in" => Unit::Inches,
            _ => return None,
        };
        Some(unit)
    }
}

/// How successive samples of a series relate in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accumulation {
    /// State or mean rate at the timestamp.
    #[default]
    Instant,
    /// Total over the step ending at the timestamp.
    Incremental,
    /// Running total since the start of an accumulation period.
    Cumulative,
}

/// One native series with its unit and accumulation semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeSeries {
    pub unit: Unit,
    #[serde(default)]
    pub accumulation: Accumulation,
    pub values: Vec<Option<f64>>,
}

impl NativeSeries {
    pub fn new(unit: Unit, accumulation: Accumulation, values: Vec<Option<f64>>) -> Self {
        Self {
            unit,
            accumulation,
            values,
        }
    }

    /// Whether at least one sample is present.
    pub fn has_values(&self) -> bool {
        self.values.iter().any(Option::is_some)
    }
}

/// Source output before harmonization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeFrame {
    pub timestamps: Vec<DateTime<Utc>>,
    pub series: BTreeMap<Quantity, NativeSeries>,
}

impl NativeFrame {
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        Self {
            timestamps,
            series: BTreeMap::new(),
        }
    }

    /// Add a series, which must have one value per timestamp.
    pub fn insert(&mut self, quantity: Quantity, series: NativeSeries) -> Result<()> {
        if series.values.len() != self.timestamps.len() {
            return Err(ForcingError::schema(
                format!("{:?}", quantity),
                format!(
                    "{} values for {} timestamps",
                    series.values.len(),
                    self.timestamps.len()
                ),
            ));
        }
        self.series.insert(quantity, series);
        Ok(())
    }

    pub fn get(&self, quantity: Quantity) -> Option<&NativeSeries> {
        self.series.get(&quantity)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Whether any series has a missing sample.
    pub fn has_gaps(&self) -> bool {
        self.series
            .values()
            .any(|s| s.values.iter().any(Option::is_none))
    }

    /// Re-sample onto the whole-hour axis `first..=last`.
    ///
    /// Output is sorted and free of duplicates (the first sample of a
    /// repeated timestamp wins). Hours without a sample are missing;
    /// timestamps off the hour or outside the window are dropped.
    pub fn reindex_hourly(&self, first: DateTime<Utc>, last: DateTime<Utc>) -> NativeFrame {
        let axis = hourly_axis(first, last);

        let mut positions: HashMap<DateTime<Utc>, usize> = HashMap::new();
        for (i, ts) in self.timestamps.iter().enumerate() {
            if ts.minute() == 0 && ts.second() == 0 && ts.nanosecond() == 0 {
                positions.entry(*ts).or_insert(i);
            }
        }
        let source_index: Vec<Option<usize>> =
            axis.iter().map(|ts| positions.get(ts).copied()).collect();

        let series = self
            .series
            .iter()
            .map(|(quantity, s)| {
                let values = source_index
                    .iter()
                    .map(|idx| idx.and_then(|i| s.values[i]))
                    .collect();
                (*quantity, NativeSeries::new(s.unit, s.accumulation, values))
            })
            .collect();

        NativeFrame {
            timestamps: axis,
            series,
        }
    }

    /// Split into one frame per UTC calendar date.
    pub fn split_days(&self) -> BTreeMap<NaiveDate, NativeFrame> {
        let mut groups: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (i, ts) in self.timestamps.iter().enumerate() {
            groups.entry(ts.date_naive()).or_default().push(i);
        }

        groups
            .into_iter()
            .map(|(date, indices)| {
                let timestamps = indices.iter().map(|&i| self.timestamps[i]).collect();
                let series = self
                    .series
                    .iter()
                    .map(|(quantity, s)| {
                        let values = indices.iter().map(|&i| s.values[i]).collect();
                        (*quantity, NativeSeries::new(s.unit, s.accumulation, values))
                    })
                    .collect();
                (date, NativeFrame { timestamps, series })
            })
            .collect()
    }

    /// Join frames end to end.
    ///
    /// Quantities missing from some frames are padded with missing samples.
    /// A quantity reported in different units or with different
    /// accumulation by different frames is an error.
    pub fn concat(frames: impl IntoIterator<Item = NativeFrame>) -> Result<NativeFrame> {
        let frames: Vec<NativeFrame> = frames.into_iter().collect();

        let mut layout: BTreeMap<Quantity, (Unit, Accumulation)> = BTreeMap::new();
        for frame in &frames {
            for (quantity, s) in &frame.series {
                let entry = layout.entry(*quantity).or_insert((s.unit, s.accumulation));
                if entry.0 != s.unit {
                    return Err(ForcingError::schema(
                        format!("{:?}", quantity),
                        format!("unit changed from {:?} to {:?}", entry.0, s.unit),
                    ));
                }
                if entry.1 != s.accumulation {
                    return Err(ForcingError::schema(
                        format!("{:?}", quantity),
                        format!(
                            "accumulation changed from {:?} to {:?}",
                            entry.1, s.accumulation
                        ),
                    ));
                }
            }
        }

        let mut out = NativeFrame::default();
        let mut columns: BTreeMap<Quantity, Vec<Option<f64>>> = BTreeMap::new();
        for frame in frames {
            let n = frame.timestamps.len();
            out.timestamps.extend(frame.timestamps);
            for quantity in layout.keys() {
                let column = columns.entry(*quantity).or_default();
                match frame.series.get(quantity) {
                    Some(s) => column.extend(s.values.iter().copied()),
                    None => column.extend(std::iter::repeat(None).take(n)),
                }
            }
        }

        for (quantity, (unit, accumulation)) in layout {
            let values = columns.remove(&quantity).unwrap_or_default();
            out.series
                .insert(quantity, NativeSeries::new(unit, accumulation, values));
        }
        Ok(out)
    }
}

/// A column of the canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    /// Air temperature (K).
    Ta,
    /// Relative humidity (fraction).
    Rh,
    /// Wind speed (m/s).
    Vw,
    /// Wind direction (degrees from north).
    Dw,
    /// Incoming shortwave radiation (W/m²).
    Iswr,
    /// Incoming longwave radiation (W/m²).
    Ilwr,
    /// Precipitation sum over the hour (mm).
    Psum,
    /// Snow height (m).
    Hs,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::Ta,
        Column::Rh,
        Column::Vw,
        Column::Dw,
        Column::Iswr,
        Column::Ilwr,
        Column::Psum,
        Column::Hs,
    ];

    /// SMET field name.
    pub fn name(&self) -> &'static str {
        match self {
            Column::Ta => "TA",
            Column::Rh => "RH",
            Column::Vw => "VW",
            Column::Dw => "DW",
            Column::Iswr => "ISWR",
            Column::Ilwr => "ILWR",
            Column::Psum => "PSUM",
            Column::Hs => "HS",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Column::Ta => "K",
            Column::Rh => "1",
            Column::Vw => "m/s",
            Column::Dw => "deg",
            Column::Iswr | Column::Ilwr => "W/m2",
            Column::Psum => "mm",
            Column::Hs => "m",
        }
    }

    /// Decimal places written to the SMET data section.
    pub fn precision(&self) -> usize {
        match self {
            Column::Ta | Column::Vw => 2,
            Column::Rh | Column::Psum | Column::Hs => 3,
            Column::Dw | Column::Iswr | Column::Ilwr => 1,
        }
    }

    pub fn is_mandatory(&self) -> bool {
        !matches!(self, Column::Ilwr)
    }

    pub fn from_name(name: &str) -> Option<Column> {
        Column::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Allowed value range, `(min, max, max_inclusive)`.
    fn bounds(&self) -> Option<(f64, f64, bool)> {
        match self {
            Column::Rh => Some((0.0, 1.0, true)),
            Column::Dw => Some((0.0, 360.0, false)),
            Column::Vw | Column::Iswr | Column::Ilwr | Column::Psum | Column::Hs => {
                Some((0.0, f64::INFINITY, true))
            }
            Column::Ta => Some((0.0, f64::INFINITY, true)),
        }
    }
}

/// One canonical hourly row.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub timestamp: DateTime<Utc>,
    pub ta: Option<f64>,
    pub rh: Option<f64>,
    pub vw: Option<f64>,
    pub dw: Option<f64>,
    pub iswr: Option<f64>,
    pub ilwr: Option<f64>,
    pub psum: Option<f64>,
    pub hs: Option<f64>,
}

impl CanonicalRecord {
    fn get(&self, column: Column) -> Option<f64> {
        match column {
            Column::Ta => self.ta,
            Column::Rh => self.rh,
            Column::Vw => self.vw,
            Column::Dw => self.dw,
            Column::Iswr => self.iswr,
            Column::Ilwr => self.ilwr,
            Column::Psum => self.psum,
            Column::Hs => self.hs,
        }
    }
}

/// Harmonized hourly column store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalFrame {
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<Column, Vec<Option<f64>>>,
}

impl CanonicalFrame {
    pub fn new(timestamps: Vec<DateTime<Utc>>) -> Self {
        Self {
            timestamps,
            columns: BTreeMap::new(),
        }
    }

    /// Build a frame from rows. `ILWR` is only carried when a row has it.
    pub fn from_records(records: &[CanonicalRecord]) -> Self {
        let mut frame = CanonicalFrame::new(records.iter().map(|r| r.timestamp).collect());
        for column in Column::ALL {
            if column == Column::Ilwr && records.iter().all(|r| r.ilwr.is_none()) {
                continue;
            }
            frame
                .columns
                .insert(column, records.iter().map(|r| r.get(column)).collect());
        }
        frame
    }

    /// Rows of the frame. Absent columns read as missing.
    pub fn records(&self) -> Vec<CanonicalRecord> {
        let value = |column: Column, i: usize| self.columns.get(&column).and_then(|c| c[i]);
        self.timestamps
            .iter()
            .enumerate()
            .map(|(i, ts)| CanonicalRecord {
                timestamp: *ts,
                ta: value(Column::Ta, i),
                rh: value(Column::Rh, i),
                vw: value(Column::Vw, i),
                dw: value(Column::Dw, i),
                iswr: value(Column::Iswr, i),
                ilwr: value(Column::Ilwr, i),
                psum: value(Column::Psum, i),
                hs: value(Column::Hs, i),
            })
            .collect()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Add or replace a column, which must have one value per timestamp.
    pub fn insert(&mut self, column: Column, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.timestamps.len() {
            return Err(ForcingError::schema(
                column.name(),
                format!(
                    "{} values for {} timestamps",
                    values.len(),
                    self.timestamps.len()
                ),
            ));
        }
        self.columns.insert(column, values);
        Ok(())
    }

    pub fn column(&self, column: Column) -> Option<&[Option<f64>]> {
        self.columns.get(&column).map(Vec::as_slice)
    }

    pub(crate) fn column_mut(&mut self, column: Column) -> Option<&mut Vec<Option<f64>>> {
        self.columns.get_mut(&column)
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains_key(&column)
    }

    /// Whether the column exists with at least one non-missing value.
    pub fn has_values(&self, column: Column) -> bool {
        self.columns
            .get(&column)
            .is_some_and(|c| c.iter().any(Option::is_some))
    }

    /// Rows with `first <= timestamp <= last`.
    pub fn slice(&self, first: DateTime<Utc>, last: DateTime<Utc>) -> CanonicalFrame {
        let keep: Vec<usize> = self
            .timestamps
            .iter()
            .enumerate()
            .filter(|(_, ts)| **ts >= first && **ts <= last)
            .map(|(i, _)| i)
            .collect();

        CanonicalFrame {
            timestamps: keep.iter().map(|&i| self.timestamps[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(c, values)| (*c, keep.iter().map(|&i| values[i]).collect()))
                .collect(),
        }
    }

    /// Check the canonical invariants: mandatory columns present, strictly
    /// hourly ascending timestamps, values within their physical ranges.
    pub fn validate(&self) -> Result<()> {
        for column in Column::ALL.iter().filter(|c| c.is_mandatory()) {
            if !self.columns.contains_key(column) {
                return Err(ForcingError::schema(column.name(), "column missing"));
            }
        }

        for pair in self.timestamps.windows(2) {
            if (pair[1] - pair[0]).num_seconds() != 3600 {
                return Err(ForcingError::schema(
                    "timestamp",
                    format!("{} follows {} (expected one hour)", pair[1], pair[0]),
                ));
            }
        }

        for (column, values) in &self.columns {
            let Some((min, max, max_inclusive)) = column.bounds() else {
                continue;
            };
            for (ts, v) in self.timestamps.iter().zip(values) {
                let Some(v) = v else { continue };
                let above = if max_inclusive { *v > max } else { *v >= max };
                if !v.is_finite() || *v < min || above {
                    return Err(ForcingError::schema(
                        column.name(),
                        format!("value {} at {} out of range", v, ts),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn series(values: &[f64]) -> NativeSeries {
        NativeSeries::new(
            Unit::Celsius,
            Accumulation::Instant,
            values.iter().map(|v| Some(*v)).collect(),
        )
    }

    #[test]
    fn test_insert_length_mismatch() {
        let mut frame = NativeFrame::new(vec![t(0), t(1)]);
        assert!(frame
            .insert(Quantity::AirTemperature, series(&[1.0]))
            .is_err());
    }

    #[test]
    fn test_reindex_sorts_dedups_and_fills() {
        let mut frame = NativeFrame::new(vec![t(2), t(0), t(0), t(3)]);
        frame
            .insert(Quantity::AirTemperature, series(&[2.0, 0.0, 99.0, 3.0]))
            .unwrap();

        let out = frame.reindex_hourly(t(0), t(3));
        assert_eq!(out.timestamps, vec![t(0), t(1), t(2), t(3)]);
        assert_eq!(
            out.get(Quantity::AirTemperature).unwrap().values,
            vec![Some(0.0), None, Some(2.0), Some(3.0)]
        );
    }

    #[test]
    fn test_split_and_concat() {
        let ts: Vec<_> = (0..48).map(t).collect();
        let mut frame = NativeFrame::new(ts);
        let values: Vec<f64> = (0..48).map(|i| i as f64).collect();
        frame
            .insert(Quantity::AirTemperature, series(&values))
            .unwrap();

        let days = frame.split_days();
        assert_eq!(days.len(), 2);
        assert!(days.values().all(|d| d.len() == 24));

        let joined = NativeFrame::concat(days.into_values()).unwrap();
        assert_eq!(joined, frame);
    }

    #[test]
    fn test_concat_pads_missing_quantity() {
        let mut a = NativeFrame::new(vec![t(0)]);
        a.insert(Quantity::AirTemperature, series(&[1.0])).unwrap();
        let b = NativeFrame::new(vec![t(1)]);

        let joined = NativeFrame::concat([a, b]).unwrap();
        assert_eq!(
            joined.get(Quantity::AirTemperature).unwrap().values,
            vec![Some(1.0), None]
        );
    }

    #[test]
    fn test_concat_rejects_accumulation_change() {
        let mut a = NativeFrame::new(vec![t(0)]);
        a.insert(
            Quantity::Precipitation,
            NativeSeries::new(Unit::Meters, Accumulation::Cumulative, vec![Some(0.1)]),
        )
        .unwrap();
        let mut b = NativeFrame::new(vec![t(1)]);
        b.insert(
            Quantity::Precipitation,
            NativeSeries::new(Unit::Meters, Accumulation::Incremental, vec![Some(0.1)]),
        )
        .unwrap();

        match NativeFrame::concat([a, b]) {
            Err(ForcingError::Schema { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_has_gaps() {
        let mut frame = NativeFrame::new(vec![t(0), t(1)]);
        frame
            .insert(Quantity::AirTemperature, series(&[1.0, 2.0]))
            .unwrap();
        assert!(!frame.has_gaps());
        frame.series.values_mut().for_each(|s| s.values[1] = None);
        assert!(frame.has_gaps());
    }

    #[test]
    fn test_native_frame_json_round_trip() {
        let mut frame = NativeFrame::new(vec![t(0)]);
        frame
            .insert(Quantity::Precipitation, NativeSeries::new(Unit::Meters, Accumulation::Cumulative, vec![None]))
            .unwrap();
        let json = serde_json::to_string(&frame).unwrap();
        let back: NativeFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    fn record(h: i64) -> CanonicalRecord {
        CanonicalRecord {
            timestamp: t(h),
            ta: Some(270.0),
            rh: Some(0.8),
            vw: Some(1.0),
            dw: Some(180.0),
            iswr: Some(0.0),
            ilwr: None,
            psum: Some(0.0),
            hs: None,
        }
    }

    #[test]
    fn test_from_records_skips_empty_ilwr() {
        let frame = CanonicalFrame::from_records(&[record(0), record(1)]);
        assert!(!frame.has_column(Column::Ilwr));
        assert!(frame.has_column(Column::Hs));
        assert!(!frame.has_values(Column::Hs));
        assert!(frame.validate().is_ok());
        assert_eq!(frame.records(), vec![record(0), record(1)]);
    }

    #[test]
    fn test_validate_rejects_gap() {
        let frame = CanonicalFrame::from_records(&[record(0), record(2)]);
        assert!(matches!(
            frame.validate(),
            Err(ForcingError::Schema { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_column() {
        let mut frame = CanonicalFrame::from_records(&[record(0)]);
        frame.columns.remove(&Column::Psum);
        let err = frame.validate().unwrap_err();
        assert!(err.to_string().contains("PSUM"));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut bad = record(0);
        bad.rh = Some(1.2);
        assert!(CanonicalFrame::from_records(&[bad]).validate().is_err());

        let mut bad = record(0);
        bad.dw = Some(360.0);
        assert!(CanonicalFrame::from_records(&[bad]).validate().is_err());
    }

    #[test]
    fn test_slice() {
        let frame = CanonicalFrame::from_records(&[record(0), record(1), record(2)]);
        let sliced = frame.slice(t(1), t(2));
        assert_eq!(sliced.timestamps(), &[t(1), t(2)]);
        assert_eq!(sliced.column(Column::Ta).unwrap().len(), 2);
    }
}
