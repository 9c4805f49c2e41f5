//! Mapping of native source frames onto the canonical schema.

use crate::derived::{self, Moisture};
use crate::error::{ForcingError, Result};
use crate::frame::{Accumulation, CanonicalFrame, Column, NativeFrame, NativeSeries, Quantity, Unit};

const KELVIN_OFFSET: f64 = 273.15;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Harmonize a native frame into canonical units and columns.
///
/// `HS` is always present and entirely missing; it is only ever filled by
/// grid enrichment. `ILWR` is present only when the source supplies at least
/// one longwave value. Surface pressure falls back to the standard atmosphere
/// at `altitude_m` when the source has none.
pub fn harmonize(native: &NativeFrame, altitude_m: f64) -> Result<CanonicalFrame> {
    let n = native.len();
    let mut frame = CanonicalFrame::new(native.timestamps.clone());

    let ta = temperature(required(native, Quantity::AirTemperature, Column::Ta)?, Column::Ta)?;

    let pressure = match native.get(Quantity::SurfacePressure) {
        Some(s) => pressure(s)?,
        None => vec![Some(derived::standard_pressure(altitude_m)); n],
    };

    let rh = relative_humidity(native, &ta, &pressure)?;
    let (vw, dw) = wind(native)?;
    let iswr = radiation(required(native, Quantity::ShortwaveDown, Column::Iswr)?, Column::Iswr)?;
    let psum = precipitation(required(native, Quantity::Precipitation, Column::Psum)?)?;

    frame.insert(Column::Ta, ta)?;
    frame.insert(Column::Rh, rh)?;
    frame.insert(Column::Vw, vw)?;
    frame.insert(Column::Dw, dw)?;
    frame.insert(Column::Iswr, iswr)?;
    if let Some(lw) = native.get(Quantity::LongwaveDown).filter(|s| s.has_values()) {
        frame.insert(Column::Ilwr, radiation(lw, Column::Ilwr)?)?;
    }
    frame.insert(Column::Psum, psum)?;
    frame.insert(Column::Hs, vec![None; n])?;

    Ok(frame)
}

fn required(native: &NativeFrame, quantity: Quantity, column: Column) -> Result<&NativeSeries> {
    native.get(quantity).ok_or_else(|| {
        ForcingError::schema(column.name(), format!("source provides no {:?}", quantity))
    })
}

fn unsupported(column: Column, unit: Unit) -> ForcingError {
    ForcingError::schema(column.name(), format!("unsupported unit {:?}", unit))
}

fn map(values: &[Option<f64>], f: impl Fn(f64) -> f64) -> Vec<Option<f64>> {
    values.iter().map(|v| v.map(&f)).collect()
}

fn temperature(series: &NativeSeries, column: Column) -> Result<Vec<Option<f64>>> {
    let values = &series.values;
    Ok(match series.unit {
        Unit::Kelvin => values.clone(),
        Unit::Celsius => map(values, |c| c + KELVIN_OFFSET),
        Unit::Fahrenheit => map(values, |f| (f - 32.0) * 5.0 / 9.0 + KELVIN_OFFSET),
        other => return Err(unsupported(column, other)),
    })
}

fn pressure(series: &NativeSeries) -> Result<Vec<Option<f64>>> {
    Ok(match series.unit {
        Unit::Pascal => series.values.clone(),
        Unit::Hectopascal => map(&series.values, |p| p * 100.0),
        other => {
            return Err(ForcingError::schema(
                "pressure",
                format!("unsupported unit {:?}", other),
            ))
        }
    })
}

fn relative_humidity(
    native: &NativeFrame,
    ta: &[Option<f64>],
    pressure: &[Option<f64>],
) -> Result<Vec<Option<f64>>> {
    if let Some(rh) = native.get(Quantity::RelativeHumidity) {
        let scale = match rh.unit {
            Unit::Percent => 0.01,
            Unit::Fraction => 1.0,
            other => return Err(unsupported(Column::Rh, other)),
        };
        return Ok(map(&rh.values, |v| (v * scale).clamp(0.0, 1.0)));
    }

    let moisture: Vec<Option<Moisture>> = if let Some(td) = native.get(Quantity::DewPoint) {
        temperature(td, Column::Rh)?
            .into_iter()
            .map(|v| v.map(Moisture::DewPoint))
            .collect()
    } else if let Some(q) = native.get(Quantity::SpecificHumidity) {
        if q.unit != Unit::KgPerKg {
            return Err(unsupported(Column::Rh, q.unit));
        }
        q.values
            .iter()
            .map(|v| v.map(Moisture::SpecificHumidity))
            .collect()
    } else {
        return Err(ForcingError::schema(
            Column::Rh.name(),
            "source provides neither humidity, dew point nor specific humidity",
        ));
    };

    Ok(ta
        .iter()
        .zip(&moisture)
        .zip(pressure)
        .map(|((t, m), p)| match (t, m, p) {
            (Some(t), Some(m), Some(p)) => Some(derived::relative_humidity(*t, *m, *p)),
            _ => None,
        })
        .collect())
}

fn speed_scale(unit: Unit) -> Option<f64> {
    match unit {
        Unit::MetersPerSecond => Some(1.0),
        Unit::KilometersPerHour => Some(1.0 / 3.6),
        Unit::Knots => Some(1852.0 / 3600.0),
        Unit::MilesPerHour => Some(0.447_04),
        _ => None,
    }
}

type Wind = (Vec<Option<f64>>, Vec<Option<f64>>);

fn wind(native: &NativeFrame) -> Result<Wind> {
    if let (Some(speed), Some(direction)) = (
        native.get(Quantity::WindSpeed),
        native.get(Quantity::WindDirection),
    ) {
        let scale = speed_scale(speed.unit).ok_or_else(|| unsupported(Column::Vw, speed.unit))?;
        if direction.unit != Unit::Degrees {
            return Err(unsupported(Column::Dw, direction.unit));
        }
        let vw = map(&speed.values, |v| (v * scale).max(0.0));
        let dw = map(&direction.values, |d| {
            let d = d.rem_euclid(360.0);
            if d >= 360.0 {
                0.0
            } else {
                d
            }
        });
        return Ok((vw, dw));
    }

    if let (Some(u), Some(v)) = (native.get(Quantity::WindU), native.get(Quantity::WindV)) {
        let su = speed_scale(u.unit).ok_or_else(|| unsupported(Column::Vw, u.unit))?;
        let sv = speed_scale(v.unit).ok_or_else(|| unsupported(Column::Vw, v.unit))?;
        let (vw, dw): Wind = u
            .values
            .iter()
            .zip(&v.values)
            .map(|(u, v)| match (u, v) {
                (Some(u), Some(v)) => {
                    let (speed, direction) = derived::wind_from_components(u * su, v * sv);
                    (Some(speed), Some(direction))
                }
                _ => (None, None),
            })
            .unzip();
        return Ok((vw, dw));
    }

    Err(ForcingError::schema(
        Column::Vw.name(),
        "source provides neither wind speed and direction nor wind components",
    ))
}

fn accumulate(series: &NativeSeries) -> Vec<Option<f64>> {
    match series.accumulation {
        Accumulation::Cumulative => derived::cumulative_to_hourly(&series.values),
        Accumulation::Instant | Accumulation::Incremental => series.values.clone(),
    }
}

fn radiation(series: &NativeSeries, column: Column) -> Result<Vec<Option<f64>>> {
    let scale = match series.unit {
        Unit::WattsPerSquareMeter => 1.0,
        Unit::JoulesPerSquareMeter => 1.0 / SECONDS_PER_HOUR,
        other => return Err(unsupported(column, other)),
    };
    Ok(map(&accumulate(series), |v| (v * scale).max(0.0)))
}

fn precipitation(series: &NativeSeries) -> Result<Vec<Option<f64>>> {
    let scale = match series.unit {
        Unit::Millimeters => 1.0,
        Unit::Meters => 1000.0,
        Unit::Inches => 25.4,
        other => return Err(unsupported(Column::Psum, other)),
    };
    Ok(map(&accumulate(series), |v| (v * scale).max(0.0)))
}
