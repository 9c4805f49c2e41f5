//! Derived meteorological quantities.
//!
//! Pure functions used by the harmonizer when a source supplies raw inputs
//! (dew point or specific humidity, wind components, running accumulations)
//! instead of the canonical quantities.

/// Magnus coefficients over water (Sonntag 1990).
const MAGNUS_E0: f64 = 611.2; // Pa
const MAGNUS_A: f64 = 17.62;
const MAGNUS_B: f64 = 243.12; // °C

/// Ratio of molecular weights of water vapour and dry air.
const EPSILON: f64 = 0.622;

const KELVIN_OFFSET: f64 = 273.15;

/// Sea-level pressure of the standard atmosphere (Pa).
const STANDARD_SEA_LEVEL_PRESSURE: f64 = 101_325.0;

/// The moisture variable a source reports in place of relative humidity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Moisture {
    /// Dew-point temperature in Kelvin.
    DewPoint(f64),
    /// Specific humidity in kg/kg.
    SpecificHumidity(f64),
}

/// Saturation vapour pressure (Pa) over water at `temperature_k`.
pub fn saturation_vapor_pressure(temperature_k: f64) -> f64 {
    let t = temperature_k - KELVIN_OFFSET;
    MAGNUS_E0 * (MAGNUS_A * t / (MAGNUS_B + t)).exp()
}

/// Actual vapour pressure (Pa) implied by a moisture variable.
///
/// `surface_pressure_pa` is only used for specific humidity.
pub fn vapor_pressure(moisture: Moisture, surface_pressure_pa: f64) -> f64 {
    match moisture {
        Moisture::DewPoint(td) => saturation_vapor_pressure(td),
        Moisture::SpecificHumidity(q) => {
            let q = q.max(0.0);
            q * surface_pressure_pa / (EPSILON + (1.0 - EPSILON) * q)
        }
    }
}

/// Relative humidity as a fraction clamped to `[0, 1]`.
pub fn relative_humidity(temperature_k: f64, moisture: Moisture, surface_pressure_pa: f64) -> f64 {
    let es = saturation_vapor_pressure(temperature_k);
    if es <= 0.0 || !es.is_finite() {
        return 0.0;
    }
    let rh = vapor_pressure(moisture, surface_pressure_pa) / es;
    if rh.is_nan() {
        return 0.0;
    }
    rh.clamp(0.0, 1.0)
}

/// Surface pressure (Pa) of the standard atmosphere at `altitude_m`.
pub fn standard_pressure(altitude_m: f64) -> f64 {
    STANDARD_SEA_LEVEL_PRESSURE * (1.0 - 2.255_77e-5 * altitude_m).powf(5.255_88)
}

/// Wind speed (same unit as the components) and the compass direction the
/// wind blows from, in degrees `[0, 360)`.
///
/// Calm `(0, 0)` yields `(0, 0)`.
pub fn wind_from_components(u: f64, v: f64) -> (f64, f64) {
    let speed = u.hypot(v);
    if speed == 0.0 {
        return (0.0, 0.0);
    }
    let mut direction = (270.0 - v.atan2(u).to_degrees()).rem_euclid(360.0);
    if direction >= 360.0 {
        direction -= 360.0;
    }
    (speed, direction)
}

/// Convert a running accumulation into per-step increments.
///
/// The first valid sample has no reference and yields 0. A negative step
/// marks an accumulation reset: it yields 0 and differencing resumes from the
/// new running value. Missing samples yield missing increments and do not
/// move the reference.
pub fn cumulative_to_hourly(series: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(series.len());
    let mut reference: Option<f64> = None;

    for value in series {
        match value {
            Some(v) => {
                let step = match reference {
                    Some(prev) if *v >= prev => *v - prev,
                    _ => 0.0,
                };
                reference = Some(*v);
                out.push(Some(step));
            }
            None => out.push(None),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    #[test]
    fn test_calm_wind() {
        assert_eq!(wind_from_components(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn test_eastward_wind_is_westerly() {
        let (speed, dir) = wind_from_components(1.0, 0.0);
        assert!((speed - 1.0).abs() < EPS);
        assert!((dir - 270.0).abs() < EPS);
    }

    #[test]
    fn test_cardinal_directions() {
        // Southward flow comes from the north.
        let (_, dir) = wind_from_components(0.0, -2.0);
        assert!(dir.abs() < EPS || (dir - 360.0).abs() < EPS);
        assert!(dir < 360.0);

        let (_, dir) = wind_from_components(0.0, 2.0);
        assert!((dir - 180.0).abs() < EPS);

        let (_, dir) = wind_from_components(-3.0, 0.0);
        assert!((dir - 90.0).abs() < EPS);

        let (speed, dir) = wind_from_components(-1.0, -1.0);
        assert!((speed - 2f64.sqrt()).abs() < EPS);
        assert!((dir - 45.0).abs() < EPS);
    }

    #[test]
    fn test_saturation_at_freezing() {
        assert!((saturation_vapor_pressure(273.15) - 611.2).abs() < 1e-9);
    }

    #[test]
    fn test_rh_from_dew_point_equal_to_temperature() {
        let rh = relative_humidity(280.0, Moisture::DewPoint(280.0), 90_000.0);
        assert!((rh - 1.0).abs() < EPS);
    }

    #[test]
    fn test_rh_clamped() {
        // Supersaturated dew point clamps to 1.
        assert_eq!(relative_humidity(270.0, Moisture::DewPoint(275.0), 90_000.0), 1.0);
        // Negative specific humidity clamps to 0.
        assert_eq!(
            relative_humidity(270.0, Moisture::SpecificHumidity(-0.001), 90_000.0),
            0.0
        );
    }

    #[test]
    fn test_rh_from_specific_humidity() {
        // q = 0.005 kg/kg at 850 hPa and 10 °C is roughly 56 %.
        let rh = relative_humidity(283.15, Moisture::SpecificHumidity(0.005), 85_000.0);
        assert!(rh > 0.5 && rh < 0.6, "rh = {}", rh);
    }

    #[test]
    fn test_standard_pressure() {
        assert!((standard_pressure(0.0) - 101_325.0).abs() < 1e-6);
        let p = standard_pressure(3000.0);
        assert!(p > 69_000.0 && p < 71_000.0, "p = {}", p);
    }

    #[test]
    fn test_cumulative_first_sample_is_zero() {
        let out = cumulative_to_hourly(&[Some(4.0), Some(5.0), Some(7.5)]);
        assert_eq!(out, vec![Some(0.0), Some(1.0), Some(2.5)]);
    }

    #[test]
    fn test_cumulative_reset_emits_zero() {
        let out = cumulative_to_hourly(&[Some(0.0), Some(2.0), Some(3.0), Some(0.5), Some(1.5)]);
        assert_eq!(out, vec![Some(0.0), Some(2.0), Some(1.0), Some(0.0), Some(1.0)]);
    }

    #[test]
    fn test_cumulative_never_negative() {
        let series: Vec<Option<f64>> = [3.0, 1.0, 8.0, 2.0, 2.0, 0.0, 9.0, 4.0]
            .iter()
            .map(|v| Some(*v))
            .collect();
        let out = cumulative_to_hourly(&series);
        assert!(out.iter().flatten().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_cumulative_offset_invariance() {
        let period: Vec<f64> = vec![0.0, 0.4, 1.1, 1.1, 2.6];
        let base: Vec<Option<f64>> = period.iter().map(|v| Some(*v)).collect();
        let shifted: Vec<Option<f64>> = period.iter().map(|v| Some(*v + 12.5)).collect();

        let a = cumulative_to_hourly(&base);
        let b = cumulative_to_hourly(&shifted);
        for (x, y) in a.iter().zip(&b) {
            assert!((x.unwrap() - y.unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_cumulative_gap_keeps_reference() {
        let out = cumulative_to_hourly(&[Some(1.0), None, Some(3.0)]);
        assert_eq!(out, vec![Some(0.0), None, Some(2.0)]);
    }
}
