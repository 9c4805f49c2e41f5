//! Grid archive filename utilities.
//!
//! This module converts between calendar dates and the names used by the
//! daily snow grid archive, both remotely and in the local cache.
//!
//! # Filename Format
//!
//! - Remote archive: `{YYYY}/{MM}_{Mon}/SNODAS_{YYYYMMDD}.tar`
//! - Archive members: `us_ssmv11036tS__T0001TTNATS{YYYYMMDD}05HP001.dat.gz`,
//!   where the digits after `ssmv1` carry the product code
//! - Cached raster: `SNODAS_{YYYYMMDD}_{code}.dat`

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

/// A gridded product stored in the daily archive.
///
/// Every product is stored as big-endian 16-bit integers in thousandths of
/// its unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Product {
    /// Snow depth (product code 1036).
    #[default]
    SnowDepth,
    /// Snow water equivalent (product code 1034).
    SnowWaterEquivalent,
    /// Snow cover (product code 1033).
    SnowCover,
    /// Change in snow depth over the day (product code 1037).
    SnowDepthChange,
    /// Snowfall accumulation (product code 1038).
    SnowAccumulation,
    /// Snow melt runoff (product code 1039).
    SnowMelt,
}

impl Product {
    pub const ALL: [Product; 6] = [
        Product::SnowDepth,
        Product::SnowWaterEquivalent,
        Product::SnowCover,
        Product::SnowDepthChange,
        Product::SnowAccumulation,
        Product::SnowMelt,
    ];

    /// Four-digit product code used in member names.
    pub fn code(&self) -> &'static str {
        match self {
            Product::SnowDepth => "1036",
            Product::SnowWaterEquivalent => "1034",
            Product::SnowCover => "1033",
            Product::SnowDepthChange => "1037",
            Product::SnowAccumulation => "1038",
            Product::SnowMelt => "1039",
        }
    }

    /// Short name used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Product::SnowDepth => "depth",
            Product::SnowWaterEquivalent => "swe",
            Product::SnowCover => "cover",
            Product::SnowDepthChange => "depth_change",
            Product::SnowAccumulation => "accumulation",
            Product::SnowMelt => "melt",
        }
    }

    pub fn from_code(code: &str) -> Option<Product> {
        Product::ALL.into_iter().find(|p| p.code() == code)
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Product {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase().replace('-', "_");
        match lower.as_str() {
            "snow_depth" | "hs" => return Ok(Product::SnowDepth),
            "snow_water_equivalent" => return Ok(Product::SnowWaterEquivalent),
            _ => {}
        }
        Product::ALL
            .into_iter()
            .find(|p| p.name() == lower || p.code() == lower)
            .ok_or_else(|| {
                let names: Vec<&str> = Product::ALL.iter().map(Product::name).collect();
                format!("unknown product '{}' (expected one of {})", s, names.join(", "))
            })
    }
}

/// Compact date key used in every archive name.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use snowmet::filename::date_key;
///
/// let date = NaiveDate::from_ymd_opt(2014, 2, 3).unwrap();
/// assert_eq!(date_key(date), "20140203");
/// ```
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Name of the daily tar archive.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use snowmet::filename::archive_filename;
///
/// let date = NaiveDate::from_ymd_opt(2014, 2, 3).unwrap();
/// assert_eq!(archive_filename(date), "SNODAS_20140203.tar");
/// ```
pub fn archive_filename(date: NaiveDate) -> String {
    format!("SNODAS_{}.tar", date_key(date))
}

/// Name of an extracted, uncompressed raster in the local cache.
pub fn raster_filename(date: NaiveDate, product: Product) -> String {
    format!("SNODAS_{}_{}.dat", date_key(date), product.code())
}

/// Month directory of the remote archive, e.g. `02_Feb`.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use snowmet::filename::month_dir;
///
/// assert_eq!(month_dir(NaiveDate::from_ymd_opt(2014, 2, 3).unwrap()), "02_Feb");
/// assert_eq!(month_dir(NaiveDate::from_ymd_opt(2009, 12, 31).unwrap()), "12_Dec");
/// ```
pub fn month_dir(date: NaiveDate) -> String {
    date.format("%m_%b").to_string()
}

/// Whether an archive member holds a raster (`.dat.gz` or `.dat`).
pub fn is_raster_member(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".dat.gz") || lower.ends_with(".dat")
}

/// Identify the product of an archive member from its name.
///
/// Only the product segment (before `__`) is searched, so digits of the
/// embedded date never match a product code.
///
/// # Examples
///
/// ```
/// use snowmet::filename::{member_product, Product};
///
/// assert_eq!(
///     member_product("us_ssmv11036tS__T0001TTNATS2014020305HP001.dat.gz"),
///     Some(Product::SnowDepth)
/// );
/// assert_eq!(
///     member_product("us_ssmv11038wS__A0024TTNATS2014020305DP001.dat.gz"),
///     Some(Product::SnowAccumulation)
/// );
/// assert_eq!(member_product("us_ssmv11044bS__T0024TTNATS2014020305DP000.dat.gz"), None);
/// ```
pub fn member_product(name: &str) -> Option<Product> {
    let base = name.rsplit('/').next().unwrap_or(name);
    if !is_raster_member(base) {
        return None;
    }
    let segment = base.split("__").next().unwrap_or(base);
    Product::ALL
        .into_iter()
        .find(|p| segment.contains(p.code()))
}

/// Parse a cached raster filename back into its date and product.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use snowmet::filename::{parse_raster_filename, Product};
///
/// assert_eq!(
///     parse_raster_filename("/cache/snodas/SNODAS_20140203_1034.dat"),
///     Some((NaiveDate::from_ymd_opt(2014, 2, 3).unwrap(), Product::SnowWaterEquivalent))
/// );
/// assert_eq!(parse_raster_filename("SNODAS_20140203.tar"), None);
/// ```
pub fn parse_raster_filename(filename: &str) -> Option<(NaiveDate, Product)> {
    let name = filename
        .rsplit('/')
        .next()
        .unwrap_or(filename)
        .rsplit('\\')
        .next()
        .unwrap_or(filename);

    let stem = name.strip_prefix("SNODAS_")?.strip_suffix(".dat")?;
    let (key, code) = stem.split_once('_')?;
    if key.len() != 8 {
        return None;
    }
    let date = NaiveDate::parse_from_str(key, "%Y%m%d").ok()?;
    Some((date, Product::from_code(code)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_names() {
        let date = d(2013, 9, 30);
        assert_eq!(date_key(date), "20130930");
        assert_eq!(archive_filename(date), "SNODAS_20130930.tar");
        assert_eq!(raster_filename(date, Product::SnowDepth), "SNODAS_20130930_1036.dat");
        assert_eq!(month_dir(date), "09_Sep");
    }

    #[test]
    fn test_member_product() {
        assert_eq!(
            member_product("us_ssmv11034tS__T0001TTNATS2020011505HP001.dat.gz"),
            Some(Product::SnowWaterEquivalent)
        );
        assert_eq!(
            member_product("./us_ssmv11036tS__T0001TTNATS2020011505HP001.dat"),
            Some(Product::SnowDepth)
        );
        // Header files share the product segment but are not rasters.
        assert_eq!(member_product("us_ssmv11036tS__T0001TTNATS2020011505HP001.txt.gz"), None);
        assert_eq!(
            member_product("us_ssmv11039lL00T__T0024TTNATS2020011505DP000.dat.gz"),
            Some(Product::SnowMelt)
        );
        // A date containing 1036 does not count.
        assert_eq!(member_product("us_ssmv01025SlL00__T0024TTNATS2010103605DP001.dat.gz"), None);
    }

    #[test]
    fn test_parse_raster_filename() {
        assert_eq!(
            parse_raster_filename("SNODAS_20240101_1036.dat"),
            Some((d(2024, 1, 1), Product::SnowDepth))
        );
        assert_eq!(
            parse_raster_filename("C:\\cache\\SNODAS_20240101_1034.dat"),
            Some((d(2024, 1, 1), Product::SnowWaterEquivalent))
        );
        assert_eq!(parse_raster_filename("SNODAS_20241301_1036.dat"), None);
        assert_eq!(parse_raster_filename("SNODAS_20240101_9999.dat"), None);
        assert_eq!(parse_raster_filename("SNODAS_2024011_1036.dat"), None);
    }

    #[test]
    fn test_roundtrip() {
        for date in [d(2003, 9, 30), d(2013, 10, 1), d(2024, 2, 29)] {
            for product in Product::ALL {
                let name = raster_filename(date, product);
                assert_eq!(parse_raster_filename(&name), Some((date, product)));
            }
        }
    }

    #[test]
    fn test_product_from_str() {
        assert_eq!("depth".parse::<Product>(), Ok(Product::SnowDepth));
        assert_eq!("SWE".parse::<Product>(), Ok(Product::SnowWaterEquivalent));
        assert_eq!("depth-change".parse::<Product>(), Ok(Product::SnowDepthChange));
        assert_eq!("1039".parse::<Product>(), Ok(Product::SnowMelt));
        assert_eq!("HS".parse::<Product>(), Ok(Product::SnowDepth));
        assert!("rain".parse::<Product>().is_err());
    }
}
