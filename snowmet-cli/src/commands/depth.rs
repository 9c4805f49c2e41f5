use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use snowmet::filename::Product;
use snowmet::{GridLookup, Unavailable};

use super::GridOptions;

#[derive(Serialize)]
struct DepthResponse {
    date: NaiveDate,
    lat: f64,
    lon: f64,
    product: String,
    value_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unavailable: Option<Unavailable>,
}

pub fn run(
    grid: &GridOptions,
    date: NaiveDate,
    lat: f64,
    lon: f64,
    product: Product,
    json: bool,
) -> Result<()> {
    let service = grid.service(product)?;

    let lookup = service.lookup(date, lat, lon);
    let (value_m, unavailable) = match lookup {
        GridLookup::Meters(m) => (Some(m), None),
        GridLookup::Unavailable(reason) => (None, Some(reason)),
    };

    if json {
        let response = DepthResponse {
            date,
            lat,
            lon,
            product: product.to_string(),
            value_m,
            unavailable,
        };
        println!("{}", serde_json::to_string(&response)?);
    } else {
        match (value_m, unavailable) {
            (Some(m), _) => println!("{:.3}", m),
            (None, Some(Unavailable::OutsideDomain)) => println!("outside grid"),
            (None, Some(Unavailable::NoData)) => println!("nodata"),
            (None, _) => println!("no grid for {}", date),
        }
    }

    Ok(())
}
