use std::io::Write;

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use snowmet::derived::cumulative_to_hourly;
use snowmet::filename::{raster_filename, Product};
use snowmet::period::{hourly_axis, midnight};
use snowmet::{CanonicalFrame, CanonicalRecord, GridEra, SnowDepthService};
use tempfile::TempDir;

/// Create a synthetic current-era grid with a simple depth gradient.
fn create_grid(dir: &std::path::Path, date: NaiveDate) {
    let transform = GridEra::Current.transform();
    let mut data = vec![0u8; GridEra::Current.byte_size()];
    for row in 0..transform.nrows {
        for col in 0..transform.ncols {
            let depth = ((row + col) % 3000) as i16;
            let offset = (row * transform.ncols + col) * 2;
            let bytes = depth.to_be_bytes();
            data[offset] = bytes[0];
            data[offset + 1] = bytes[1];
        }
    }
    let grid_dir = dir.join("snodas");
    std::fs::create_dir_all(&grid_dir).unwrap();
    let mut file = std::fs::File::create(grid_dir.join(raster_filename(date, Product::SnowDepth))).unwrap();
    file.write_all(&data).unwrap();
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

fn bench_single_lookup(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    create_grid(tmp.path(), date());
    let service = SnowDepthService::new(tmp.path(), 10);

    // Warm the cache
    let _ = service.lookup(date(), 40.52, -105.89);

    c.bench_function("single_lookup_cached", |b| {
        b.iter(|| {
            black_box(service.lookup(black_box(date()), black_box(40.52), black_box(-105.89)));
        });
    });
}

fn bench_enrich_month(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let first = midnight(date());
    let last = first + Duration::hours(24 * 31 - 1);
    for day in 0..31 {
        create_grid(tmp.path(), date() + Duration::days(day));
    }
    let service = SnowDepthService::new(tmp.path(), 40);

    let records: Vec<CanonicalRecord> = hourly_axis(first, last)
        .into_iter()
        .map(|timestamp| CanonicalRecord {
            timestamp,
            ta: Some(268.0),
            rh: Some(0.8),
            vw: Some(2.0),
            dw: Some(180.0),
            iswr: Some(0.0),
            ilwr: None,
            psum: Some(0.0),
            hs: None,
        })
        .collect();
    let frame = CanonicalFrame::from_records(&records);

    // Warm the cache
    let _ = service.enrich(&mut frame.clone(), 40.52, -105.89);

    c.bench_function("enrich_744_rows", |b| {
        b.iter(|| {
            let mut frame = frame.clone();
            black_box(service.enrich(&mut frame, black_box(40.52), black_box(-105.89)).unwrap());
        });
    });
}

fn bench_cumulative_to_hourly(c: &mut Criterion) {
    // One year of daily-reset accumulations with a few gaps.
    let series: Vec<Option<f64>> = (0..8760)
        .map(|h| {
            if h % 997 == 0 {
                None
            } else {
                Some(((h % 24) + 1) as f64 * 0.0002)
            }
        })
        .collect();

    c.bench_function("cumulative_to_hourly_8760", |b| {
        b.iter(|| {
            black_box(cumulative_to_hourly(black_box(&series)));
        });
    });
}

criterion_group!(
    benches,
    bench_single_lookup,
    bench_enrich_month,
    bench_cumulative_to_hourly,
);
criterion_main!(benches);
