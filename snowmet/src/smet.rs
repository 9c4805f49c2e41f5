//! SMET 1.1 ASCII serialization.
//!
//! A file is a `[HEADER]` block of `key = value` lines followed by a
//! `[DATA]` block with one space-delimited line per hourly timestamp:
//!
//! ```text
//! SMET 1.1 ASCII
//! [HEADER]
//! station_id = WFJ
//! ...
//! fields = timestamp TA RH VW DW ISWR PSUM HS
//! units = ISO8601 K 1 m/s deg W/m2 mm m
//! [DATA]
//! 2024-01-01T00:00:00 270.00 0.900 2.00 10.0 0.0 0.000 -999
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{ForcingError, Result};
use crate::frame::{CanonicalFrame, Column, NODATA};
use crate::station::StationMetadata;

const SIGNATURE: &str = "SMET 1.1 ASCII";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// When a column is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Always,
    /// Only with at least one non-missing value, placed right after `after`.
    IfPresent { after: Column },
}

#[derive(Debug, Clone, Copy)]
struct FieldSlot {
    column: Column,
    presence: Presence,
}

const LAYOUT: [FieldSlot; 8] = [
    FieldSlot { column: Column::Ta, presence: Presence::Always },
    FieldSlot { column: Column::Rh, presence: Presence::Always },
    FieldSlot { column: Column::Vw, presence: Presence::Always },
    FieldSlot { column: Column::Dw, presence: Presence::Always },
    FieldSlot { column: Column::Iswr, presence: Presence::Always },
    FieldSlot { column: Column::Psum, presence: Presence::Always },
    FieldSlot { column: Column::Hs, presence: Presence::Always },
    FieldSlot {
        column: Column::Ilwr,
        presence: Presence::IfPresent { after: Column::Iswr },
    },
];

/// Data columns written for `frame`, in file order.
pub fn field_layout(frame: &CanonicalFrame) -> Vec<Column> {
    let mut fields: Vec<Column> = LAYOUT
        .iter()
        .filter(|slot| slot.presence == Presence::Always)
        .map(|slot| slot.column)
        .collect();

    for slot in &LAYOUT {
        if let Presence::IfPresent { after } = slot.presence {
            if !frame.has_values(slot.column) {
                continue;
            }
            let at = fields
                .iter()
                .position(|c| *c == after)
                .map_or(fields.len(), |i| i + 1);
            fields.insert(at, slot.column);
        }
    }
    fields
}

/// Renders canonical frames as SMET text.
#[derive(Debug, Clone)]
pub struct SmetWriter {
    nodata: f64,
    source: Option<String>,
}

impl Default for SmetWriter {
    fn default() -> Self {
        Self {
            nodata: NODATA,
            source: None,
        }
    }
}

impl SmetWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sentinel written for missing values.
    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = nodata;
        self
    }

    /// Add a `source` header line naming where the data came from.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Render the full file. Fails with a schema error if a mandatory column
    /// is absent.
    pub fn render(&self, frame: &CanonicalFrame, station: &StationMetadata) -> Result<String> {
        let fields = field_layout(frame);
        let mut columns = Vec::with_capacity(fields.len());
        for column in &fields {
            let values = frame
                .column(*column)
                .ok_or_else(|| ForcingError::schema(column.name(), "column missing"))?;
            columns.push((*column, values));
        }

        let mut out = String::with_capacity(128 + frame.len() * 64);
        out.push_str(SIGNATURE);
        out.push('\n');
        out.push_str("[HEADER]\n");
        push_header(&mut out, "station_id", &station.id);
        push_header(&mut out, "station_name", &station.name);
        push_header(&mut out, "latitude", &station.latitude.to_string());
        push_header(&mut out, "longitude", &station.longitude.to_string());
        push_header(&mut out, "altitude", &station.altitude_m.to_string());
        push_header(&mut out, "epsg", &station.epsg.to_string());
        push_header(&mut out, "nodata", &self.nodata.to_string());
        push_header(&mut out, "tz", &station.timezone_offset.to_string());
        if let Some(source) = &self.source {
            push_header(&mut out, "source", source);
        }

        let names: Vec<&str> = fields.iter().map(|c| c.name()).collect();
        let units: Vec<&str> = fields.iter().map(|c| c.unit()).collect();
        push_header(&mut out, "fields", &format!("timestamp {}", names.join(" ")));
        push_header(&mut out, "units", &format!("ISO8601 {}", units.join(" ")));
        push_header(&mut out, "units_offset", &vec!["0"; fields.len() + 1].join(" "));
        push_header(&mut out, "units_multiplier", &vec!["1"; fields.len() + 1].join(" "));
        out.push_str("[DATA]\n");

        let shift = Duration::seconds((station.timezone_offset * 3600.0).round() as i64);
        for (i, ts) in frame.timestamps().iter().enumerate() {
            out.push_str(&(*ts + shift).format(TIMESTAMP_FORMAT).to_string());
            for (column, values) in &columns {
                out.push(' ');
                match values[i] {
                    Some(v) => out.push_str(&format!("{:.*}", column.precision(), v)),
                    None => out.push_str(&self.nodata.to_string()),
                }
            }
            out.push('\n');
        }

        Ok(out)
    }

    /// Render and write to `path` in one step.
    ///
    /// The text is written to a temporary file next to `path` and moved into
    /// place, so on any error an existing file at `path` is left as it was.
    pub fn write(&self, path: &Path, frame: &CanonicalFrame, station: &StationMetadata) -> Result<()> {
        let text = self.render(frame, station)?;

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(text.as_bytes())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;

        info!(path = %path.display(), rows = frame.len(), "wrote SMET file");
        Ok(())
    }
}

fn push_header(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(" = ");
    out.push_str(value);
    out.push('\n');
}

/// One data line of a parsed file.
#[derive(Debug, Clone, PartialEq)]
pub struct SmetRow {
    pub timestamp: NaiveDateTime,
    pub values: Vec<f64>,
}

/// A parsed SMET file.
#[derive(Debug, Clone, PartialEq)]
pub struct SmetDocument {
    /// Header entries in file order.
    pub header: Vec<(String, String)>,
    pub rows: Vec<SmetRow>,
}

impl SmetDocument {
    pub fn parse(text: &str) -> Result<SmetDocument> {
        let mut lines = text.lines().enumerate();

        match lines.next() {
            Some((_, first)) if first.trim_start().starts_with("SMET") => {}
            _ => return Err(ForcingError::decode("SMET", "missing SMET signature line")),
        }

        let mut header = Vec::new();
        let mut in_data = false;
        let mut rows = Vec::new();
        let mut width = None;

        for (n, line) in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.eq_ignore_ascii_case("[HEADER]") {
                continue;
            }
            if line.eq_ignore_ascii_case("[DATA]") {
                in_data = true;
                continue;
            }

            if !in_data {
                let (key, value) = line.split_once('=').ok_or_else(|| {
                    ForcingError::decode("SMET", format!("line {}: expected key = value", n + 1))
                })?;
                header.push((key.trim().to_string(), value.trim().to_string()));
                continue;
            }

            let width = *width.get_or_insert_with(|| field_count(&header));
            let mut tokens = line.split_whitespace();
            let stamp = tokens.next().unwrap_or_default();
            let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|e| {
                ForcingError::decode("SMET", format!("line {}: bad timestamp '{}': {}", n + 1, stamp, e))
            })?;
            let values = tokens
                .map(|t| {
                    t.parse::<f64>().map_err(|e| {
                        ForcingError::decode("SMET", format!("line {}: bad value '{}': {}", n + 1, t, e))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            if values.len() + 1 != width {
                return Err(ForcingError::decode(
                    "SMET",
                    format!("line {}: {} columns, header declares {}", n + 1, values.len() + 1, width),
                ));
            }
            rows.push(SmetRow { timestamp, values });
        }

        if !in_data {
            return Err(ForcingError::decode("SMET", "missing [DATA] section"));
        }
        Ok(SmetDocument { header, rows })
    }

    /// Value of a header key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.header
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> Vec<&str> {
        self.get("fields")
            .map(|f| f.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn units(&self) -> Vec<&str> {
        self.get("units")
            .map(|f| f.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn nodata(&self) -> f64 {
        self.get("nodata")
            .and_then(|v| v.parse().ok())
            .unwrap_or(NODATA)
    }

    /// Values of a data field, with nodata read as missing.
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let index = self.fields().iter().position(|f| *f == name)?.checked_sub(1)?;
        let nodata = self.nodata();
        Some(
            self.rows
                .iter()
                .map(|r| r.values.get(index).copied().filter(|v| *v != nodata))
                .collect(),
        )
    }
}

fn field_count(header: &[(String, String)]) -> usize {
    header
        .iter()
        .find(|(k, _)| k == "fields")
        .map_or(0, |(_, v)| v.split_whitespace().count())
}
