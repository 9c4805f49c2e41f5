//! Chunked array cubes in the Zarr v2 layout.
//!
//! An array named `t2m` lives under `t2m/` in a store: metadata in
//! `t2m/.zarray`, optional attributes in `t2m/.zattrs`, and one object per
//! chunk keyed by its chunk indices (`t2m/12.3.4` or `t2m/12/3/4`).
//! Only C-ordered arrays of `f4`, `f8`, `i2` and `i4` with no, `zlib` or
//! `gzip` compression are understood.

use std::fs;
use std::io::{self, Read};
use std::ops::Range;
use std::path::PathBuf;

use flate2::read::{GzDecoder, ZlibDecoder};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ForcingError, Result};
use crate::fetch::HttpFetcher;

/// Key/value object store holding one or more arrays.
pub trait CubeStore {
    /// Human-readable location, for error messages.
    fn describe(&self) -> String;

    /// Object bytes, or `None` if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Store on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl CubeStore for LocalStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.root.join(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Store served over HTTP(S), e.g. a public object-storage bucket.
#[derive(Debug, Clone)]
pub struct HttpStore {
    base_url: String,
    source_id: String,
    fetcher: HttpFetcher,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, source_id: impl Into<String>, fetcher: HttpFetcher) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            source_id: source_id.into(),
            fetcher,
        }
    }
}

impl CubeStore for HttpStore {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let url = format!("{}/{}", self.base_url, key);
        self.fetcher.get_optional(&url, &self.source_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ArrayMeta {
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: String,
    compressor: Option<CompressorMeta>,
    #[serde(default)]
    fill_value: Value,
    #[serde(default = "default_order")]
    order: String,
    #[serde(default = "default_separator")]
    dimension_separator: String,
}

fn default_order() -> String {
    "C".to_string()
}

fn default_separator() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct CompressorMeta {
    id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ArrayAttrs {
    scale_factor: Option<f64>,
    add_offset: Option<f64>,
    units: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compressor {
    None,
    Zlib,
    Gzip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    F4,
    F8,
    I2,
    I4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DType {
    kind: Kind,
    little_endian: bool,
}

impl DType {
    fn parse(s: &str) -> Option<DType> {
        let mut chars = s.chars();
        let little_endian = match chars.next()? {
            '<' | '|' => true,
            '>' => false,
            _ => return None,
        };
        let kind = match chars.as_str() {
            "f4" => Kind::F4,
            "f8" => Kind::F8,
            "i2" => Kind::I2,
            "i4" => Kind::I4,
            _ => return None,
        };
        Some(DType {
            kind,
            little_endian,
        })
    }

    fn size(&self) -> usize {
        match self.kind {
            Kind::I2 => 2,
            Kind::F4 | Kind::I4 => 4,
            Kind::F8 => 8,
        }
    }

    fn decode(&self, b: &[u8]) -> f64 {
        macro_rules! read {
            ($t:ty, $n:expr) => {{
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&b[..$n]);
                if self.little_endian {
                    <$t>::from_le_bytes(buf) as f64
                } else {
                    <$t>::from_be_bytes(buf) as f64
                }
            }};
        }
        match self.kind {
            Kind::F4 => read!(f32, 4),
            Kind::F8 => read!(f64, 8),
            Kind::I2 => read!(i16, 2),
            Kind::I4 => read!(i32, 4),
        }
    }
}

/// One opened array.
#[derive(Debug, Clone)]
pub struct CubeArray {
    name: String,
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: DType,
    compressor: Compressor,
    fill: Option<f64>,
    separator: String,
    scale: f64,
    offset: f64,
    units: Option<String>,
}

impl CubeArray {
    /// Read the metadata of array `name` from `store`.
    pub fn open(store: &dyn CubeStore, name: &str) -> Result<CubeArray> {
        let context = format!("{}/{}", store.describe(), name);
        let raw = store
            .get(&format!("{}/.zarray", name))?
            .ok_or_else(|| ForcingError::decode(&context, "missing .zarray"))?;
        let meta: ArrayMeta =
            serde_json::from_slice(&raw).map_err(|e| ForcingError::decode(&context, e))?;

        let attrs: ArrayAttrs = match store.get(&format!("{}/.zattrs", name))? {
            Some(raw) => serde_json::from_slice(&raw).map_err(|e| ForcingError::decode(&context, e))?,
            None => ArrayAttrs::default(),
        };

        if meta.shape.len() != meta.chunks.len() || meta.shape.is_empty() {
            return Err(ForcingError::decode(&context, "shape and chunks disagree"));
        }
        if meta.chunks.iter().any(|c| *c == 0) {
            return Err(ForcingError::decode(&context, "zero chunk length"));
        }
        if meta.order != "C" {
            return Err(ForcingError::decode(
                &context,
                format!("unsupported order '{}'", meta.order),
            ));
        }
        let dtype = DType::parse(&meta.dtype).ok_or_else(|| {
            ForcingError::decode(&context, format!("unsupported dtype '{}'", meta.dtype))
        })?;
        let compressor = match meta.compressor.as_ref().map(|c| c.id.as_str()) {
            None => Compressor::None,
            Some("zlib") => Compressor::Zlib,
            Some("gzip") => Compressor::Gzip,
            Some(other) => {
                return Err(ForcingError::decode(
                    &context,
                    format!("unsupported compressor '{}'", other),
                ))
            }
        };
        let fill = match &meta.fill_value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) if s == "NaN" => Some(f64::NAN),
            _ => None,
        };

        Ok(CubeArray {
            name: name.to_string(),
            shape: meta.shape,
            chunks: meta.chunks,
            dtype,
            compressor,
            fill,
            separator: meta.dimension_separator,
            scale: attrs.scale_factor.unwrap_or(1.0),
            offset: attrs.add_offset.unwrap_or(0.0),
            units: attrs.units,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// `units` attribute, if any.
    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    /// Every value of a one-dimensional array.
    pub fn read_all(&self, store: &dyn CubeStore) -> Result<Vec<Option<f64>>> {
        self.read_range(store, 0..self.shape[0], &[])
    }

    /// Values at `range` along the first axis, with every other axis fixed
    /// at the index given in `rest`.
    ///
    /// Missing chunks read as fill; fill and NaN samples are `None`.
    pub fn read_range(
        &self,
        store: &dyn CubeStore,
        range: Range<usize>,
        rest: &[usize],
    ) -> Result<Vec<Option<f64>>> {
        let context = format!("{}/{}", store.describe(), self.name);
        if rest.len() + 1 != self.shape.len() {
            return Err(ForcingError::decode(
                &context,
                format!("expected {} fixed indices, got {}", self.shape.len() - 1, rest.len()),
            ));
        }
        if range.end > self.shape[0] || range.start > range.end {
            return Err(ForcingError::decode(
                &context,
                format!("range {:?} outside axis of length {}", range, self.shape[0]),
            ));
        }
        for (axis, idx) in rest.iter().enumerate() {
            if *idx >= self.shape[axis + 1] {
                return Err(ForcingError::decode(
                    &context,
                    format!("index {} outside axis {} of length {}", idx, axis + 1, self.shape[axis + 1]),
                ));
            }
        }

        let item = self.dtype.size();
        let chunk_len: usize = self.chunks.iter().product();

        // Position of the fixed indices inside their chunk, and stride of axis 0.
        let mut inner = 0usize;
        let mut stride = 1usize;
        for axis in (1..self.shape.len()).rev() {
            inner += (rest[axis - 1] % self.chunks[axis]) * stride;
            stride *= self.chunks[axis];
        }

        let mut out = Vec::with_capacity(range.len());
        let step = self.chunks[0];
        let mut i = range.start;
        while i < range.end {
            let chunk0 = i / step;
            let chunk_end = ((chunk0 + 1) * step).min(range.end);

            let mut key_parts = vec![chunk0.to_string()];
            key_parts.extend(
                rest.iter()
                    .enumerate()
                    .map(|(axis, idx)| (idx / self.chunks[axis + 1]).to_string()),
            );
            let key = format!("{}/{}", self.name, key_parts.join(&self.separator));

            match store.get(&key)? {
                None => {
                    debug!(key = %key, "absent chunk read as fill");
                    out.extend(std::iter::repeat(None).take(chunk_end - i));
                }
                Some(raw) => {
                    let data = self.decompress(&raw).map_err(|e| ForcingError::decode(&key, e))?;
                    if data.len() != chunk_len * item {
                        return Err(ForcingError::decode(
                            &key,
                            format!("chunk holds {} bytes, expected {}", data.len(), chunk_len * item),
                        ));
                    }
                    for j in i..chunk_end {
                        let at = ((j - chunk0 * step) * stride + inner) * item;
                        out.push(self.value(self.dtype.decode(&data[at..at + item])));
                    }
                }
            }
            i = chunk_end;
        }

        Ok(out)
    }

    fn value(&self, raw: f64) -> Option<f64> {
        if raw.is_nan() {
            return None;
        }
        if let Some(fill) = self.fill {
            if raw == fill {
                return None;
            }
        }
        Some(raw * self.scale + self.offset)
    }

    fn decompress(&self, raw: &[u8]) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        match self.compressor {
            Compressor::None => data.extend_from_slice(raw),
            Compressor::Zlib => {
                ZlibDecoder::new(raw).read_to_end(&mut data)?;
            }
            Compressor::Gzip => {
                GzDecoder::new(raw).read_to_end(&mut data)?;
            }
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn put(dir: &TempDir, key: &str, bytes: &[u8]) {
        let path = dir.path().join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn zlib(bytes: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_dtype_parse() {
        assert_eq!(DType::parse("<f4").unwrap().size(), 4);
        assert!(!DType::parse(">i2").unwrap().little_endian);
        assert!(DType::parse("<u8").is_none());
        assert!(DType::parse("").is_none());
        assert!(DType::parse("éf4").is_none());
        assert!(DType::parse("<é").is_none());
    }

    #[test]
    fn test_read_1d_big_endian_gzip() {
        let dir = TempDir::new().unwrap();
        put(
            &dir,
            "lat/.zarray",
            br#"{"zarr_format":2,"shape":[3],"chunks":[3],"dtype":">f8","compressor":{"id":"gzip","level":1},"fill_value":"NaN","order":"C","filters":null}"#,
        );
        let mut raw = Vec::new();
        for v in [47.0f64, 46.9, 46.8] {
            raw.extend_from_slice(&v.to_be_bytes());
        }
        put(&dir, "lat/0", &gzip(&raw));

        let store = LocalStore::new(dir.path());
        let array = CubeArray::open(&store, "lat").unwrap();
        assert_eq!(array.read_all(&store).unwrap(), vec![Some(47.0), Some(46.9), Some(46.8)]);
    }

    /// 3-D `[time=4, lat=2, lon=2]` array, chunks `[2, 2, 1]`, i2 packed with
    /// scale/offset, one absent chunk.
    #[test]
    fn test_read_series_across_chunks() {
        let dir = TempDir::new().unwrap();
        put(
            &dir,
            "t2m/.zarray",
            br#"{"zarr_format":2,"shape":[4,2,2],"chunks":[2,2,1],"dtype":"<i2","compressor":{"id":"zlib","level":5},"fill_value":-32767,"order":"C","dimension_separator":"/"}"#,
        );
        put(&dir, "t2m/.zattrs", br#"{"scale_factor":0.5,"add_offset":250.0,"units":"K"}"#);

        // Chunk (0, 0, 1) covers time 0..2, lat 0..2, lon 1.
        // Layout [t][lat][lon=1 only]: t0 lat0, t0 lat1, t1 lat0, t1 lat1.
        let mut raw = Vec::new();
        for v in [40i16, 10, -32767, 12] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        put(&dir, "t2m/0/0/1", &zlib(&raw));
        // Chunk (1, 0, 1) is absent.

        let store = LocalStore::new(dir.path());
        let array = CubeArray::open(&store, "t2m").unwrap();
        assert_eq!(array.units(), Some("K"));
        assert_eq!(array.shape(), &[4, 2, 2]);

        let series = array.read_range(&store, 0..4, &[1, 1]).unwrap();
        assert_eq!(series, vec![Some(255.0), Some(256.0), None, None]);

        let series = array.read_range(&store, 1..2, &[0, 1]).unwrap();
        assert_eq!(series, vec![None]);
    }

    #[test]
    fn test_bad_index_rejected() {
        let dir = TempDir::new().unwrap();
        put(
            &dir,
            "x/.zarray",
            br#"{"zarr_format":2,"shape":[2,2],"chunks":[2,2],"dtype":"<f4","compressor":null,"fill_value":null,"order":"C"}"#,
        );
        let store = LocalStore::new(dir.path());
        let array = CubeArray::open(&store, "x").unwrap();
        assert!(array.read_range(&store, 0..3, &[0]).is_err());
        assert!(array.read_range(&store, 0..2, &[2]).is_err());
        assert!(array.read_range(&store, 0..2, &[]).is_err());
    }

    #[test]
    fn test_unsupported_metadata() {
        let dir = TempDir::new().unwrap();
        put(
            &dir,
            "x/.zarray",
            br#"{"zarr_format":2,"shape":[2],"chunks":[2],"dtype":"<f4","compressor":{"id":"blosc"},"fill_value":null,"order":"C"}"#,
        );
        let store = LocalStore::new(dir.path());
        assert!(matches!(
            CubeArray::open(&store, "x"),
            Err(ForcingError::Decode { .. })
        ));
        assert!(CubeArray::open(&store, "missing").is_err());

        put(
            &dir,
            "y/.zarray",
            r#"{"zarr_format":2,"shape":[2],"chunks":[2],"dtype":"éf4","compressor":null,"fill_value":null,"order":"C"}"#.as_bytes(),
        );
        assert!(matches!(
            CubeArray::open(&store, "y"),
            Err(ForcingError::Decode { .. })
        ));
    }
}
