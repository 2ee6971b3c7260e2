//! Serialization helpers for aggregates and stored payloads.
//!
//! JSON and CBOR read/write utilities with extension-based auto-detection.
//! Unknown/missing extensions are rejected for reads and default to JSON
//! for writes.
//!
//! Extras:
//! - In-memory CBOR helpers: [`to_cbor`] / [`from_cbor`]
//! - Tiny versioned payload wrapper: [`Versioned<T>`]
//! - [`write_atomic`]: temp-file-then-rename writes for file-backed stores

use crate::Aggregate;
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::Path;

/// Ensure the parent directory for a file exists (no-op if none).
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", display(path)))?;
        }
    }
    Ok(())
}

/// ------------------------------
/// Aggregate I/O
/// ------------------------------

/// Read an [`Aggregate`] from **JSON**.
pub fn read_aggregate_json<P: AsRef<Path>>(path: P) -> Result<Aggregate> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", display(path_ref)))?;
    let rdr = BufReader::new(f);
    let v: Aggregate =
        serde_json::from_reader(rdr).with_context(|| "deserialize JSON aggregate")?;
    Ok(v)
}

/// Write an [`Aggregate`] to **JSON** (pretty).
pub fn write_aggregate_json<P: AsRef<Path>>(path: P, v: &Aggregate) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", display(path_ref)))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, v).with_context(|| "serialize JSON aggregate")?;
    w.flush().with_context(|| "flush JSON writer")?;
    Ok(())
}

/// Read an [`Aggregate`] from **CBOR**.
pub fn read_aggregate_cbor<P: AsRef<Path>>(path: P) -> Result<Aggregate> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", display(path_ref)))?;
    let mut rdr = BufReader::new(f);
    let v: Aggregate =
        ciborium::de::from_reader(&mut rdr).with_context(|| "deserialize CBOR aggregate")?;
    Ok(v)
}

/// Write an [`Aggregate`] to **CBOR**.
pub fn write_aggregate_cbor<P: AsRef<Path>>(path: P, v: &Aggregate) -> Result<()> {
    let path_ref = path.as_ref();
    ensure_parent_dir(path_ref)?;
    let f = File::create(path_ref).with_context(|| format!("create {}", display(path_ref)))?;
    let mut w = BufWriter::new(f);
    ciborium::ser::into_writer(v, &mut w).with_context(|| "serialize CBOR aggregate")?;
    w.flush().with_context(|| "flush CBOR writer")?;
    Ok(())
}

/// Auto-detect read by extension `.json` / `.cbor` (case-insensitive).
pub fn read_aggregate_auto<P: AsRef<Path>>(path: P) -> Result<Aggregate> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("json") => read_aggregate_json(path),
        Some("cbor") => read_aggregate_cbor(path),
        Some(other) => Err(anyhow!(
            "unsupported aggregate extension: {} (supported: .json, .cbor)",
            other
        )),
        None => Err(anyhow!("path has no extension (expected .json or .cbor)")),
    }
}

/// Auto-detect write (defaults to **JSON** if unknown or missing).
pub fn write_aggregate_auto<P: AsRef<Path>>(path: P, v: &Aggregate) -> Result<()> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("cbor") => write_aggregate_cbor(path, v),
        _ => write_aggregate_json(path, v),
    }
}

/// ------------------------------
/// In-memory CBOR helpers
/// ------------------------------

/// Serialize any `T: Serialize` to **CBOR bytes** using `ciborium`.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).with_context(|| "serialize CBOR (to_cbor)")?;
    Ok(buf)
}

/// Deserialize any `T: DeserializeOwned` from **CBOR bytes** using `ciborium`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut cur = Cursor::new(bytes);
    let v = ciborium::de::from_reader(&mut cur).with_context(|| "deserialize CBOR (from_cbor)")?;
    Ok(v)
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so
/// readers never observe a half-written value.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    {
        let f = File::create(tmp).with_context(|| format!("create {}", display(tmp)))?;
        let mut w = BufWriter::new(f);
        w.write_all(bytes)
            .with_context(|| format!("write {}", display(tmp)))?;
        w.flush().with_context(|| format!("flush {}", display(tmp)))?;
    }
    fs::rename(tmp, path)
        .with_context(|| format!("rename {} -> {}", display(tmp), display(path)))?;
    Ok(())
}

/// ------------------------------
/// Tiny versioned wrapper
/// ------------------------------

/// Small versioned wrapper to tag payloads.
///
/// This is deliberately “dumb”: it just pairs a `u16` tag with a payload so
/// callers can enforce wire versions at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Wire version tag.
    pub ver: u16,
    /// Wrapped payload.
    pub payload: T,
}

impl<T> Versioned<T> {
    /// Construct a new versioned wrapper.
    #[inline]
    pub fn new(ver: u16, payload: T) -> Self {
        Self { ver, payload }
    }
}

/// Return the lowercase extension (without dot) if present.
#[must_use]
pub fn ext_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase())
}

/// Human-friendly path display for error messages.
fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AggregatePiece, InclusionProof, PieceLink};

    fn tmp_path(name: &str, ext: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("pdpagg_core_io_{}_{}.{}", name, nanos, ext));
        p
    }

    fn single_piece() -> Aggregate {
        let link = PieceLink::from_padded_size([4u8; 32], 1 << 10, 3).unwrap();
        Aggregate::new(
            link,
            vec![AggregatePiece {
                link,
                inclusion_proof: InclusionProof::default(),
            }],
        )
    }

    #[test]
    fn aggregate_json_roundtrip() {
        let path = tmp_path("agg", "json");
        let agg = single_piece();
        write_aggregate_auto(&path, &agg).unwrap();
        let got = read_aggregate_auto(&path).unwrap();
        assert_eq!(got, agg);
        assert_eq!(got.root.padding(), 3);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn aggregate_cbor_roundtrip() {
        let path = tmp_path("agg", "cbor");
        let agg = single_piece();
        write_aggregate_auto(&path, &agg).unwrap();
        assert_eq!(read_aggregate_auto(&path).unwrap(), agg);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unknown_extension_rejected_on_read() {
        assert!(read_aggregate_auto(tmp_path("agg", "toml")).is_err());
        assert!(read_aggregate_auto(std::env::temp_dir().join("noext")).is_err());
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let path = tmp_path("atomic", "bin");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn in_memory_cbor_helpers_roundtrip() {
        let wrapped = Versioned::new(2u16, vec![1u32, 2, 3, 5, 8]);
        let bytes = to_cbor(&wrapped).unwrap();
        let back: Versioned<Vec<u32>> = from_cbor(&bytes).unwrap();
        assert_eq!(wrapped.ver, back.ver);
        assert_eq!(wrapped.payload, back.payload);
    }
}
