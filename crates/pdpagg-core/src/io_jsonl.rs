//! JSON Lines (NDJSON) helpers for streaming message I/O.
//!
//! Queue messages (`{"piece": ...}`, `{"link": ...}`) are exchanged with
//! tooling as one JSON object per line.
//!
//! - **Reader**: returns an iterator that *owns* its underlying reader,
//!   yielding `Result<T>` so callers can surface per-line errors.
//! - **Writer**: uses `serde_json::to_writer` to avoid intermediate allocations.
//!
//! # Formats
//! We treat both `.jsonl` and `.ndjson` as equivalent line-delimited JSON.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

/// Owning JSONL iterator.
///
/// Holds the file and buffered reader internally to avoid lifetime pitfalls
/// of returning a borrowed `Lines<'_>` iterator.
pub struct JsonlIter<T> {
    rdr: BufReader<File>,
    buf: String,
    line_no: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonlIter<T> {
    fn new(file: File) -> Self {
        Self {
            rdr: BufReader::new(file),
            buf: String::with_capacity(1 << 10),
            line_no: 0,
            _item: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Iterator for JsonlIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.rdr.read_line(&mut self.buf) {
                Ok(0) => return None, // EOF
                Ok(_) => {
                    self.line_no += 1;
                    let line = self.buf.trim_end_matches(['\n', '\r']);
                    if line.trim().is_empty() {
                        // Blank separators between messages are tolerated.
                        continue;
                    }
                    return Some(
                        serde_json::from_str(line)
                            .with_context(|| format!("parse jsonl line {}", self.line_no)),
                    );
                }
                Err(e) => {
                    return Some(
                        Err(e).with_context(|| format!("read line {}", self.line_no + 1)),
                    )
                }
            }
        }
    }
}

/// Stream read: one JSON object per line.
///
/// # Errors
/// Opening the file may fail. Individual iteration items may be `Err` if a
/// particular line is malformed.
pub fn stream_jsonl<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<JsonlIter<T>> {
    let f = File::open(path.as_ref())
        .with_context(|| format!("open {}", path.as_ref().display()))?;
    Ok(JsonlIter::new(f))
}

/// Read every line, failing on the first malformed one.
pub fn read_jsonl<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>> {
    stream_jsonl(path)?.collect()
}

/// Write items as JSON Lines (one object per line).
pub fn write_jsonl<P: AsRef<Path>, T: Serialize>(path: P, items: &[T]) -> Result<()> {
    crate::io::ensure_parent_dir(path.as_ref())?;
    let f = File::create(path.as_ref())
        .with_context(|| format!("create {}", path.as_ref().display()))?;
    let mut w = BufWriter::new(f);
    for it in items {
        serde_json::to_writer(&mut w, it).context("serialize jsonl item")?;
        w.write_all(b"\n").context("write newline")?;
    }
    w.flush().context("flush writer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write as _;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Mini {
        k: u32,
    }

    fn tmp_jsonl(tag: &str) -> std::path::PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("pdpagg_core_jsonl_{tag}_{nanos}.jsonl"))
    }

    #[test]
    fn jsonl_roundtrip() {
        let p = tmp_jsonl("rt");
        let items = vec![Mini { k: 1 }, Mini { k: 2 }, Mini { k: 3 }];
        write_jsonl(&p, &items).unwrap();
        let back: Vec<Mini> = read_jsonl(&p).unwrap();
        assert_eq!(back, items);
        let _ = std::fs::remove_file(p);
    }

    #[test]
    fn blank_lines_skipped_and_bad_lines_numbered() {
        let p = tmp_jsonl("bad");
        {
            let mut f = File::create(&p).unwrap();
            writeln!(f, r#"{{"k":1}}"#).unwrap();
            writeln!(f).unwrap();
            writeln!(f, r#"{{"k":"x"}}"#).unwrap();
        }
        let mut it = stream_jsonl::<Mini, _>(&p).unwrap();
        assert_eq!(it.next().unwrap().unwrap(), Mini { k: 1 });
        let err = it.next().unwrap().unwrap_err();
        assert!(format!("{err:#}").contains("line 3"));
        assert!(it.next().is_none());
        let _ = std::fs::remove_file(p);
    }
}
