//! Key-value persistence seam.
//!
//! Stages only ever `get` and `put` whole values by string key. Two stores
//! are provided:
//! - [`MemoryStore`]: a mutex-guarded map, for tests and dry runs;
//! - [`FsStore`]: one CBOR file per key under a directory, written through a
//!   temp file and a rename so a crash never leaves a torn value behind.

use anyhow::{anyhow, bail, Context, Result};
use pdpagg_core::io::{from_cbor, to_cbor, write_atomic, Versioned};
use pdpagg_core::{Aggregate, PieceLink};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{PipelineError, Step};

/// Version tag written around every value by [`FsStore`].
pub const STORE_VERSION: u16 = 1;

/// Whole-value key-value store.
///
/// Implementations take `&self` and handle their own synchronization so one
/// store can back several stages at once.
pub trait Store<V>: Send + Sync {
    /// Value under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<V>>;

    /// Write `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &V) -> Result<()>;
}

/// In-memory store.
#[derive(Debug)]
pub struct MemoryStore<V> {
    inner: Mutex<HashMap<String, V>>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> MemoryStore<V> {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |m| m.len())
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone + Send> Store<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> Result<Option<V>> {
        let map = self.inner.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, value: &V) -> Result<()> {
        let mut map = self.inner.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        map.insert(key.to_owned(), value.clone());
        Ok(())
    }
}

/// Directory-backed store: `<dir>/<key>.cbor` per value.
#[derive(Debug, Clone)]
pub struct FsStore<V> {
    dir: PathBuf,
    _value: PhantomData<fn() -> V>,
}

impl<V> FsStore<V> {
    /// Store rooted at `dir` (created lazily on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _value: PhantomData,
        }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let ok = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !ok {
            bail!("store key {key:?} is not a plain file name");
        }
        Ok(self.dir.join(format!("{key}.cbor")))
    }
}

impl<V: Serialize + DeserializeOwned> Store<V> for FsStore<V> {
    fn get(&self, key: &str) -> Result<Option<V>> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let v: Versioned<V> =
            from_cbor(&bytes).with_context(|| format!("decode {}", path.display()))?;
        if v.ver != STORE_VERSION {
            bail!(
                "{} has store version {}, expected {STORE_VERSION}",
                path.display(),
                v.ver
            );
        }
        Ok(Some(v.payload))
    }

    fn put(&self, key: &str, value: &V) -> Result<()> {
        let path = self.path_for(key)?;
        let bytes = to_cbor(&Versioned::new(STORE_VERSION, value))?;
        write_atomic(&path, &bytes)
    }
}

/// Load the aggregate stored under `root`; absence is fatal.
pub(crate) fn fetch_aggregate(
    store: &dyn Store<Aggregate>,
    root: &PieceLink,
) -> Result<Aggregate, PipelineError> {
    let key = root.to_string();
    store
        .get(&key)
        .map_err(PipelineError::io(Step::FetchAggregate, key))?
        .ok_or(PipelineError::MissingAggregate(*root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tmp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("pdpagg_store_{name}_{nanos}"))
    }

    #[test]
    fn memory_roundtrip() {
        let s = MemoryStore::<u64>::new();
        assert_eq!(s.get("a").unwrap(), None);
        s.put("a", &7).unwrap();
        s.put("a", &8).unwrap();
        assert_eq!(s.get("a").unwrap(), Some(8));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn fs_roundtrip_and_overwrite() {
        let dir = tmp_dir("rt");
        let s = FsStore::<Vec<String>>::new(&dir);
        assert_eq!(s.get("k").unwrap(), None);
        s.put("k", &vec!["x".to_owned()]).unwrap();
        s.put("k", &vec!["y".to_owned(), "z".to_owned()]).unwrap();
        assert_eq!(s.get("k").unwrap(), Some(vec!["y".to_owned(), "z".to_owned()]));
        assert!(dir.join("k.cbor").exists());
        assert!(!dir.join("k.cbor.tmp").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn fs_rejects_path_like_keys() {
        let s = FsStore::<u8>::new(tmp_dir("keys"));
        assert!(s.put("../escape", &1).is_err());
        assert!(s.put("", &1).is_err());
        assert!(s.get(".hidden").is_err());
    }

    #[test]
    fn fs_rejects_foreign_version() {
        let dir = tmp_dir("ver");
        let s = FsStore::<u8>::new(&dir);
        write_atomic(&dir.join("v.cbor"), &to_cbor(&Versioned::new(99, 1u8)).unwrap()).unwrap();
        assert!(s.get("v").is_err());
        let _ = fs::remove_dir_all(dir);
    }
}
