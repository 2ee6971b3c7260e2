//! Proof-set backend seam.
//!
//! The submit stage turns each aggregate into a [`RootAddition`] (root plus
//! its subroots in leaf order) and hands the whole batch to a
//! [`ProofSetBackend`] in one call. The backend either accepts the batch or
//! fails it as a unit; no partial success is modelled.
//!
//! ## Contracts implementors should uphold
//! - `add_roots` must be safe to call again with the same batch after a
//!   failure (the stage does not track which roots a failed call reached).
//! - Neither method should panic for malformed inputs; return `Err` instead.

use anyhow::{anyhow, bail, Result};
use pdpagg_core::io::write_atomic;
use pdpagg_core::Aggregate;
use pdpagg_crypto::{digest_hex, Label};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// One piece inside a root addition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubrootEntry {
    /// Piece link string.
    pub subroot_identifier: String,
}

/// Request to add one aggregate root, with its pieces, to a proof set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootAddition {
    /// Aggregate link string.
    pub root_identifier: String,
    /// Pieces in leaf order.
    pub subroots: Vec<SubrootEntry>,
}

impl RootAddition {
    /// Addition describing `aggregate`.
    #[must_use]
    pub fn from_aggregate(aggregate: &Aggregate) -> Self {
        Self {
            root_identifier: aggregate.root.to_string(),
            subroots: aggregate
                .links()
                .map(|l| SubrootEntry {
                    subroot_identifier: l.to_string(),
                })
                .collect(),
        }
    }
}

/// Registers aggregate roots on a proof set.
pub trait ProofSetBackend: Send + Sync {
    /// Add `roots` to `proof_set` as one request.
    fn add_roots(&self, proof_set: u64, roots: &[RootAddition]) -> Result<()>;
}

/// In-memory backend recording every accepted request.
///
/// Can be switched into a failing mode to exercise retry paths.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<(u64, Vec<RootAddition>)>>,
    failing: AtomicBool,
}

impl RecordingBackend {
    /// A backend that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that rejects every request.
    #[must_use]
    pub fn failing() -> Self {
        let b = Self::default();
        b.set_failing(true);
        b
    }

    /// Toggle rejection of subsequent requests.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Accepted requests, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<(u64, Vec<RootAddition>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl ProofSetBackend for RecordingBackend {
    fn add_roots(&self, proof_set: u64, roots: &[RootAddition]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("proof set {proof_set} rejected {} roots", roots.len());
        }
        self.calls
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?
            .push((proof_set, roots.to_vec()));
        Ok(())
    }
}

/// Backend that writes each request body as a JSON file for an external
/// poster to deliver.
///
/// The file name is derived from the proof set and a digest of every root in
/// the batch, so resubmitting the same batch rewrites the same file and
/// batches that differ in any root never collide.
#[derive(Debug, Clone)]
pub struct SpoolBackend {
    dir: PathBuf,
}

impl SpoolBackend {
    /// Spool into `dir` (created on first write).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Spool directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path the request for `roots` is written to.
    #[must_use]
    pub fn request_path(&self, proof_set: u64, roots: &[RootAddition]) -> PathBuf {
        let ids: Vec<&[u8]> = roots.iter().map(|r| r.root_identifier.as_bytes()).collect();
        let digest = digest_hex(Label::SpoolRequest, &ids);
        self.dir
            .join(format!("add-roots-{proof_set}-{}.json", &digest[..32]))
    }
}

impl ProofSetBackend for SpoolBackend {
    fn add_roots(&self, proof_set: u64, roots: &[RootAddition]) -> Result<()> {
        let body = serde_json::to_vec_pretty(roots)?;
        write_atomic(&self.request_path(proof_set, roots), &body)
    }
}
