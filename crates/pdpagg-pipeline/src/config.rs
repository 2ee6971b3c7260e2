//! TOML configuration for a pipeline deployment.
//!
//! ```toml
//! min_aggregate_size = 134217728
//! max_piece_size = 268435456
//! proof_set_id = 7
//! store_dir = "pdpagg-data"
//! spool_dir = "pdpagg-spool"
//! signer_seed = "0707…07"   # 64 hex chars
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use anyhow::{ensure, Context, Result};
use pdpagg_core::MIN_PIECE_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::buffer::{BufferPolicy, MIN_AGGREGATE_SIZE};

/// Deployment settings for the three stages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Aggregation threshold in padded bytes.
    pub min_aggregate_size: u64,
    /// Largest piece admitted at ingestion; unset admits any size.
    pub max_piece_size: Option<u64>,
    /// Proof set receiving submitted roots.
    pub proof_set_id: u64,
    /// Root of the on-disk stores.
    pub store_dir: PathBuf,
    /// Where root-addition requests are spooled.
    pub spool_dir: Option<PathBuf>,
    /// Ed25519 seed of the receipt issuer, as hex.
    pub signer_seed: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_aggregate_size: MIN_AGGREGATE_SIZE,
            max_piece_size: None,
            proof_set_id: 0,
            store_dir: PathBuf::from("pdpagg-data"),
            spool_dir: None,
            signer_seed: None,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let src = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let cfg: Self = toml::from_str(&src).with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.min_aggregate_size.is_power_of_two() && self.min_aggregate_size >= MIN_PIECE_SIZE,
            "min_aggregate_size {} must be a power of two >= {MIN_PIECE_SIZE}",
            self.min_aggregate_size
        );
        if let Some(max) = self.max_piece_size {
            ensure!(
                max >= MIN_PIECE_SIZE,
                "max_piece_size {max} is below the {MIN_PIECE_SIZE} byte minimum piece"
            );
        }
        if let Some(seed) = &self.signer_seed {
            ensure!(
                seed.len() == 64 && seed.bytes().all(|b| b.is_ascii_hexdigit()),
                "signer_seed must be 64 hex characters"
            );
        }
        Ok(())
    }

    /// Accumulation policy for the aggregate stage.
    #[must_use]
    pub const fn policy(&self) -> BufferPolicy {
        BufferPolicy::new(self.min_aggregate_size)
    }

    /// Directory of stored aggregates.
    #[must_use]
    pub fn aggregates_dir(&self) -> PathBuf {
        self.store_dir.join("aggregates")
    }

    /// Directory of the workspace buffer.
    #[must_use]
    pub fn workspace_dir(&self) -> PathBuf {
        self.store_dir.join("workspace")
    }

    /// Directory of receipts.
    #[must_use]
    pub fn receipts_dir(&self) -> PathBuf {
        self.store_dir.join("receipts")
    }

    /// Directory of the receipt root index.
    #[must_use]
    pub fn receipt_index_dir(&self) -> PathBuf {
        self.store_dir.join("receipt-index")
    }

    /// Directory of roots produced but not yet accepted by the backend.
    #[must_use]
    pub fn pending_dir(&self) -> PathBuf {
        self.store_dir.join("pending")
    }
}
