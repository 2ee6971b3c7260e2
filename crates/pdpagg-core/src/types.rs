//! Piece identifiers shared across the pdpagg workspace.
//!
//! A [`PieceLink`] names a piece by its binary-tree commitment, the height of
//! that tree (leaves are 32-byte nodes) and the amount of zero padding the
//! piece payload carried. Only the padded size and the commitment matter to
//! aggregation; padding travels along so identifiers round-trip unchanged.
//!
//! The string form is used on queue messages and as a store key, so it is
//! kept filename-safe: `piece1` followed by lowercase hex of
//! `height (1 byte) || padding (8 bytes BE) || commitment (32 bytes)`.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// 32-byte binary-tree node digest (top two bits of the last byte clear).
pub type Commitment = [u8; 32];

/// Size of a tree leaf in bytes.
pub const NODE_SIZE: u64 = 32;

/// Smallest padded piece size accepted by the aggregate builder.
pub const MIN_PIECE_SIZE: u64 = 128;

/// Largest tree height whose padded size still fits in a `u64` (2^63 bytes).
pub const MAX_HEIGHT: u8 = 58;

/// Prefix of the string form of a [`PieceLink`].
pub const PIECE_LINK_PREFIX: &str = "piece1";

/// Length of the binary encoding behind the string form.
pub const PIECE_LINK_BYTES: usize = 1 + 8 + 32;

/// Reasons a piece identifier cannot be constructed or decoded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    /// String form does not start with [`PIECE_LINK_PREFIX`].
    #[error("piece link must start with `piece1`")]
    MissingPrefix,
    /// Body is not valid hex.
    #[error("piece link body is not hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// Decoded body has the wrong length.
    #[error("piece link body must be 41 bytes, got {0}")]
    Length(usize),
    /// Tree height would overflow a `u64` padded size.
    #[error("tree height {0} exceeds maximum 58")]
    Height(u8),
    /// Padded size is not a power of two of at least one node.
    #[error("padded size {0} is not a power of two >= 32")]
    PaddedSize(u64),
}

/// Content-derived identifier of a piece (or of an aggregate root).
///
/// Equality and hashing consider `(height, commitment)` only: two links with
/// the same commitment and padded size name the same piece. Ordering puts
/// larger padded sizes first, then compares commitment bytes.
#[derive(Clone, Copy, Debug)]
pub struct PieceLink {
    height: u8,
    padding: u64,
    commitment: Commitment,
}

impl PieceLink {
    /// Construct from a commitment, tree height and payload padding.
    pub fn new(commitment: Commitment, height: u8, padding: u64) -> Result<Self, LinkError> {
        if height > MAX_HEIGHT {
            return Err(LinkError::Height(height));
        }
        Ok(Self {
            height,
            padding,
            commitment,
        })
    }

    /// Construct from a padded size in bytes instead of a height.
    pub fn from_padded_size(
        commitment: Commitment,
        padded_size: u64,
        padding: u64,
    ) -> Result<Self, LinkError> {
        if !padded_size.is_power_of_two() || padded_size < NODE_SIZE {
            return Err(LinkError::PaddedSize(padded_size));
        }
        let height = (padded_size.trailing_zeros() - NODE_SIZE.trailing_zeros()) as u8;
        Self::new(commitment, height, padding)
    }

    /// Binary-tree height (leaves are 32-byte nodes).
    #[inline]
    #[must_use]
    pub const fn height(&self) -> u8 {
        self.height
    }

    /// Zero padding carried by the piece payload.
    #[inline]
    #[must_use]
    pub const fn padding(&self) -> u64 {
        self.padding
    }

    /// The 32-byte data commitment.
    #[inline]
    #[must_use]
    pub const fn commitment(&self) -> &Commitment {
        &self.commitment
    }

    /// Padded size in bytes, always a power of two.
    #[inline]
    #[must_use]
    pub const fn padded_size(&self) -> u64 {
        NODE_SIZE << self.height
    }

    /// Binary encoding behind the string form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PIECE_LINK_BYTES] {
        let mut out = [0u8; PIECE_LINK_BYTES];
        out[0] = self.height;
        out[1..9].copy_from_slice(&self.padding.to_be_bytes());
        out[9..].copy_from_slice(&self.commitment);
        out
    }

    /// Decode the binary encoding produced by [`PieceLink::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinkError> {
        if bytes.len() != PIECE_LINK_BYTES {
            return Err(LinkError::Length(bytes.len()));
        }
        let mut padding = [0u8; 8];
        padding.copy_from_slice(&bytes[1..9]);
        let mut commitment = [0u8; 32];
        commitment.copy_from_slice(&bytes[9..]);
        Self::new(commitment, bytes[0], u64::from_be_bytes(padding))
    }
}

impl PartialEq for PieceLink {
    fn eq(&self, other: &Self) -> bool {
        self.height == other.height && self.commitment == other.commitment
    }
}

impl Eq for PieceLink {}

impl Hash for PieceLink {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.height.hash(state);
        self.commitment.hash(state);
    }
}

impl Ord for PieceLink {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .height
            .cmp(&self.height)
            .then_with(|| self.commitment.cmp(&other.commitment))
    }
}

impl PartialOrd for PieceLink {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PieceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PIECE_LINK_PREFIX}{}", hex::encode(self.to_bytes()))
    }
}

impl FromStr for PieceLink {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(PIECE_LINK_PREFIX)
            .ok_or(LinkError::MissingPrefix)?;
        Self::from_bytes(&hex::decode(body)?)
    }
}

impl Serialize for PieceLink {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PieceLink {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
