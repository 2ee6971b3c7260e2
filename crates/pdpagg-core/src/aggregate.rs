//! Aggregate data model shared by the builder, the pipeline stages and callers.
//!
//! An [`Aggregate`] pins its root identifier and, for every leaf piece in
//! left-to-right tree order, an [`InclusionProof`] that re-derives the root
//! from the piece commitment alone. These types form the persisted boundary
//! between pipeline stages, so their serialized shape is kept conservative.
//!
//! ## Backward/forward compatibility
//! - Do **not** add `#[serde(deny_unknown_fields)]`; stored aggregates written
//!   by newer producers must stay readable.
//! - Prefer new **optional** fields with `#[serde(default)]` over changing
//!   existing field types.

use crate::commitment::combine;
use crate::types::{Commitment, PieceLink};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons an inclusion proof does not check out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
    /// `index` addresses a node outside a tree of `path.len()` levels.
    #[error("proof index {index} out of range for a path of {levels} levels")]
    IndexOutOfRange {
        /// Offending index.
        index: u64,
        /// Path length.
        levels: usize,
    },
    /// Replaying the proof of piece `index` did not reproduce the root.
    #[error("inclusion proof of piece #{index} ({piece}) does not reproduce the aggregate root")]
    RootMismatch {
        /// Position of the piece in the aggregate.
        index: usize,
        /// The piece whose proof failed.
        piece: PieceLink,
    },
}

/// Sibling path plus leaf index proving one leaf belongs to a root.
///
/// `path[i]` is the sibling at level `i` above the leaf. Bit `i` of `index`
/// says whether the running hash is the right (`1`) or left (`0`) operand at
/// that level; `index` is the leaf's position among nodes of its own size.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InclusionProof {
    /// Sibling commitments, leaf level first.
    pub path: Vec<Commitment>,
    /// Leaf position at its own tree level.
    pub index: u64,
}

impl InclusionProof {
    /// Construct a proof from its parts.
    #[inline]
    #[must_use]
    pub fn new(path: Vec<Commitment>, index: u64) -> Self {
        Self { path, index }
    }

    /// Number of levels between the leaf and the root.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Replay `combine` from `leaf` up the path.
    pub fn compute_root(&self, leaf: &Commitment) -> Result<Commitment, ProofError> {
        let levels = self.path.len();
        if levels < 64 && self.index >> levels != 0 {
            return Err(ProofError::IndexOutOfRange {
                index: self.index,
                levels,
            });
        }
        let mut cur = *leaf;
        let mut idx = self.index;
        for sib in &self.path {
            cur = if idx & 1 == 0 {
                combine(&cur, sib)
            } else {
                combine(sib, &cur)
            };
            idx >>= 1;
        }
        Ok(cur)
    }

    /// Whether replaying from `leaf` lands on `root`.
    #[must_use]
    pub fn verify(&self, leaf: &Commitment, root: &Commitment) -> bool {
        matches!(self.compute_root(leaf), Ok(r) if &r == root)
    }
}

/// One leaf of an aggregate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregatePiece {
    /// The piece identifier.
    pub link: PieceLink,
    /// Proof that `link` is a leaf of the aggregate root.
    pub inclusion_proof: InclusionProof,
}

/// A commitment tree over pieces plus one inclusion proof per piece.
///
/// **Invariants**
/// - `pieces` is exactly the leaf set used to build `root`, in tree
///   left-to-right order.
/// - Every proof re-derives `root.commitment()` from its piece commitment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Aggregate {
    /// Identifier of the aggregate: root commitment and padded tree size.
    pub root: PieceLink,
    /// Leaves in tree order with their proofs.
    pub pieces: Vec<AggregatePiece>,
}

impl Aggregate {
    /// Construct a new [`Aggregate`].
    #[inline]
    #[must_use]
    pub fn new(root: PieceLink, pieces: Vec<AggregatePiece>) -> Self {
        Self { root, pieces }
    }

    /// The aggregate's identifier; also its store key.
    #[inline]
    #[must_use]
    pub fn link(&self) -> PieceLink {
        self.root
    }

    /// Number of pieces.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Whether the aggregate holds no pieces (never true for built aggregates).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Sum of the pieces' padded sizes (before padding up to the root size).
    #[must_use]
    pub fn piece_size(&self) -> u64 {
        self.pieces.iter().map(|p| p.link.padded_size()).sum()
    }

    /// Iterate the piece links in leaf order.
    pub fn links(&self) -> impl Iterator<Item = PieceLink> + '_ {
        self.pieces.iter().map(|p| p.link)
    }

    /// Replay every inclusion proof against the root.
    pub fn verify(&self) -> Result<(), ProofError> {
        let root = self.root.commitment();
        for (index, piece) in self.pieces.iter().enumerate() {
            let got = piece.inclusion_proof.compute_root(piece.link.commitment())?;
            if &got != root {
                return Err(ProofError::RootMismatch {
                    index,
                    piece: piece.link,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_leaf_aggregate() -> Aggregate {
        let a = PieceLink::from_padded_size([1u8; 32], 128, 0).unwrap();
        let b = PieceLink::from_padded_size([2u8; 32], 128, 0).unwrap();
        let root_c = combine(a.commitment(), b.commitment());
        let root = PieceLink::from_padded_size(root_c, 256, 0).unwrap();
        Aggregate::new(
            root,
            vec![
                AggregatePiece {
                    link: a,
                    inclusion_proof: InclusionProof::new(vec![*b.commitment()], 0),
                },
                AggregatePiece {
                    link: b,
                    inclusion_proof: InclusionProof::new(vec![*a.commitment()], 1),
                },
            ],
        )
    }

    #[test]
    fn hand_built_aggregate_verifies() {
        let agg = two_leaf_aggregate();
        agg.verify().unwrap();
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.piece_size(), 256);
    }

    #[test]
    fn swapped_index_fails() {
        let mut agg = two_leaf_aggregate();
        agg.pieces[0].inclusion_proof.index = 1;
        assert_eq!(
            agg.verify(),
            Err(ProofError::RootMismatch {
                index: 0,
                piece: agg.pieces[0].link
            })
        );
    }

    #[test]
    fn index_beyond_path_is_rejected() {
        let proof = InclusionProof::new(vec![[0u8; 32]], 2);
        assert_eq!(
            proof.compute_root(&[0u8; 32]),
            Err(ProofError::IndexOutOfRange {
                index: 2,
                levels: 1
            })
        );
        // A single-piece aggregate has an empty path and index 0.
        let leaf = [5u8; 32];
        assert!(InclusionProof::default().verify(&leaf, &leaf));
    }

    #[test]
    fn serde_roundtrip_json() {
        let agg = two_leaf_aggregate();
        let ser = serde_json::to_vec(&agg).expect("serialize");
        let de: Aggregate = serde_json::from_slice(&ser).expect("deserialize");
        assert_eq!(de, agg);
        de.verify().unwrap();
    }
}
