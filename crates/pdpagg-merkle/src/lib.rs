// crates/pdpagg-merkle/src/lib.rs

//! Aggregate commitment trees over size-sorted pieces.
//!
//! [`build_aggregate`] folds pieces (largest first, power-of-two sizes) into a
//! single binary tree the same way carries propagate in binary addition:
//! each new leaf is pushed on a stack and equal-size neighbours are combined
//! until the stack sizes are strictly decreasing. Leftover frames are then
//! padded with zero subtrees until one root remains. Because the input is
//! sorted, every piece lands at an offset aligned to its own size.
//!
//! The finished tree is walked left-first to emit one inclusion proof per
//! piece; a leaf that does not carry the expected commitment aborts with
//! [`AggregateError::IncorrectTree`].

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]

use pdpagg_core::{
    combine, zero_commitment, Aggregate, AggregatePiece, Commitment, InclusionProof, LinkError,
    PieceLink, MIN_PIECE_SIZE,
};
use thiserror::Error;

/// Largest padded tree an aggregate may span (2^63 bytes).
pub const MAX_AGGREGATE_SIZE: u64 = 1 << 63;

/// Failures of [`build_aggregate`].
///
/// Everything but [`AggregateError::IncorrectTree`] is an input error caught
/// before any hashing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregateError {
    /// No pieces were supplied.
    #[error("cannot aggregate an empty piece list")]
    Empty,
    /// A piece is smaller than [`MIN_PIECE_SIZE`].
    #[error("piece #{index} has padded size {size}, below the 128-byte minimum")]
    PieceTooSmall {
        /// Position in the input.
        index: usize,
        /// Its padded size.
        size: u64,
    },
    /// A piece is larger than the one before it.
    #[error("pieces not sorted largest-first: #{index} ({size} B) follows a {prev} B piece")]
    Unsorted {
        /// Position of the out-of-order piece.
        index: usize,
        /// Its padded size.
        size: u64,
        /// Padded size of the preceding piece.
        prev: u64,
    },
    /// Summed sizes do not fit in a 2^63-byte tree.
    #[error("pieces span more than 2^63 padded bytes")]
    TooLarge,
    /// A rebuilt leaf does not match the piece expected at its position.
    #[error("incorrect tree: leaf #{index} does not carry the expected piece commitment")]
    IncorrectTree {
        /// Leaf position in left-to-right order.
        index: usize,
    },
    /// The root could not be expressed as a piece link.
    #[error("root identifier: {0}")]
    Link(#[from] LinkError),
}

/* ------------------------------ tree frames ------------------------------ */

#[derive(Debug)]
enum FrameKind {
    /// Leaf carrying an input piece.
    Piece,
    /// Zero-commitment filler on the right edge.
    Padding,
    /// Internal node owning both children.
    Node(Box<StackFrame>, Box<StackFrame>),
}

#[derive(Debug)]
struct StackFrame {
    size: u64,
    commitment: Commitment,
    kind: FrameKind,
}

impl StackFrame {
    fn piece(link: &PieceLink) -> Self {
        Self {
            size: link.padded_size(),
            commitment: *link.commitment(),
            kind: FrameKind::Piece,
        }
    }

    fn padding(size: u64) -> Self {
        Self {
            size,
            commitment: zero_commitment(size),
            kind: FrameKind::Padding,
        }
    }

    fn join(left: Self, right: Self) -> Self {
        debug_assert_eq!(left.size, right.size, "joining unequal subtrees");
        Self {
            size: left.size << 1,
            commitment: combine(&left.commitment, &right.commitment),
            kind: FrameKind::Node(Box::new(left), Box::new(right)),
        }
    }
}

/// Combine the top two frames while they have equal size.
fn reduce(stack: &mut Vec<StackFrame>) {
    while matches!(stack.as_slice(), [.., l, r] if l.size == r.size) {
        let (Some(right), Some(left)) = (stack.pop(), stack.pop()) else {
            break;
        };
        stack.push(StackFrame::join(left, right));
    }
}

fn validate(pieces: &[PieceLink]) -> Result<(), AggregateError> {
    if pieces.is_empty() {
        return Err(AggregateError::Empty);
    }
    let mut prev = u64::MAX;
    let mut total = 0u64;
    for (index, p) in pieces.iter().enumerate() {
        let size = p.padded_size();
        if size < MIN_PIECE_SIZE {
            return Err(AggregateError::PieceTooSmall { index, size });
        }
        if size > prev {
            return Err(AggregateError::Unsorted { index, size, prev });
        }
        prev = size;
        total = total.checked_add(size).ok_or(AggregateError::TooLarge)?;
    }
    if total > MAX_AGGREGATE_SIZE {
        return Err(AggregateError::TooLarge);
    }
    Ok(())
}

/* ------------------------------- builder -------------------------------- */

/// Build the aggregate tree and per-piece inclusion proofs.
///
/// `pieces` must be non-empty, at least 128 padded bytes each, and sorted by
/// non-increasing padded size; violations are rejected before hashing.
///
/// The root identifier spans the next power of two of the summed sizes and
/// carries no payload padding.
pub fn build_aggregate(pieces: &[PieceLink]) -> Result<Aggregate, AggregateError> {
    validate(pieces)?;

    // Sizes on the stack stay strictly decreasing bottom to top.
    let mut stack: Vec<StackFrame> = Vec::with_capacity(64);
    for p in pieces {
        stack.push(StackFrame::piece(p));
        reduce(&mut stack);
    }

    while stack.len() > 1 {
        let Some(smallest) = stack.pop() else { break };
        let filler = StackFrame::padding(smallest.size);
        stack.push(StackFrame::join(smallest, filler));
        reduce(&mut stack);
    }

    let root = stack.pop().ok_or(AggregateError::Empty)?;
    let proved = collect_proofs(&root, pieces)?;
    let link = PieceLink::from_padded_size(root.commitment, root.size, 0)?;
    Ok(Aggregate::new(link, proved))
}

/// Walk `root` left-first, matching piece leaves against `pieces` in order.
///
/// Uses an explicit stack (`O(depth)` live entries); `trail` holds the
/// sibling commitments from the root down to the frame being visited.
fn collect_proofs(
    root: &StackFrame,
    pieces: &[PieceLink],
) -> Result<Vec<AggregatePiece>, AggregateError> {
    struct Visit<'a> {
        frame: &'a StackFrame,
        offset: u64,
        depth: usize,
        sibling: Option<Commitment>,
    }

    let mut out = Vec::with_capacity(pieces.len());
    let mut trail: Vec<Commitment> = Vec::new();
    let mut st = vec![Visit {
        frame: root,
        offset: 0,
        depth: 0,
        sibling: None,
    }];

    while let Some(v) = st.pop() {
        trail.truncate(v.depth.saturating_sub(1));
        if let Some(s) = v.sibling {
            trail.push(s);
        }

        match &v.frame.kind {
            FrameKind::Node(left, right) => {
                // Right is pushed first so the left subtree is visited first.
                st.push(Visit {
                    frame: right,
                    offset: v.offset + left.size,
                    depth: v.depth + 1,
                    sibling: Some(left.commitment),
                });
                st.push(Visit {
                    frame: left,
                    offset: v.offset,
                    depth: v.depth + 1,
                    sibling: Some(right.commitment),
                });
            }
            FrameKind::Piece => {
                let index = out.len();
                match pieces.get(index) {
                    Some(p) if p.commitment() == &v.frame.commitment => {
                        out.push(AggregatePiece {
                            link: *p,
                            inclusion_proof: InclusionProof::new(
                                trail.iter().rev().copied().collect(),
                                v.offset / v.frame.size,
                            ),
                        });
                    }
                    _ => return Err(AggregateError::IncorrectTree { index }),
                }
            }
            FrameKind::Padding => {}
        }
    }

    if out.len() != pieces.len() {
        return Err(AggregateError::IncorrectTree { index: out.len() });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(fill: u8, padded_size: u64) -> PieceLink {
        PieceLink::from_padded_size([fill; 32], padded_size, 0).unwrap()
    }

    fn leaf(l: &PieceLink) -> StackFrame {
        StackFrame::piece(l)
    }

    #[test]
    fn single_piece_is_its_own_root() {
        let p = link(7, 1 << 20);
        let agg = build_aggregate(&[p]).unwrap();
        assert_eq!(agg.root, p);
        assert_eq!(agg.root.padding(), 0);
        assert_eq!(agg.pieces.len(), 1);
        assert!(agg.pieces[0].inclusion_proof.path.is_empty());
        assert_eq!(agg.pieces[0].inclusion_proof.index, 0);
        agg.verify().unwrap();
    }

    #[test]
    fn two_equal_pieces_combine_directly() {
        let a = link(1, 128);
        let b = link(2, 128);
        let agg = build_aggregate(&[a, b]).unwrap();
        assert_eq!(agg.root.padded_size(), 256);
        assert_eq!(agg.root.commitment(), &combine(a.commitment(), b.commitment()));
        assert_eq!(agg.pieces[0].inclusion_proof.path, vec![*b.commitment()]);
        assert_eq!(agg.pieces[1].inclusion_proof.index, 1);
    }

    #[test]
    fn mixed_sizes_use_level_index() {
        // 256 | 128 128 : the second 128 B piece sits at node index 3 of its level.
        let a = link(1, 256);
        let b = link(2, 128);
        let c = link(3, 128);
        let agg = build_aggregate(&[a, b, c]).unwrap();
        assert_eq!(agg.root.padded_size(), 512);
        let bc = combine(b.commitment(), c.commitment());
        assert_eq!(agg.root.commitment(), &combine(a.commitment(), &bc));
        assert_eq!(agg.pieces[0].inclusion_proof, InclusionProof::new(vec![bc], 0));
        assert_eq!(
            agg.pieces[2].inclusion_proof,
            InclusionProof::new(vec![*b.commitment(), *a.commitment()], 3)
        );
        agg.verify().unwrap();
    }

    #[test]
    fn leftover_frames_are_zero_padded() {
        // 256 + 128 = 384 -> padded to 512 with a 128 B zero subtree.
        let a = link(1, 256);
        let b = link(2, 128);
        let agg = build_aggregate(&[a, b]).unwrap();
        assert_eq!(agg.root.padded_size(), 512);
        let right = combine(b.commitment(), &zero_commitment(128));
        assert_eq!(agg.root.commitment(), &combine(a.commitment(), &right));
        assert_eq!(
            agg.pieces[1].inclusion_proof,
            InclusionProof::new(vec![zero_commitment(128), *a.commitment()], 2)
        );
        agg.verify().unwrap();
    }

    #[test]
    fn input_errors_reported_before_hashing() {
        assert_eq!(build_aggregate(&[]), Err(AggregateError::Empty));
        assert_eq!(
            build_aggregate(&[link(1, 128), link(2, 64)]),
            Err(AggregateError::PieceTooSmall { index: 1, size: 64 })
        );
        assert_eq!(
            build_aggregate(&[link(1, 128), link(2, 256)]),
            Err(AggregateError::Unsorted {
                index: 1,
                size: 256,
                prev: 128
            })
        );
        assert_eq!(
            build_aggregate(&[link(1, 1 << 63), link(2, 128)]),
            Err(AggregateError::TooLarge)
        );
    }

    #[test]
    fn link_errors_convert_and_compare() {
        let hex_err = hex::FromHexError::OddLength;
        assert_eq!(
            AggregateError::from(LinkError::Hex(hex_err.clone())),
            AggregateError::Link(LinkError::Hex(hex_err))
        );
        assert_ne!(
            AggregateError::from(LinkError::Height(59)),
            AggregateError::Link(LinkError::Height(60))
        );
    }

    #[test]
    fn mismatched_leaf_in_unbalanced_tree_is_incorrect() {
        // Hand-crafted tree ((a b) c) places the 256 B piece on the right,
        // while a sorted input expects it as the first leaf.
        let a = link(1, 128);
        let b = link(2, 128);
        let c = link(3, 256);
        let tree = StackFrame::join(StackFrame::join(leaf(&a), leaf(&b)), leaf(&c));
        assert_eq!(
            collect_proofs(&tree, &[c, a, b]).unwrap_err(),
            AggregateError::IncorrectTree { index: 0 }
        );
    }

    #[test]
    fn missing_or_extra_leaves_are_incorrect() {
        let a = link(1, 128);
        let b = link(2, 128);
        let tree = StackFrame::join(leaf(&a), leaf(&b));
        assert_eq!(
            collect_proofs(&tree, &[a]).unwrap_err(),
            AggregateError::IncorrectTree { index: 1 }
        );
        let tree = StackFrame::join(leaf(&a), StackFrame::padding(128));
        assert_eq!(
            collect_proofs(&tree, &[a, b]).unwrap_err(),
            AggregateError::IncorrectTree { index: 1 }
        );
    }
}
