//! Commitment primitives: node combination and the zero-commitment table.
//!
//! Internal nodes are `SHA-256(left || right)` with the two most significant
//! bits of byte 31 cleared, so every node fits a 254-bit field element as the
//! on-chain verifier stores it.

use crate::types::{Commitment, MIN_PIECE_SIZE};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Number of zero commitments kept: padded sizes 2^7 ..= 2^63 bytes.
pub const ZERO_TABLE_LEN: usize = 57;

/// `log2` of the smallest size covered by the zero table.
const ZERO_TABLE_SKIP: u32 = MIN_PIECE_SIZE.trailing_zeros();

/// Clear the top two bits of the last byte.
#[inline]
#[must_use]
pub fn truncate(mut node: Commitment) -> Commitment {
    node[31] &= 0b0011_1111;
    node
}

/// Combine two sibling nodes into their parent.
#[inline]
#[must_use]
pub fn combine(left: &Commitment, right: &Commitment) -> Commitment {
    let mut h = Sha256::new();
    h.update(left);
    h.update(right);
    truncate(h.finalize().into())
}

fn zero_table() -> &'static [Commitment; ZERO_TABLE_LEN] {
    static TABLE: OnceLock<[Commitment; ZERO_TABLE_LEN]> = OnceLock::new();
    TABLE.get_or_init(|| {
        // 32 B leaf -> 64 B -> 128 B, the first tabled size.
        let mut node = [0u8; 32];
        for _ in 0..(ZERO_TABLE_SKIP - 5) {
            node = combine(&node, &node);
        }
        let mut table = [[0u8; 32]; ZERO_TABLE_LEN];
        for slot in &mut table {
            *slot = node;
            node = combine(&node, &node);
        }
        table
    })
}

/// Commitment of an all-zero subtree of `size` padded bytes.
///
/// `size` must be a power of two and at least 128; this is not checked in
/// release builds.
#[inline]
#[must_use]
pub fn zero_commitment(size: u64) -> Commitment {
    debug_assert!(
        size.is_power_of_two() && size >= MIN_PIECE_SIZE,
        "zero_commitment: invalid size {size}"
    );
    zero_table()[(size.trailing_zeros() - ZERO_TABLE_SKIP) as usize]
}
