//! pdpagg-core — piece links, commitment primitives, the aggregate data model,
//! and CBOR/JSON I/O.
//!
//! This crate defines the **stable boundary** used across pdpagg crates:
//! - [`PieceLink`], the content-derived identifier of a piece or aggregate,
//! - the commitment primitives ([`combine`], [`zero_commitment`]) every tree
//!   in the workspace is built from,
//! - [`Aggregate`] / [`InclusionProof`] with proof replay, and
//! - JSON/CBOR helpers (with `.jsonl` streaming) for stored and wire values.
//!
//! ```
//! use pdpagg_core::{combine, InclusionProof, PieceLink};
//!
//! let a = PieceLink::from_padded_size([1u8; 32], 128, 0)?;
//! let b = PieceLink::from_padded_size([2u8; 32], 128, 0)?;
//! let root = combine(a.commitment(), b.commitment());
//! let proof = InclusionProof::new(vec![*a.commitment()], 1);
//! assert!(proof.verify(b.commitment(), &root));
//! # Ok::<(), pdpagg_core::LinkError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Small, explicit allowlist to keep docs readable and APIs ergonomic.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]

/// Aggregate, aggregate piece and inclusion proof types.
pub mod aggregate;
/// Node combination and the zero-commitment table.
pub mod commitment;
/// JSON/CBOR helpers and auto-detecting read/write APIs.
pub mod io;
/// Streaming JSONL/NDJSON helpers for message files.
pub mod io_jsonl;
/// Piece identifiers.
pub mod types;

pub use aggregate::*;
pub use commitment::*;
pub use types::*;

/// Commonly-used items for quick imports.
///
/// ```rust
/// use pdpagg_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::aggregate::{Aggregate, AggregatePiece, InclusionProof};
    pub use crate::commitment::{combine, zero_commitment};
    pub use crate::types::{Commitment, PieceLink};
}
