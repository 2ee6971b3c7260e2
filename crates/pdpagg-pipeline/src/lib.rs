//! pdpagg-pipeline — the piece-aggregation pipeline.
//!
//! Pieces flow through three independent stages connected by queues:
//!
//! 1. [`PieceAggregator`] folds incoming pieces into the persisted workspace
//!    [`Buffer`] and emits an [`Aggregate`](pdpagg_core::Aggregate) whenever
//!    the [`BufferPolicy`] threshold is crossed.
//! 2. [`AggregateSubmitter`] registers each aggregate root (with its subroots)
//!    on a proof set through a [`ProofSetBackend`].
//! 3. [`PieceAccepter`] issues one signed [`Receipt`] per piece and stores it
//!    by the piece's invocation link.
//!
//! Every stage is synchronous and takes its collaborators ([`Store`],
//! [`Queue`], backend, attestor) by shared reference, so the same in-memory
//! or on-disk implementations can be wired into all three.
//!
//! ```
//! use pdpagg_core::{zero_commitment, Aggregate, PieceLink};
//! use pdpagg_pipeline::{
//!     Buffer, BufferPolicy, LinkMessage, MemoryQueue, MemoryStore, PieceAggregator,
//! };
//!
//! let workspace = MemoryStore::<Buffer>::new();
//! let aggregates = MemoryStore::<Aggregate>::new();
//! let submissions = MemoryQueue::<LinkMessage>::new();
//! let stage = PieceAggregator::new(&workspace, &aggregates, &submissions)
//!     .with_policy(BufferPolicy::new(256));
//!
//! let piece = PieceLink::from_padded_size(zero_commitment(128), 128, 0)?;
//! assert!(stage.aggregate_pieces(&[piece])?.is_empty());
//! let roots = stage.aggregate_pieces(&[piece])?;
//! assert_eq!(roots.len(), 1);
//! assert_eq!(submissions.drain().len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]

/// Piece Accepter stage.
pub mod accepter;
/// Piece Aggregator stage.
pub mod aggregator;
/// Proof-set backend seam and its provided implementations.
pub mod backend;
/// Workspace buffer and the accumulation policy.
pub mod buffer;
/// Pipeline configuration (TOML).
pub mod config;
/// Error taxonomy shared by all stages.
pub mod error;
/// Queue message shapes.
pub mod message;
/// Queue seam and the in-memory FIFO.
pub mod queue;
/// Acceptance receipts and their store.
pub mod receipt;
/// Key-value store seam plus memory and filesystem stores.
pub mod store;
/// Aggregate Submitter stage.
pub mod submitter;

pub use accepter::PieceAccepter;
pub use aggregator::{PieceAggregator, BUFFER_KEY};
pub use backend::{ProofSetBackend, RecordingBackend, RootAddition, SpoolBackend, SubrootEntry};
pub use buffer::{accumulate, accumulate_all, Buffer, BufferPolicy, MIN_AGGREGATE_SIZE};
pub use config::PipelineConfig;
pub use error::{Handled, PipelineError, Step};
pub use message::{LinkMessage, PieceMessage};
pub use queue::{MemoryQueue, Queue};
pub use receipt::{invocation_link, Receipt, ReceiptStore};
pub use store::{FsStore, MemoryStore, Store};
pub use submitter::{AggregateSubmitter, PENDING_KEY};
