//! Stage errors.
//!
//! Failures split into two families:
//! - **retryable**: a store, queue or backend call failed; redelivering the
//!   same batch is safe because every write is content-keyed.
//! - **fatal**: the input itself is wrong (bad message, unsorted or undersized
//!   pieces, an aggregate that was never stored). Redelivery cannot help.

use pdpagg_core::PieceLink;
use pdpagg_merkle::AggregateError;
use std::fmt;
use thiserror::Error;

/// Stage step during which an I/O failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    /// Reading the workspace buffer.
    LoadBuffer,
    /// Writing the workspace buffer.
    PersistBuffer,
    /// Writing an aggregate under its root.
    PersistAggregate,
    /// Publishing to a downstream queue.
    Enqueue,
    /// Registering roots with the proof-set backend.
    SubmitRoots,
    /// Reading an aggregate by root.
    FetchAggregate,
    /// Writing a receipt or its index entry.
    PersistReceipt,
    /// Reading or writing the roots awaiting submission.
    PendingRoots,
}

impl Step {
    /// Short human-readable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoadBuffer => "load buffer",
            Self::PersistBuffer => "persist buffer",
            Self::PersistAggregate => "persist aggregate",
            Self::Enqueue => "enqueue",
            Self::SubmitRoots => "submit roots",
            Self::FetchAggregate => "fetch aggregate",
            Self::PersistReceipt => "persist receipt",
            Self::PendingRoots => "pending roots",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A store or queue call failed.
    #[error("{step} failed for `{key}`: {source:#}")]
    Io {
        /// What the stage was doing.
        step: Step,
        /// Store key or queue payload involved.
        key: String,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
    /// The builder rejected its input.
    #[error("cannot build aggregate: {0}")]
    Build(#[from] AggregateError),
    /// A root arrived on a queue but no aggregate is stored under it.
    #[error("no aggregate stored for root {0}")]
    MissingAggregate(PieceLink),
    /// The proof-set backend rejected a batch of root additions.
    #[error("adding {roots} roots to proof set {proof_set} failed: {source:#}")]
    Backend {
        /// Target proof set.
        proof_set: u64,
        /// Number of roots in the rejected batch.
        roots: usize,
        /// Backend failure.
        #[source]
        source: anyhow::Error,
    },
    /// A queue message could not be decoded.
    #[error("malformed message {message:?}: {source:#}")]
    Decode {
        /// Raw message content.
        message: String,
        /// Decode failure.
        #[source]
        source: anyhow::Error,
    },
    /// A piece is smaller than the minimum padded piece size.
    #[error("piece {piece} is {size} bytes, below the 128 byte minimum")]
    PieceTooSmall {
        /// Offending piece.
        piece: PieceLink,
        /// Its padded size.
        size: u64,
    },
    /// A piece exceeds the configured ingestion limit.
    #[error("piece {piece} is {size} bytes, above the {max} byte limit")]
    PieceTooLarge {
        /// Offending piece.
        piece: PieceLink,
        /// Its padded size.
        size: u64,
        /// Configured maximum.
        max: u64,
    },
}

impl PipelineError {
    /// Whether redelivering the same batch may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Backend { .. })
    }

    pub(crate) fn io(step: Step, key: impl Into<String>) -> impl FnOnce(anyhow::Error) -> Self {
        let key = key.into();
        move |source| Self::Io { step, key, source }
    }
}

/// Result of a message-level entry point: the stage output plus every
/// message that was rejected on its own.
#[derive(Debug)]
pub struct Handled<T> {
    /// Output for the messages that decoded.
    pub output: T,
    /// Per-message rejections (never retryable).
    pub rejected: Vec<PipelineError>,
}
