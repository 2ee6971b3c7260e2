//! Workspace buffer and the greedy accumulation policy.
//!
//! Pieces smaller than the threshold are parked in a size-sorted [`Buffer`]
//! until their combined padded size reaches it; then the whole buffer becomes
//! one aggregate and the buffer starts over. A piece that alone exceeds the
//! threshold becomes a single-piece aggregate and never touches the buffer.
//! A piece below [`MIN_PIECE_SIZE`] is refused before the buffer changes.
//! The policy is order-sensitive: the same pieces in a different order can
//! produce different aggregates.

use pdpagg_core::{Aggregate, PieceLink, MIN_PIECE_SIZE};
use pdpagg_merkle::{build_aggregate, AggregateError};
use serde::{Deserialize, Serialize};

/// Default aggregation threshold: 128 MiB of padded piece data.
pub const MIN_AGGREGATE_SIZE: u64 = 128 << 20;

/// Pieces waiting for an aggregate, largest first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffer {
    total_size: u64,
    pieces: Vec<PieceLink>,
}

impl Buffer {
    /// An empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total_size: 0,
            pieces: Vec::new(),
        }
    }

    /// Sum of buffered padded sizes.
    #[inline]
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Buffered pieces, largest first.
    #[inline]
    #[must_use]
    pub fn pieces(&self) -> &[PieceLink] {
        &self.pieces
    }

    /// Number of buffered pieces.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// True if nothing is buffered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Insert keeping the list sorted largest-first; a piece lands after any
    /// already-buffered pieces of the same size.
    pub fn insert(&mut self, piece: PieceLink) {
        let size = piece.padded_size();
        let at = self.pieces.partition_point(|p| p.padded_size() >= size);
        self.pieces.insert(at, piece);
        self.total_size = self.total_size.saturating_add(size);
    }

    fn take(&mut self) -> Vec<PieceLink> {
        self.total_size = 0;
        std::mem::take(&mut self.pieces)
    }
}

/// When to turn buffered pieces into an aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferPolicy {
    /// Threshold in padded bytes.
    pub min_aggregate_size: u64,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self::new(MIN_AGGREGATE_SIZE)
    }
}

impl BufferPolicy {
    /// Policy with a custom threshold.
    #[must_use]
    pub const fn new(min_aggregate_size: u64) -> Self {
        Self { min_aggregate_size }
    }

    /// Fold one piece into `buffer`, possibly emitting an aggregate.
    ///
    /// Fails with [`AggregateError::PieceTooSmall`] for pieces under
    /// [`MIN_PIECE_SIZE`]; `buffer` is left as it was.
    pub fn accumulate(
        &self,
        mut buffer: Buffer,
        piece: PieceLink,
    ) -> Result<(Buffer, Option<Aggregate>), AggregateError> {
        let size = piece.padded_size();
        if size < MIN_PIECE_SIZE {
            return Err(AggregateError::PieceTooSmall { index: 0, size });
        }
        if size > self.min_aggregate_size {
            let aggregate = build_aggregate(&[piece])?;
            return Ok((buffer, Some(aggregate)));
        }

        buffer.insert(piece);
        if buffer.total_size() < self.min_aggregate_size {
            return Ok((buffer, None));
        }
        let aggregate = build_aggregate(&buffer.take())?;
        Ok((buffer, Some(aggregate)))
    }

    /// Fold `pieces` in order, collecting aggregates in emission order.
    pub fn accumulate_all(
        &self,
        buffer: Buffer,
        pieces: &[PieceLink],
    ) -> Result<(Buffer, Vec<Aggregate>), AggregateError> {
        let mut aggregates = Vec::new();
        let mut buffer = buffer;
        for &piece in pieces {
            let (next, emitted) = self.accumulate(buffer, piece)?;
            buffer = next;
            aggregates.extend(emitted);
        }
        Ok((buffer, aggregates))
    }
}

/// [`BufferPolicy::accumulate`] under the default threshold.
pub fn accumulate(
    buffer: Buffer,
    piece: PieceLink,
) -> Result<(Buffer, Option<Aggregate>), AggregateError> {
    BufferPolicy::default().accumulate(buffer, piece)
}

/// [`BufferPolicy::accumulate_all`] under the default threshold.
pub fn accumulate_all(
    buffer: Buffer,
    pieces: &[PieceLink],
) -> Result<(Buffer, Vec<Aggregate>), AggregateError> {
    BufferPolicy::default().accumulate_all(buffer, pieces)
}
