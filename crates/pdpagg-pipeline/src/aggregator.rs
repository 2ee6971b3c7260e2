use pdpagg_core::{Aggregate, PieceLink, MIN_PIECE_SIZE};
use tracing::{debug, info, warn};

use crate::buffer::{Buffer, BufferPolicy};
use crate::error::{Handled, PipelineError, Step};
use crate::message::{decode_all, LinkMessage, PieceMessage};
use crate::queue::Queue;
use crate::store::Store;

/// Workspace-store key of the buffer.
pub const BUFFER_KEY: &str = "buffer";

/// First stage: buffers pieces and emits aggregates for submission.
///
/// One aggregator may write a given workspace store at a time; concurrent
/// writers would race on [`BUFFER_KEY`].
pub struct PieceAggregator<'a> {
    workspace: &'a dyn Store<Buffer>,
    aggregates: &'a dyn Store<Aggregate>,
    submissions: &'a dyn Queue<LinkMessage>,
    policy: BufferPolicy,
    max_piece_size: Option<u64>,
}

impl<'a> PieceAggregator<'a> {
    /// Stage over the given collaborators with the default policy.
    #[must_use]
    pub fn new(
        workspace: &'a dyn Store<Buffer>,
        aggregates: &'a dyn Store<Aggregate>,
        submissions: &'a dyn Queue<LinkMessage>,
    ) -> Self {
        Self {
            workspace,
            aggregates,
            submissions,
            policy: BufferPolicy::default(),
            max_piece_size: None,
        }
    }

    /// Replace the accumulation policy.
    #[must_use]
    pub fn with_policy(mut self, policy: BufferPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reject pieces above `max` bytes at [`handle`](Self::handle) time.
    #[must_use]
    pub fn with_max_piece_size(mut self, max: Option<u64>) -> Self {
        self.max_piece_size = max;
        self
    }

    /// Decode and admit `messages`, then aggregate the admitted pieces.
    ///
    /// Undecodable, undersized or oversized pieces are rejected individually;
    /// the rest of the batch proceeds.
    pub fn handle(
        &self,
        messages: &[PieceMessage],
    ) -> Result<Handled<Vec<PieceLink>>, PipelineError> {
        let (pieces, mut rejected) = decode_all(messages, PieceMessage::decode);
        let mut admitted = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match self.admit(piece) {
                Ok(()) => admitted.push(piece),
                Err(e) => {
                    warn!(error = %e, "rejecting piece");
                    rejected.push(e);
                }
            }
        }
        let output = self.aggregate_pieces(&admitted)?;
        Ok(Handled { output, rejected })
    }

    fn admit(&self, piece: PieceLink) -> Result<(), PipelineError> {
        let size = piece.padded_size();
        if size < MIN_PIECE_SIZE {
            return Err(PipelineError::PieceTooSmall { piece, size });
        }
        match self.max_piece_size {
            Some(max) if size > max => Err(PipelineError::PieceTooLarge { piece, size, max }),
            _ => Ok(()),
        }
    }

    /// Fold `pieces` into the workspace buffer; persist and enqueue every
    /// aggregate that results. Returns the enqueued roots.
    ///
    /// The buffer is persisted before any aggregate is written, so a failure
    /// there leaves no trace and the batch can be redelivered as is. After
    /// that, aggregates are written and enqueued one by one; on failure the
    /// earlier ones stay written and enqueued.
    pub fn aggregate_pieces(&self, pieces: &[PieceLink]) -> Result<Vec<PieceLink>, PipelineError> {
        let buffer = self.load_buffer()?;
        let (buffer, aggregates) = self.policy.accumulate_all(buffer, pieces)?;

        self.workspace
            .put(BUFFER_KEY, &buffer)
            .map_err(PipelineError::io(Step::PersistBuffer, BUFFER_KEY))?;

        let mut roots = Vec::with_capacity(aggregates.len());
        for aggregate in &aggregates {
            let key = aggregate.root.to_string();
            self.aggregates
                .put(&key, aggregate)
                .map_err(PipelineError::io(Step::PersistAggregate, key.clone()))?;
            self.submissions
                .publish(&LinkMessage::new(&aggregate.root))
                .map_err(PipelineError::io(Step::Enqueue, key.clone()))?;
            debug!(root = %key, pieces = aggregate.len(), "aggregate enqueued");
            roots.push(aggregate.root);
        }

        info!(
            pieces = pieces.len(),
            aggregates = roots.len(),
            buffered = buffer.len(),
            buffered_size = buffer.total_size(),
            "aggregated pieces"
        );
        Ok(roots)
    }

    fn load_buffer(&self) -> Result<Buffer, PipelineError> {
        let stored = self
            .workspace
            .get(BUFFER_KEY)
            .map_err(PipelineError::io(Step::LoadBuffer, BUFFER_KEY))?;
        if let Some(buffer) = stored {
            return Ok(buffer);
        }
        debug!("initializing empty workspace buffer");
        let empty = Buffer::new();
        self.workspace
            .put(BUFFER_KEY, &empty)
            .map_err(PipelineError::io(Step::PersistBuffer, BUFFER_KEY))?;
        Ok(empty)
    }
}
