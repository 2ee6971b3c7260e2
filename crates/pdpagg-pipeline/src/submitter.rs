use pdpagg_core::{Aggregate, PieceLink};
use tracing::{debug, info, warn};

use crate::backend::{ProofSetBackend, RootAddition};
use crate::error::{Handled, PipelineError, Step};
use crate::message::{decode_all, LinkMessage};
use crate::queue::Queue;
use crate::store::{fetch_aggregate, Store};

/// Pending-store key of the roots awaiting a successful submission.
pub const PENDING_KEY: &str = "pending";

/// Second stage: registers aggregate roots on the proof set, then hands them
/// to the accept stage.
pub struct AggregateSubmitter<'a> {
    aggregates: &'a dyn Store<Aggregate>,
    backend: &'a dyn ProofSetBackend,
    acceptance: &'a dyn Queue<LinkMessage>,
    proof_set: u64,
}

impl<'a> AggregateSubmitter<'a> {
    /// Stage submitting to `proof_set` through `backend`.
    #[must_use]
    pub fn new(
        aggregates: &'a dyn Store<Aggregate>,
        backend: &'a dyn ProofSetBackend,
        acceptance: &'a dyn Queue<LinkMessage>,
        proof_set: u64,
    ) -> Self {
        Self {
            aggregates,
            backend,
            acceptance,
            proof_set,
        }
    }

    /// Decode `messages` and submit the decodable roots.
    pub fn handle(&self, messages: &[LinkMessage]) -> Result<Handled<()>, PipelineError> {
        let (roots, rejected) = decode_all(messages, LinkMessage::decode);
        self.submit_aggregates(&roots)?;
        Ok(Handled {
            output: (),
            rejected,
        })
    }

    /// Submit every aggregate in one backend request; enqueue the roots for
    /// acceptance only once the backend has accepted the whole batch.
    pub fn submit_aggregates(&self, roots: &[PieceLink]) -> Result<(), PipelineError> {
        if roots.is_empty() {
            return Ok(());
        }

        let additions = roots
            .iter()
            .map(|root| fetch_aggregate(self.aggregates, root).map(|a| RootAddition::from_aggregate(&a)))
            .collect::<Result<Vec<_>, _>>()?;

        if let Err(source) = self.backend.add_roots(self.proof_set, &additions) {
            warn!(proof_set = self.proof_set, roots = roots.len(), error = %source, "root submission failed");
            return Err(PipelineError::Backend {
                proof_set: self.proof_set,
                roots: roots.len(),
                source,
            });
        }

        for root in roots {
            self.acceptance
                .publish(&LinkMessage::new(root))
                .map_err(PipelineError::io(Step::Enqueue, root.to_string()))?;
        }
        info!(proof_set = self.proof_set, roots = roots.len(), "submitted aggregates");
        Ok(())
    }

    /// Add `fresh` to the persisted pending roots, then submit all of them.
    ///
    /// The pending set is cleared only after the backend accepted it, so
    /// roots of a failed call are submitted again on the next invocation.
    /// Returns the roots that were submitted.
    pub fn submit_pending(
        &self,
        pending: &dyn Store<Vec<PieceLink>>,
        fresh: &[PieceLink],
    ) -> Result<Vec<PieceLink>, PipelineError> {
        let mut roots = pending
            .get(PENDING_KEY)
            .map_err(PipelineError::io(Step::PendingRoots, PENDING_KEY))?
            .unwrap_or_default();
        let carried = roots.len();
        for root in fresh {
            if !roots.contains(root) {
                roots.push(*root);
            }
        }
        if roots.len() > carried {
            pending
                .put(PENDING_KEY, &roots)
                .map_err(PipelineError::io(Step::PendingRoots, PENDING_KEY))?;
        }
        if carried > 0 {
            debug!(carried, "retrying pending roots");
        }

        self.submit_aggregates(&roots)?;
        if !roots.is_empty() {
            pending
                .put(PENDING_KEY, &Vec::new())
                .map_err(PipelineError::io(Step::PendingRoots, PENDING_KEY))?;
        }
        Ok(roots)
    }
}
