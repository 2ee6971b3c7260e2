use pdpagg_core::{Aggregate, PieceLink};
use pdpagg_crypto::Attestor;
use tracing::{debug, info};

use crate::error::{Handled, PipelineError, Step};
use crate::message::{decode_all, LinkMessage};
use crate::receipt::{Receipt, ReceiptStore};
use crate::store::{fetch_aggregate, Store};

/// Final stage: issues and stores one receipt per piece of each aggregate.
pub struct PieceAccepter<'a> {
    aggregates: &'a dyn Store<Aggregate>,
    receipts: ReceiptStore<'a>,
    attestor: &'a dyn Attestor,
}

impl<'a> PieceAccepter<'a> {
    /// Stage issuing receipts signed by `attestor` into `receipts`.
    #[must_use]
    pub fn new(
        aggregates: &'a dyn Store<Aggregate>,
        receipts: ReceiptStore<'a>,
        attestor: &'a dyn Attestor,
    ) -> Self {
        Self {
            aggregates,
            receipts,
            attestor,
        }
    }

    /// Decode `messages` and accept the decodable roots.
    pub fn handle(&self, messages: &[LinkMessage]) -> Result<Handled<Vec<Receipt>>, PipelineError> {
        let (roots, rejected) = decode_all(messages, LinkMessage::decode);
        let output = self.accept_pieces(&roots)?;
        Ok(Handled { output, rejected })
    }

    /// Issue receipts for every piece of every aggregate in `roots`.
    ///
    /// Receipts are deterministic, so redelivery rewrites identical values.
    /// The first storage failure aborts; receipts stored before it remain.
    pub fn accept_pieces(&self, roots: &[PieceLink]) -> Result<Vec<Receipt>, PipelineError> {
        let mut issued = Vec::new();
        for root in roots {
            let aggregate = fetch_aggregate(self.aggregates, root)?;
            for entry in &aggregate.pieces {
                let receipt = Receipt::issue(self.attestor, aggregate.root, entry);
                self.receipts
                    .put(&receipt)
                    .map_err(PipelineError::io(Step::PersistReceipt, receipt.ran.clone()))?;
                debug!(piece = %receipt.piece, ran = %receipt.ran, "receipt stored");
                issued.push(receipt);
            }
            info!(root = %root, pieces = aggregate.len(), "accepted aggregate");
        }
        Ok(issued)
    }
}
