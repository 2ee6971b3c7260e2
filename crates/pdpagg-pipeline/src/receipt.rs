//! Acceptance receipts.
//!
//! A [`Receipt`] binds a piece to the aggregate it was folded into, the
//! inclusion proof tying the two together, and an issuer signature. It is
//! stored under the piece's *invocation link* ([`invocation_link`]), a
//! digest of the piece string, so anyone holding the piece can find its
//! receipt. A second index maps the invocation link to the receipt's own
//! content identifier ([`Receipt::root`]).

use anyhow::{bail, ensure, Context, Result};
use pdpagg_core::io::to_cbor;
use pdpagg_core::{AggregatePiece, InclusionProof, PieceLink};
use pdpagg_crypto::{digest_hex, signing_payload, verify_attestation, Attestor, Label};
use serde::{Deserialize, Serialize};

use crate::store::Store;

/// Identifier of the accept invocation for `piece`.
#[must_use]
pub fn invocation_link(piece: &PieceLink) -> String {
    digest_hex(Label::Invocation, &[piece.to_string().as_bytes()])
}

/// Signed statement that `piece` is included in `aggregate`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Issuer identifier (see [`Attestor::id`]).
    pub issuer: String,
    /// Invocation link of the piece.
    pub ran: String,
    /// Accepted piece.
    pub piece: PieceLink,
    /// Aggregate containing the piece.
    pub aggregate: PieceLink,
    /// Proof of `piece` under `aggregate`.
    pub inclusion_proof: InclusionProof,
    /// Issuer signature over [`Receipt::payload`].
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl Receipt {
    /// Issue a receipt for one piece of `aggregate`.
    #[must_use]
    pub fn issue(attestor: &dyn Attestor, aggregate: PieceLink, entry: &AggregatePiece) -> Self {
        let mut receipt = Self {
            issuer: attestor.id(),
            ran: invocation_link(&entry.link),
            piece: entry.link,
            aggregate,
            inclusion_proof: entry.inclusion_proof.clone(),
            signature: Vec::new(),
        };
        receipt.signature = attestor.sign(&receipt.payload());
        receipt
    }

    /// Canonical bytes the issuer signs.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        let proof = &self.inclusion_proof;
        let mut proof_bytes = Vec::with_capacity(8 + 32 * proof.path.len());
        proof_bytes.extend_from_slice(&proof.index.to_be_bytes());
        for node in &proof.path {
            proof_bytes.extend_from_slice(node);
        }
        signing_payload(&[
            self.issuer.as_bytes(),
            self.ran.as_bytes(),
            self.piece.to_string().as_bytes(),
            self.aggregate.to_string().as_bytes(),
            &proof_bytes,
        ])
    }

    /// Content identifier: labeled digest of the CBOR encoding.
    pub fn root(&self) -> Result<String> {
        let bytes = to_cbor(self)?;
        Ok(digest_hex(Label::ReceiptRoot, &[&bytes]))
    }

    /// Check the invocation link, the inclusion proof and the signature.
    pub fn verify(&self) -> Result<()> {
        ensure!(
            self.ran == invocation_link(&self.piece),
            "receipt ran {} does not belong to piece {}",
            self.ran,
            self.piece
        );
        ensure!(
            self.inclusion_proof
                .verify(self.piece.commitment(), self.aggregate.commitment()),
            "inclusion proof of {} does not reproduce aggregate {}",
            self.piece,
            self.aggregate
        );
        verify_attestation(&self.issuer, &self.payload(), &self.signature)
    }
}

/// Receipts keyed by invocation link, plus the invocation → receipt root index.
pub struct ReceiptStore<'a> {
    receipts: &'a dyn Store<Receipt>,
    index: &'a dyn Store<String>,
}

impl<'a> ReceiptStore<'a> {
    /// Wrap the two underlying stores.
    #[must_use]
    pub fn new(receipts: &'a dyn Store<Receipt>, index: &'a dyn Store<String>) -> Self {
        Self { receipts, index }
    }

    /// Store `receipt` and its index entry; returns the receipt root.
    pub fn put(&self, receipt: &Receipt) -> Result<String> {
        let root = receipt.root()?;
        self.receipts.put(&receipt.ran, receipt)?;
        self.index.put(&receipt.ran, &root)?;
        Ok(root)
    }

    /// Receipt stored under `ran`.
    pub fn get(&self, ran: &str) -> Result<Option<Receipt>> {
        self.receipts.get(ran)
    }

    /// Receipt root indexed under `ran`.
    pub fn root_of(&self, ran: &str) -> Result<Option<String>> {
        self.index.get(ran)
    }

    /// Receipt under `ran`, checked against the index and fully verified.
    pub fn get_verified(&self, ran: &str) -> Result<Option<Receipt>> {
        let Some(receipt) = self.get(ran)? else {
            return Ok(None);
        };
        let Some(indexed) = self.root_of(ran)? else {
            bail!("receipt for {ran} has no index entry");
        };
        let root = receipt.root()?;
        ensure!(root == indexed, "receipt for {ran} has root {root}, index says {indexed}");
        receipt.verify().with_context(|| format!("receipt for {ran}"))?;
        Ok(Some(receipt))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
