// crates/pdpagg-crypto/src/lib.rs

//! Attestation substrate for acceptance receipts.
//!
//! Two pieces live here:
//! - [`digest_labeled`]: a domain-separated BLAKE3 digest. Every input part is
//!   length-prefixed, and the [`Label`] selects the domain, so a receipt root
//!   can never collide with an invocation identifier.
//! - [`Attestor`]: the signing seam used by the accept stage, with an Ed25519
//!   implementation ([`Ed25519Attestor`]) and [`verify_attestation`] for
//!   checking a signature against an issuer identifier.

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

use anyhow::{anyhow, bail, Context, Result};
use blake3::Hasher;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Fixed domain prefix seeding every labeled digest.
const DIGEST_PREFIX: &[u8] = b"pdpagg.digest.v0";

/// Prefix of issuer identifiers produced by [`Ed25519Attestor`].
pub const ED25519_ISSUER_PREFIX: &str = "ed25519:";

/// Length of an Ed25519 signing seed in bytes.
pub const SEED_LEN: usize = 32;

/// Canonical digest labels.
/// Avoids stringly-typed mistakes in domain separation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Label {
    /// Accept-invocation identifier derived from a piece.
    Invocation,
    /// Content identifier of an encoded receipt.
    ReceiptRoot,
    /// Bytes an issuer signs for a receipt.
    ReceiptPayload,
    /// Name of a spooled root-addition request.
    SpoolRequest,
}

impl Label {
    /// Borrow the canonical string.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invocation => "pdpagg/piece/accept",
            Self::ReceiptRoot => "pdpagg/receipt/root",
            Self::ReceiptPayload => "pdpagg/receipt/payload",
            Self::SpoolRequest => "pdpagg/spool/request",
        }
    }
}

fn absorb(st: &mut Hasher, bytes: &[u8]) {
    st.update(&(bytes.len() as u64).to_le_bytes());
    st.update(bytes);
}

/// BLAKE3 over `parts` under `label`, each part length-prefixed.
#[must_use]
pub fn digest_labeled(label: Label, parts: &[&[u8]]) -> [u8; 32] {
    let mut st = Hasher::new();
    st.update(DIGEST_PREFIX);
    absorb(&mut st, label.as_str().as_bytes());
    for part in parts {
        absorb(&mut st, part);
    }
    *st.finalize().as_bytes()
}

/// [`digest_labeled`] rendered as lowercase hex.
#[must_use]
pub fn digest_hex(label: Label, parts: &[&[u8]]) -> String {
    hex::encode(digest_labeled(label, parts))
}

/// Canonical signing payload: the parts under [`Label::ReceiptPayload`],
/// length-prefixed in order.
#[must_use]
pub fn signing_payload(parts: &[&[u8]]) -> Vec<u8> {
    let label = Label::ReceiptPayload.as_str().as_bytes();
    let mut out = Vec::with_capacity(
        DIGEST_PREFIX.len() + 8 + label.len() + parts.iter().map(|p| 8 + p.len()).sum::<usize>(),
    );
    out.extend_from_slice(DIGEST_PREFIX);
    for part in std::iter::once(label).chain(parts.iter().copied()) {
        out.extend_from_slice(&(part.len() as u64).to_le_bytes());
        out.extend_from_slice(part);
    }
    out
}

/// Signs receipt payloads on behalf of one issuer.
///
/// Implementations must be deterministic: the same payload always yields the
/// same signature bytes, so re-issued receipts are byte-identical.
pub trait Attestor: Send + Sync {
    /// Stable issuer identifier embedded in receipts.
    fn id(&self) -> String;

    /// Sign `payload`.
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

/// Ed25519 attestor holding a signing key.
pub struct Ed25519Attestor {
    key: SigningKey,
}

impl Ed25519Attestor {
    /// Build from a 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; SEED_LEN]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Build from a seed given as 64 hex characters.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim()).context("signer seed is not hex")?;
        let seed: [u8; SEED_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("signer seed must be {SEED_LEN} bytes, got {}", bytes.len()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Public key bytes.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

impl std::fmt::Debug for Ed25519Attestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Attestor")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

impl Attestor for Ed25519Attestor {
    fn id(&self) -> String {
        format!("{ED25519_ISSUER_PREFIX}{}", hex::encode(self.public_key()))
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let sig: Signature = self.key.sign(payload);
        sig.to_bytes().to_vec()
    }
}

/// Check `signature` over `payload` against an issuer identifier of the form
/// `ed25519:<hex public key>`.
pub fn verify_attestation(issuer: &str, payload: &[u8], signature: &[u8]) -> Result<()> {
    let Some(key_hex) = issuer.strip_prefix(ED25519_ISSUER_PREFIX) else {
        bail!("unsupported issuer {issuer:?}");
    };
    let key_bytes: [u8; 32] = hex::decode(key_hex)
        .context("issuer key is not hex")?
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("issuer key must be 32 bytes"))?;
    let key = VerifyingKey::from_bytes(&key_bytes).context("invalid issuer key")?;
    let sig = Signature::from_slice(signature).context("malformed signature")?;
    key.verify(payload, &sig)
        .map_err(|e| anyhow!("signature check failed for {issuer}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_separate_domains() {
        let a = digest_labeled(Label::Invocation, &[b"piece"]);
        let b = digest_labeled(Label::ReceiptRoot, &[b"piece"]);
        assert_ne!(a, b);
        assert_eq!(a, digest_labeled(Label::Invocation, &[b"piece"]));
    }

    #[test]
    fn parts_are_length_prefixed() {
        // Same concatenation, different split.
        let a = digest_labeled(Label::Invocation, &[b"ab", b"c"]);
        let b = digest_labeled(Label::Invocation, &[b"a", b"bc"]);
        assert_ne!(a, b);
        assert_ne!(signing_payload(&[b"ab", b"c"]), signing_payload(&[b"a", b"bc"]));
    }

    #[test]
    fn sign_and_verify() {
        let att = Ed25519Attestor::from_seed(&[7u8; 32]);
        let payload = signing_payload(&[b"ran", b"piece"]);
        let sig = att.sign(&payload);
        assert_eq!(sig.len(), 64);
        assert!(verify_attestation(&att.id(), &payload, &sig).is_ok());
        assert!(verify_attestation(&att.id(), b"other", &sig).is_err());

        // Deterministic.
        assert_eq!(sig, att.sign(&payload));
    }

    #[test]
    fn wrong_issuer_fails() {
        let a = Ed25519Attestor::from_seed(&[1u8; 32]);
        let b = Ed25519Attestor::from_seed(&[2u8; 32]);
        let sig = a.sign(b"data");
        assert!(verify_attestation(&b.id(), b"data", &sig).is_err());
        assert!(verify_attestation("rsa:00", b"data", &sig).is_err());
    }

    #[test]
    fn seed_hex_parsing() {
        let hex_seed = "07".repeat(32);
        let att = Ed25519Attestor::from_seed_hex(&hex_seed).unwrap();
        assert_eq!(att.public_key(), Ed25519Attestor::from_seed(&[7u8; 32]).public_key());
        assert!(Ed25519Attestor::from_seed_hex("abcd").is_err());
        assert!(Ed25519Attestor::from_seed_hex("zz").is_err());
    }
}
