//! Queue payloads. Both carry a piece link in its string form.

use anyhow::Context;
use pdpagg_core::PieceLink;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Inbound piece awaiting aggregation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceMessage {
    /// Piece link string.
    pub piece: String,
}

/// Aggregate root handed from one stage to the next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMessage {
    /// Aggregate link string.
    pub link: String,
}

fn decode_link(raw: &str) -> Result<PieceLink, PipelineError> {
    raw.parse::<PieceLink>()
        .context("invalid piece link")
        .map_err(|source| PipelineError::Decode {
            message: raw.to_owned(),
            source,
        })
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, PipelineError> {
    serde_json::from_str(raw)
        .context("invalid message JSON")
        .map_err(|source| PipelineError::Decode {
            message: raw.to_owned(),
            source,
        })
}

impl PieceMessage {
    /// Message for `piece`.
    #[must_use]
    pub fn new(piece: &PieceLink) -> Self {
        Self {
            piece: piece.to_string(),
        }
    }

    /// Parse a JSON message body.
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        from_json(raw)
    }

    /// The carried piece link.
    pub fn decode(&self) -> Result<PieceLink, PipelineError> {
        decode_link(&self.piece)
    }
}

impl LinkMessage {
    /// Message for `link`.
    #[must_use]
    pub fn new(link: &PieceLink) -> Self {
        Self {
            link: link.to_string(),
        }
    }

    /// Parse a JSON message body.
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        from_json(raw)
    }

    /// The carried link.
    pub fn decode(&self) -> Result<PieceLink, PipelineError> {
        decode_link(&self.link)
    }
}

/// Decode every message, splitting good links from per-message rejections.
pub(crate) fn decode_all<M>(
    messages: &[M],
    decode: impl Fn(&M) -> Result<PieceLink, PipelineError>,
) -> (Vec<PieceLink>, Vec<PipelineError>) {
    let mut links = Vec::with_capacity(messages.len());
    let mut rejected = Vec::new();
    for m in messages {
        match decode(m) {
            Ok(link) => links.push(link),
            Err(e) => {
                tracing::warn!(error = %e, "rejecting message");
                rejected.push(e);
            }
        }
    }
    (links, rejected)
}
