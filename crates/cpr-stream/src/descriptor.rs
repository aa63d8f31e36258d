//! Wire-level stand-in for a stream argument.
//!
//! Serialized as `{"Type":"null","Info":"<len>"}` for placeholders and
//! `{"Type":"push","Info":"<uuid>"}` for streams delivered out of band.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport tag of a [`StreamDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    /// Declares a length, carries no bytes.
    #[serde(rename = "null")]
    NoData,
    /// Bytes are pushed to `<push base>/<token>`.
    #[serde(rename = "push")]
    PushStream,
}

/// Immutable descriptor embedded in the RPC payload in place of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamDescriptor {
    #[serde(rename = "Type")]
    kind: StreamKind,
    #[serde(rename = "Info")]
    token: String,
}

impl StreamDescriptor {
    pub fn no_data(len: u64) -> Self {
        Self {
            kind: StreamKind::NoData,
            token: len.to_string(),
        }
    }

    pub fn push(id: Uuid) -> Self {
        Self {
            kind: StreamKind::PushStream,
            token: id.to_string(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Declared length of a `NoData` descriptor.
    pub fn declared_len(&self) -> Option<u64> {
        match self.kind {
            StreamKind::NoData => self.token.parse().ok(),
            StreamKind::PushStream => None,
        }
    }

    /// Stream identifier of a `PushStream` descriptor.
    pub fn stream_id(&self) -> Option<Uuid> {
        match self.kind {
            StreamKind::PushStream => Uuid::parse_str(&self.token).ok(),
            StreamKind::NoData => None,
        }
    }
}
