use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Sequence value carried by rejected acknowledgements.
pub const REJECTED_SEQUENCE: i64 = -1;

/// Opaque correlation identifier minted by the client replica
///
/// Five characters drawn uniformly from the lowercase alphanumeric alphabet.
/// The server never interprets a clientId; it echoes back whatever arrived
/// with the commit, which is what lets the client match acknowledgements
/// against its pending table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub const LEN: usize = 5;

    const ALPHABET: &'static [u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

    /// Mint a fresh identifier
    pub fn mint() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..Self::LEN)
            .map(|_| Self::ALPHABET[rng.gen_range(0..Self::ALPHABET.len())] as char)
            .collect();
        ClientId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        ClientId(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        ClientId(s.to_string())
    }
}

/// An event submitted to a replica for materialization
///
/// `client_id` is absent when the application first submits; on the client
/// path it is populated by the drain task before `on_commit` fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEvent {
    pub name: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

impl CommitEvent {
    pub fn new(name: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            client_id: None,
        }
    }

    /// Stamp (or replace) the correlation id
    pub(crate) fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }
}

/// A server acknowledgement for a single commit
///
/// On success `sequence` is the authoritative slot and `error` is false. On
/// failure `sequence` is [`REJECTED_SEQUENCE`] and `error` is true; name,
/// payload and clientId are preserved verbatim from the commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedEvent {
    pub name: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub sequence: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub error: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl CommittedEvent {
    /// Successful acknowledgement at the given sequence slot
    pub fn success(event: CommitEvent, sequence: i64) -> Self {
        Self {
            name: event.name,
            payload: event.payload,
            client_id: event.client_id,
            sequence,
            error: false,
        }
    }

    /// Rejected acknowledgement, sequence pinned to the sentinel
    pub fn rejection(event: CommitEvent) -> Self {
        Self {
            name: event.name,
            payload: event.payload,
            client_id: event.client_id,
            sequence: REJECTED_SEQUENCE,
            error: true,
        }
    }

    /// Strip the acknowledgement fields back down to a commit
    ///
    /// Used when an acknowledgement has to be fed through a materializer,
    /// which only ever sees commit-shaped events.
    pub fn into_commit(self) -> CommitEvent {
        CommitEvent {
            name: self.name,
            payload: self.payload,
            client_id: self.client_id,
        }
    }
}
