use crate::schema::SchemaViolation;
use thiserror::Error;

/// Application-level error flowing out of materializers and hooks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Synchronous rejection of a submitted event
///
/// The only error kind that surfaces to a `commit` caller; a rejected event
/// never enters any queue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
    #[error("payload for `{kind}` does not conform to its schema: {violation}")]
    Payload {
        kind: String,
        #[source]
        violation: SchemaViolation,
    },
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The replica's drain task is gone, nothing will process the event
    #[error("replica has shut down")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("replica has shut down")]
    Closed,
}

/// Construction-time misconfiguration, reported by the replica builders
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("event kind name must not be empty")]
    EmptyName,
    #[error("duplicate event kind `{0}`")]
    DuplicateKind(String),
    #[error("event kind `{0}` has no materializer")]
    MissingMaterializer(String),
    #[error("materializer registered for undeclared event kind `{0}`")]
    UndeclaredKind(String),
}
