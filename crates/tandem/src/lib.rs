//! Optimistic event replication between a client replica and an
//! authoritative server replica of the same deterministic state machine.
//!
//! Applications declare a fixed set of event kinds with payload schemas and
//! register materializers per kind: an authoritative one on the
//! [`ServerReplica`], an apply/rollback pair on the [`ClientReplica`]. The
//! client applies optimistically on submit and parks each stamped event in a
//! pending table; the server serializes execution, assigns dense sequence
//! numbers to successes, and acknowledges every attempt. Feeding those
//! acknowledgements back through [`ClientReplica::receive`] confirms, rolls
//! back, or blind-applies as appropriate.
//!
//! Transport between the replicas is the application's problem: wire the
//! client's `on_commit` to [`ServerReplica::commit`] and the server's
//! `on_committed` to [`ClientReplica::receive`] over whatever carries the
//! serde-serializable [`CommitEvent`]/[`CommittedEvent`] shapes.

pub mod client;
pub mod error;
pub mod event;
pub mod materializer;
pub mod schema;
pub mod server;

pub use client::{ClientReplica, ClientReplicaBuilder};
pub use error::{BoxError, CommitError, ConfigError, ReceiveError, ValidationError};
pub use event::{ClientId, CommitEvent, CommittedEvent, REJECTED_SEQUENCE};
pub use materializer::{ClientMaterializer, MaterializeResult, ServerMaterializer};
pub use schema::{EventRegistry, ObjectSchema, PayloadSchema, SchemaViolation};
pub use server::{ServerReplica, ServerReplicaBuilder};
