//! Callback machinery shared by both replicas.
//!
//! Materializers and hooks are application-supplied closures stored per
//! event kind. Everything is expressed uniformly as a boxed future so sync
//! and async application code look the same to the drain loops.

use crate::error::BoxError;
use crate::event::{CommitEvent, CommittedEvent};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Outcome of a materializer or hook invocation
pub type MaterializeResult = Result<(), BoxError>;

type EventFn<E> = Arc<dyn Fn(E) -> BoxFuture<MaterializeResult> + Send + Sync>;

/// Authoritative materializer on the server
pub type ServerMaterializer = EventFn<CommitEvent>;

/// Hook fired by the client after each optimistic apply
pub type CommitHook = EventFn<CommitEvent>;

/// Hook fired by the server after each materialization attempt
pub type CommittedHook = EventFn<CommittedEvent>;

/// Forward/inverse pair registered per event kind on the client
///
/// `rollback` must be the algebraic inverse of `apply` for the same payload;
/// the library guarantees the pairing, the application guarantees the
/// inversion.
#[derive(Clone)]
pub struct ClientMaterializer {
    pub(crate) apply: EventFn<CommitEvent>,
    pub(crate) rollback: EventFn<CommitEvent>,
}

/// Box a plain async closure into the stored callback shape
pub(crate) fn boxed<E, F, Fut>(f: F) -> EventFn<E>
where
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MaterializeResult> + Send + 'static,
{
    Arc::new(move |event| -> BoxFuture<MaterializeResult> { Box::pin(f(event)) })
}
