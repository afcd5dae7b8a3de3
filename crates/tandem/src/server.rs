use crate::error::{CommitError, ConfigError};
use crate::event::{CommitEvent, CommittedEvent};
use crate::materializer::{boxed, CommittedHook, MaterializeResult, ServerMaterializer};
use crate::schema::{EventRegistry, PayloadSchema};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Authoritative replica: serial execution, sequence assignment
///
/// Submitted events are validated, queued, and materialized one at a time by
/// a single drain task spawned at construction. Successful materializations
/// consume the next sequence slot; failures are acknowledged with the
/// rejection sentinel and consume no slot. The `on_committed` hook sees
/// exactly one acknowledgement per dequeued event, in enqueue order.
#[derive(Debug)]
pub struct ServerReplica {
    registry: EventRegistry,
    queue: mpsc::UnboundedSender<CommitEvent>,
    sequence: Arc<AtomicI64>,
}

impl ServerReplica {
    pub fn builder() -> ServerReplicaBuilder {
        ServerReplicaBuilder::new()
    }

    /// Validate and enqueue an event for authoritative materialization
    ///
    /// Returns as soon as the event is queued; never waits for the
    /// materializer or the `on_committed` hook.
    pub fn commit(&self, event: CommitEvent) -> Result<(), CommitError> {
        self.registry.validate(&event)?;
        self.queue.send(event).map_err(|_| CommitError::Closed)
    }

    /// Next sequence slot to be assigned
    pub fn sequence(&self) -> i64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }
}

pub struct ServerReplicaBuilder {
    sequence: i64,
    events: Vec<(String, PayloadSchema)>,
    materializers: HashMap<String, ServerMaterializer>,
    on_committed: Option<CommittedHook>,
}

impl ServerReplicaBuilder {
    fn new() -> Self {
        Self {
            sequence: 0,
            events: Vec::new(),
            materializers: HashMap::new(),
            on_committed: None,
        }
    }

    /// Initial sequence slot (defaults to 0)
    pub fn sequence(mut self, sequence: i64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Declare an event kind and its payload schema
    pub fn event(mut self, name: impl Into<String>, schema: impl Into<PayloadSchema>) -> Self {
        self.events.push((name.into(), schema.into()));
        self
    }

    /// Register the authoritative materializer for an event kind
    pub fn materializer<F, Fut>(mut self, name: impl Into<String>, materializer: F) -> Self
    where
        F: Fn(CommitEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MaterializeResult> + Send + 'static,
    {
        self.materializers.insert(name.into(), boxed(materializer));
        self
    }

    /// Hook invoked once per dequeued event, after materialization
    pub fn on_committed<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CommittedEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MaterializeResult> + Send + 'static,
    {
        self.on_committed = Some(boxed(hook));
        self
    }

    /// Validate the configuration and spawn the drain task
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<ServerReplica, ConfigError> {
        let mut registry = EventRegistry::new();
        for (name, schema) in self.events {
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if registry.contains(&name) {
                return Err(ConfigError::DuplicateKind(name));
            }
            registry.insert(name, schema);
        }

        for name in self.materializers.keys() {
            if !registry.contains(name) {
                return Err(ConfigError::UndeclaredKind(name.clone()));
            }
        }
        for (name, _) in registry.iter() {
            if !self.materializers.contains_key(name) {
                return Err(ConfigError::MissingMaterializer(name.clone()));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let sequence = Arc::new(AtomicI64::new(self.sequence));

        let drain = ServerDrain {
            materializers: self.materializers,
            on_committed: self.on_committed,
            sequence: Arc::clone(&sequence),
            queue: rx,
        };
        tokio::spawn(drain.run());

        Ok(ServerReplica {
            registry,
            queue: tx,
            sequence,
        })
    }
}

/// The single long-running task that owns all materializer invocations
struct ServerDrain {
    materializers: HashMap<String, ServerMaterializer>,
    on_committed: Option<CommittedHook>,
    sequence: Arc<AtomicI64>,
    queue: mpsc::UnboundedReceiver<CommitEvent>,
}

impl ServerDrain {
    async fn run(mut self) {
        while let Some(event) = self.queue.recv().await {
            self.step(event).await;
        }
        debug!("server drain task stopped");
    }

    async fn step(&mut self, event: CommitEvent) {
        // build() guarantees a materializer for every declared kind
        let materializer = match self.materializers.get(&event.name) {
            Some(m) => Arc::clone(m),
            None => {
                warn!("no materializer for event kind `{}`", event.name);
                return;
            }
        };

        match materializer(event.clone()).await {
            Ok(()) => {
                let sequence = self.sequence.load(Ordering::Relaxed);
                debug!("materialized `{}` at sequence {}", event.name, sequence);
                self.acknowledge(CommittedEvent::success(event, sequence)).await;
                // sequence advances even when the hook fails
                self.sequence.store(sequence + 1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("materializer for `{}` failed: {}", event.name, e);
                self.acknowledge(CommittedEvent::rejection(event)).await;
            }
        }
    }

    async fn acknowledge(&self, committed: CommittedEvent) {
        if let Some(hook) = &self.on_committed {
            let name = committed.name.clone();
            if let Err(e) = hook(committed).await {
                warn!("on_committed hook failed for `{}`: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ClientId;
    use serde_json::json;
    use std::sync::Mutex;

    /// Counter server: `increment`/`decrement` over a shared i64, decrement
    /// rejects when the counter would go negative. Acks are captured on a
    /// channel so tests can await them deterministically.
    fn counter_server(
        initial_sequence: i64,
    ) -> (
        ServerReplica,
        Arc<Mutex<i64>>,
        mpsc::UnboundedReceiver<CommittedEvent>,
    ) {
        let counter = Arc::new(Mutex::new(0i64));
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();

        let inc = Arc::clone(&counter);
        let dec = Arc::clone(&counter);
        let server = ServerReplica::builder()
            .sequence(initial_sequence)
            .event("increment", PayloadSchema::Number)
            .event("decrement", PayloadSchema::Number)
            .materializer("increment", move |event: CommitEvent| {
                let counter = Arc::clone(&inc);
                async move {
                    *counter.lock().unwrap() += event.payload.as_i64().unwrap();
                    Ok(())
                }
            })
            .materializer("decrement", move |event: CommitEvent| {
                let counter = Arc::clone(&dec);
                async move {
                    let mut counter = counter.lock().unwrap();
                    let amount = event.payload.as_i64().unwrap();
                    if *counter - amount < 0 {
                        return Err(format!("counter would go negative: {}", *counter - amount).into());
                    }
                    *counter -= amount;
                    Ok(())
                }
            })
            .on_committed(move |committed: CommittedEvent| {
                let acks = acks_tx.clone();
                async move {
                    acks.send(committed).map_err(|e| e.to_string())?;
                    Ok(())
                }
            })
            .build()
            .unwrap();

        (server, counter, acks_rx)
    }

    #[tokio::test]
    async fn test_successful_commits_assign_dense_sequences() {
        let (server, counter, mut acks) = counter_server(0);

        for amount in [5, 3, 2] {
            server.commit(CommitEvent::new("increment", json!(amount))).unwrap();
        }

        for expected in 0..3 {
            let ack = acks.recv().await.unwrap();
            assert_eq!(ack.sequence, expected);
            assert!(!ack.error);
        }
        assert_eq!(*counter.lock().unwrap(), 10);
        assert_eq!(server.sequence(), 3);
    }

    #[tokio::test]
    async fn test_initial_sequence_offsets_assignment() {
        let (server, _counter, mut acks) = counter_server(40);

        server.commit(CommitEvent::new("increment", json!(1))).unwrap();
        let ack = acks.recv().await.unwrap();
        assert_eq!(ack.sequence, 40);
        assert_eq!(server.sequence(), 41);
    }

    #[tokio::test]
    async fn test_rejection_carries_sentinel_and_consumes_no_slot() {
        let (server, counter, mut acks) = counter_server(0);

        server.commit(CommitEvent::new("increment", json!(3))).unwrap();
        server.commit(CommitEvent::new("decrement", json!(10))).unwrap();
        server.commit(CommitEvent::new("increment", json!(2))).unwrap();

        let first = acks.recv().await.unwrap();
        assert_eq!(first.sequence, 0);

        let rejected = acks.recv().await.unwrap();
        assert_eq!(rejected.sequence, crate::event::REJECTED_SEQUENCE);
        assert!(rejected.error);
        assert_eq!(rejected.name, "decrement");
        assert_eq!(rejected.payload, json!(10));

        // the failure consumed no sequence slot
        let third = acks.recv().await.unwrap();
        assert_eq!(third.sequence, 1);

        assert_eq!(*counter.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_client_id_echoed_verbatim() {
        let (server, _counter, mut acks) = counter_server(0);

        let event = CommitEvent {
            name: "increment".to_string(),
            payload: json!(1),
            client_id: Some(ClientId::from("ab12z")),
        };
        server.commit(event).unwrap();

        let ack = acks.recv().await.unwrap();
        assert_eq!(ack.client_id, Some(ClientId::from("ab12z")));
    }

    #[tokio::test]
    async fn test_validation_failure_is_synchronous_and_skips_queue() {
        let (server, counter, mut acks) = counter_server(0);

        assert!(server.commit(CommitEvent::new("reset", json!(0))).is_err());
        assert!(server
            .commit(CommitEvent::new("increment", json!("five")))
            .is_err());

        // a valid commit still lands at sequence 0: nothing was enqueued above
        server.commit(CommitEvent::new("increment", json!(1))).unwrap();
        let ack = acks.recv().await.unwrap();
        assert_eq!(ack.sequence, 0);
        assert_eq!(*counter.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hook_error_does_not_stall_the_drain() {
        let (acks_tx, mut acks_rx) = mpsc::unbounded_channel();
        let server = ServerReplica::builder()
            .event("noop", PayloadSchema::Null)
            .materializer("noop", |_| async { Ok(()) })
            .on_committed(move |committed: CommittedEvent| {
                let acks = acks_tx.clone();
                async move {
                    acks.send(committed.sequence).map_err(|e| e.to_string())?;
                    Err("hook exploded".into())
                }
            })
            .build()
            .unwrap();

        server.commit(CommitEvent::new("noop", json!(null))).unwrap();
        server.commit(CommitEvent::new("noop", json!(null))).unwrap();

        // both commits acknowledged, sequence advanced past the hook failure
        assert_eq!(acks_rx.recv().await.unwrap(), 0);
        assert_eq!(acks_rx.recv().await.unwrap(), 1);
        assert_eq!(server.sequence(), 2);
    }

    #[tokio::test]
    async fn test_build_rejects_uncovered_event_kind() {
        let err = ServerReplica::builder()
            .event("increment", PayloadSchema::Number)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingMaterializer("increment".to_string()));
    }

    #[tokio::test]
    async fn test_build_rejects_undeclared_materializer() {
        let err = ServerReplica::builder()
            .materializer("increment", |_| async { Ok(()) })
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::UndeclaredKind("increment".to_string()));
    }

    #[tokio::test]
    async fn test_build_rejects_duplicate_and_empty_names() {
        let err = ServerReplica::builder()
            .event("increment", PayloadSchema::Number)
            .event("increment", PayloadSchema::Number)
            .materializer("increment", |_| async { Ok(()) })
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateKind("increment".to_string()));

        let err = ServerReplica::builder()
            .event("", PayloadSchema::Number)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::EmptyName);
    }
}
