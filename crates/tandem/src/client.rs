use crate::error::{CommitError, ConfigError, ReceiveError};
use crate::event::{ClientId, CommitEvent, CommittedEvent};
use crate::materializer::{boxed, ClientMaterializer, CommitHook, MaterializeResult};
use crate::schema::{EventRegistry, PayloadSchema};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

/// Optimistic replica: applies on submit, reconciles on acknowledgement
///
/// Submitted events are validated, queued, and applied optimistically by a
/// single drain task spawned at construction; each applied event is stamped
/// with a freshly minted clientId and parked in the pending table until the
/// server adjudicates it. `receive` feeds an acknowledgement through the
/// same task, so materializer invocations stay strictly serialized.
#[derive(Debug)]
pub struct ClientReplica {
    registry: EventRegistry,
    queue: mpsc::UnboundedSender<ClientMessage>,
    pending: Arc<RwLock<HashMap<ClientId, CommitEvent>>>,
    sequence: i64,
}

enum ClientMessage {
    Commit(CommitEvent),
    Receive(CommittedEvent, oneshot::Sender<()>),
}

impl ClientReplica {
    pub fn builder() -> ClientReplicaBuilder {
        ClientReplicaBuilder::new()
    }

    /// Validate and enqueue an event for optimistic application
    ///
    /// Returns as soon as the event is queued; the optimistic apply, the
    /// pending insert, and the `on_commit` hook all run on the drain task.
    pub fn commit(&self, event: CommitEvent) -> Result<(), CommitError> {
        self.registry.validate(&event)?;
        self.queue
            .send(ClientMessage::Commit(event))
            .map_err(|_| CommitError::Closed)
    }

    /// Reconcile a server acknowledgement against the pending table
    ///
    /// Resolves once reconciliation, including any rollback, has been
    /// applied.
    pub async fn receive(&self, committed: CommittedEvent) -> Result<(), ReceiveError> {
        let (done, applied) = oneshot::channel();
        self.queue
            .send(ClientMessage::Receive(committed, done))
            .map_err(|_| ReceiveError::Closed)?;
        applied.await.map_err(|_| ReceiveError::Closed)
    }

    /// Held sequence, reserved for gap detection; not used for correctness
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Number of optimistically applied events awaiting adjudication
    pub async fn pending_len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn pending_contains(&self, client_id: &ClientId) -> bool {
        self.pending.read().await.contains_key(client_id)
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }
}

pub struct ClientReplicaBuilder {
    sequence: i64,
    events: Vec<(String, PayloadSchema)>,
    materializers: HashMap<String, ClientMaterializer>,
    on_commit: Option<CommitHook>,
}

impl ClientReplicaBuilder {
    fn new() -> Self {
        Self {
            sequence: 0,
            events: Vec::new(),
            materializers: HashMap::new(),
            on_commit: None,
        }
    }

    /// Initial sequence (defaults to 0)
    pub fn sequence(mut self, sequence: i64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Declare an event kind and its payload schema
    pub fn event(mut self, name: impl Into<String>, schema: impl Into<PayloadSchema>) -> Self {
        self.events.push((name.into(), schema.into()));
        self
    }

    /// Register the apply/rollback pair for an event kind
    ///
    /// Both halves are taken together: an apply without its inverse is not
    /// expressible.
    pub fn materializer<FA, FutA, FR, FutR>(
        mut self,
        name: impl Into<String>,
        apply: FA,
        rollback: FR,
    ) -> Self
    where
        FA: Fn(CommitEvent) -> FutA + Send + Sync + 'static,
        FutA: Future<Output = MaterializeResult> + Send + 'static,
        FR: Fn(CommitEvent) -> FutR + Send + Sync + 'static,
        FutR: Future<Output = MaterializeResult> + Send + 'static,
    {
        self.materializers.insert(
            name.into(),
            ClientMaterializer {
                apply: boxed(apply),
                rollback: boxed(rollback),
            },
        );
        self
    }

    /// Hook invoked once per optimistically applied event, after the apply
    /// succeeds and the event is in the pending table
    pub fn on_commit<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CommitEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MaterializeResult> + Send + 'static,
    {
        self.on_commit = Some(boxed(hook));
        self
    }

    /// Validate the configuration and spawn the drain task
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<ClientReplica, ConfigError> {
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
        let pending = Arc::new(RwLock::new(HashMap::new()));

        let drain = ClientDrain {
            materializers: self.materializers,
            on_commit: self.on_commit,
            pending: Arc::clone(&pending),
            queue: rx,
        };
        tokio::spawn(drain.run());

        Ok(ClientReplica {
            registry,
            queue: tx,
            pending,
            sequence: self.sequence,
        })
    }
}

/// The single long-running task that owns all materializer invocations
struct ClientDrain {
    materializers: HashMap<String, ClientMaterializer>,
    on_commit: Option<CommitHook>,
    pending: Arc<RwLock<HashMap<ClientId, CommitEvent>>>,
    queue: mpsc::UnboundedReceiver<ClientMessage>,
}

impl ClientDrain {
    async fn run(mut self) {
        while let Some(message) = self.queue.recv().await {
            match message {
                ClientMessage::Commit(event) => self.apply_optimistic(event).await,
                ClientMessage::Receive(committed, done) => {
                    self.reconcile(committed).await;
                    // receiver gone means the caller stopped waiting
                    let _ = done.send(());
                }
            }
        }
        debug!("client drain task stopped");
    }

    /// Mint, apply, park in pending, notify
    async fn apply_optimistic(&mut self, event: CommitEvent) {
        // build() guarantees a materializer for every declared kind
        let materializer = match self.materializers.get(&event.name) {
            Some(m) => m.clone(),
            None => {
                warn!("no materializer for event kind `{}`", event.name);
                return;
            }
        };

        let client_id = self.mint_client_id().await;
        let event = event.with_client_id(client_id.clone());

        if let Err(e) = (materializer.apply)(event.clone()).await {
            // a failed apply is never recorded in pending and on_commit
            // does not fire, so the server never hears about this event
            warn!("optimistic apply for `{}` failed: {}", event.name, e);
            return;
        }

        self.pending.write().await.insert(client_id, event.clone());

        if let Some(hook) = &self.on_commit {
            if let Err(e) = hook(event.clone()).await {
                warn!("on_commit hook failed for `{}`: {}", event.name, e);
            }
        }
    }

    /// Re-mint on collision with a live pending entry
    async fn mint_client_id(&self) -> ClientId {
        let pending = self.pending.read().await;
        loop {
            let id = ClientId::mint();
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }

    async fn reconcile(&mut self, committed: CommittedEvent) {
        let mut ours = None;
        if let Some(id) = &committed.client_id {
            if self.pending.read().await.contains_key(id) {
                ours = Some(id.clone());
            }
        }

        if let Some(client_id) = ours {
            if committed.error {
                // the server rejected an event we already applied: undo it
                self.run_rollback(committed).await;
            } else {
                // state already reflects the optimistic apply
                debug!("ack confirmed optimistic apply for {}", client_id);
            }
            self.pending.write().await.remove(&client_id);
        } else if committed.error {
            // a failure that is not ours to undo
            debug!("ignoring rejection for unknown event `{}`", committed.name);
        } else {
            // externally-originated success: apply blindly to stay convergent
            self.apply_foreign(committed).await;
        }
    }

    async fn run_rollback(&self, committed: CommittedEvent) {
        let Some(materializer) = self.materializers.get(&committed.name) else {
            warn!("no materializer to roll back event kind `{}`", committed.name);
            return;
        };

        let name = committed.name.clone();
        if let Err(e) = (materializer.rollback)(committed.into_commit()).await {
            // caller retires the pending entry regardless; rollback
            // totality is the application's contract
            warn!("rollback for `{}` failed: {}", name, e);
        }
    }

    async fn apply_foreign(&self, committed: CommittedEvent) {
        let Some(materializer) = self.materializers.get(&committed.name) else {
            warn!(
                "no materializer to apply foreign event kind `{}`",
                committed.name
            );
            return;
        };

        let name = committed.name.clone();
        debug!("applying foreign event `{}`", name);
        if let Err(e) = (materializer.apply)(committed.into_commit()).await {
            warn!("foreign apply for `{}` failed: {}", name, e);
        }
    }
}
