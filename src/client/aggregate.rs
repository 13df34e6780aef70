use super::backend::{PrimitiveBackend, build_sessions};
use super::fsm::AggregateState;
use crate::config::PrimitiveConfig;
use crate::core::{
    ConnectionState, PartitionId, PrimitiveName, PrimitiveOperation, PrimitiveType, ProxyError,
    Result,
};
use crate::routing::{HashRouter, PartitionRouter};
use crate::session::{
    ListenerId, ListenerRegistry, PrimitiveEvent, ProxySession, StateChangeListener,
};
use futures::{FutureExt, StreamExt};
use futures::future::{BoxFuture, try_join_all};
use futures::stream::FuturesUnordered;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{Instrument, Level, event, info_span};

const EVENT_BUFFER: usize = 1024;

enum AggregateMessage {
    PartitionChanged(PartitionId, ConnectionState),
    Sync(oneshot::Sender<ConnectionState>),
}

/// Task owning the aggregate state machine.
///
/// Partition reports arrive over a channel, so transitions are applied one
/// at a time and listeners observe them in order.
struct AggregateStateTask {
    name: PrimitiveName,
    fsm: AggregateState,
    listeners: Arc<ListenerRegistry<ConnectionState>>,
    current: watch::Sender<ConnectionState>,
    inbox: mpsc::UnboundedReceiver<AggregateMessage>,
}

impl AggregateStateTask {
    async fn run(mut self) {
        while let Some(message) = self.inbox.recv().await {
            match message {
                AggregateMessage::PartitionChanged(partition, state) => {
                    if let Some(next) = self.fsm.on_partition_change(partition, state) {
                        event!(
                            Level::INFO,
                            primitive = %self.name,
                            partition = %partition,
                            state = %next,
                            "primitive state changed"
                        );
                        let _ = self.current.send(next);
                        self.listeners.notify(&next);
                    }
                }
                AggregateMessage::Sync(reply) => {
                    let _ = reply.send(self.fsm.state());
                }
            }
        }
    }
}

/// One logical primitive spread over N partition sessions.
///
/// Fans lifecycle calls out to every partition, routes single operations by
/// key and folds partition connection states into one.
pub struct AggregateClient {
    config: PrimitiveConfig,
    sessions: BTreeMap<PartitionId, Arc<dyn ProxySession>>,
    router: Arc<dyn PartitionRouter>,
    listeners: Arc<ListenerRegistry<ConnectionState>>,
    inbox: mpsc::UnboundedSender<AggregateMessage>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<PrimitiveEvent>,
}

impl AggregateClient {
    /// Builds sessions for every configured partition from `backend`, in the
    /// configured execution mode, routing keys with [`HashRouter`].
    ///
    /// Sessions are not connected yet; call [`AggregateClient::connect`].
    pub fn open(config: PrimitiveConfig, backend: &dyn PrimitiveBackend) -> Result<Self> {
        let sessions = build_sessions(&config, backend)?;
        Self::new(config, sessions, Arc::new(HashRouter))
    }

    /// Composes already-built sessions. There must be exactly one session per
    /// configured partition.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: PrimitiveConfig,
        sessions: Vec<Arc<dyn ProxySession>>,
        router: Arc<dyn PartitionRouter>,
    ) -> Result<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|err| {
            ProxyError::ConfigError(format!("aggregate client needs a tokio runtime: {}", err))
        })?;

        let mut by_partition = BTreeMap::new();
        for session in sessions {
            let partition = session.partition_id();
            if !config.partitions.contains(&partition) {
                return Err(ProxyError::ConfigError(format!(
                    "session for unconfigured {}",
                    partition
                )));
            }
            if by_partition.insert(partition, session).is_some() {
                return Err(ProxyError::ConfigError(format!(
                    "more than one session for {}",
                    partition
                )));
            }
        }
        if by_partition.len() != config.partitions.len() {
            return Err(ProxyError::ConfigError(format!(
                "expected {} sessions, got {}",
                config.partitions.len(),
                by_partition.len()
            )));
        }

        let listeners = Arc::new(ListenerRegistry::new());
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (current, state) = watch::channel(ConnectionState::Closed);
        handle.spawn(
            AggregateStateTask {
                name: config.name.clone(),
                fsm: AggregateState::new(&config.partitions),
                listeners: Arc::clone(&listeners),
                current,
                inbox: inbox_rx,
            }
            .run(),
        );

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        for (partition, session) in &by_partition {
            let partition = *partition;
            let reports = inbox.clone();
            session.attach_state_listener(Arc::new(move |state: &ConnectionState| {
                let _ = reports.send(AggregateMessage::PartitionChanged(partition, *state));
            }));

            if let Some(mut partition_events) = session.subscribe_events() {
                let forward = events.clone();
                handle.spawn(async move {
                    loop {
                        match partition_events.recv().await {
                            Ok(event) => {
                                let _ = forward.send(event);
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                event!(Level::WARN, skipped, "event forwarder lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
            }
        }

        Ok(Self {
            config,
            sessions: by_partition,
            router,
            listeners,
            inbox,
            state,
            events,
        })
    }

    pub fn name(&self) -> &PrimitiveName {
        &self.config.name
    }

    pub fn primitive_type(&self) -> &PrimitiveType {
        &self.config.primitive_type
    }

    pub fn config(&self) -> &PrimitiveConfig {
        &self.config
    }

    /// Partitions in routing order.
    pub fn partitions(&self) -> &[PartitionId] {
        &self.config.partitions
    }

    pub fn session(&self, partition: PartitionId) -> Option<&Arc<dyn ProxySession>> {
        self.sessions.get(&partition)
    }

    /// Last aggregate state published by the state task.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Aggregate state after every partition report queued so far has been
    /// applied.
    pub async fn sync_state(&self) -> Result<ConnectionState> {
        let (reply, response) = oneshot::channel();
        self.inbox
            .send(AggregateMessage::Sync(reply))
            .map_err(|_| ProxyError::ClosedSession(self.config.name.to_string()))?;
        response
            .await
            .map_err(|_| ProxyError::ClosedSession(self.config.name.to_string()))
    }

    pub fn add_state_change_listener(&self, listener: StateChangeListener) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_state_change_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Events published to this client's sessions by any partition.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PrimitiveEvent> {
        self.events.subscribe()
    }

    /// Partition owning `key`; key-less primitives always use the first partition.
    pub fn partition_for(&self, key: Option<&[u8]>) -> PartitionId {
        match key {
            Some(key) if self.config.key_aware => {
                self.router.route(key, &self.config.partitions)
            }
            _ => self.config.partitions[0],
        }
    }

    pub fn session_for(&self, key: Option<&[u8]>) -> Result<&Arc<dyn ProxySession>> {
        let partition = self.partition_for(key);
        self.sessions.get(&partition).ok_or_else(|| {
            ProxyError::ConfigError(format!("no session for routed {}", partition))
        })
    }

    pub async fn connect(&self) -> Result<()> {
        let span = info_span!("aggregate.connect", primitive = %self.config.name);
        self.fan_out("connect", |session| async move { session.connect().await }.boxed())
            .instrument(span)
            .await
    }

    pub async fn close(&self) -> Result<()> {
        self.fan_out("close", |session| async move { session.close().await }.boxed())
            .await
    }

    pub async fn delete(&self) -> Result<()> {
        self.fan_out("delete", |session| async move { session.delete().await }.boxed())
            .await
    }

    /// Submits one operation to the partition owning `key`.
    pub async fn submit(
        &self,
        key: Option<&[u8]>,
        operation: PrimitiveOperation,
    ) -> Result<Vec<u8>> {
        let session = self.session_for(key)?;
        session.submit(operation).await
    }

    /// Submits the same operation to every partition. Results come back in
    /// partition order.
    pub async fn broadcast(
        &self,
        operation: PrimitiveOperation,
    ) -> Result<Vec<(PartitionId, Vec<u8>)>> {
        try_join_all(self.sessions.iter().map(|(partition, session)| {
            let operation = operation.clone();
            async move { Ok((*partition, session.submit(operation).await?)) }
        }))
        .await
    }

    /// Runs `action` on every session concurrently.
    ///
    /// Returns the first failure as soon as it is observed; the remaining
    /// partition operations keep running to completion in the background.
    async fn fan_out<F>(&self, action: &'static str, f: F) -> Result<()>
    where
        F: Fn(Arc<dyn ProxySession>) -> BoxFuture<'static, Result<()>>,
    {
        let mut pending = self
            .sessions
            .values()
            .map(|session| tokio::spawn(f(Arc::clone(session))))
            .collect::<FuturesUnordered<_>>();

        while let Some(joined) = pending.next().await {
            let outcome = joined.map_err(|err| {
                ProxyError::DeliveryFailure(format!("{} task failed: {}", action, err))
            })?;
            if let Err(err) = outcome {
                event!(
                    Level::WARN,
                    primitive = %self.config.name,
                    action,
                    error = %err,
                    "partition operation failed"
                );
                return Err(err);
            }
        }
        event!(Level::DEBUG, primitive = %self.config.name, action, "fan-out complete");
        Ok(())
    }
}
