use crate::config::PrimitiveConfig;
use crate::core::{
    ConnectionState, LogIndex, PartitionId, PrimitiveName, PrimitiveOperation, ProxyError, Result,
    SessionId,
};
use crate::session::{
    Commit, LocalSession, PartitionTransport, ServiceContext, SessionStatus, StateChangeListener,
    StateMachineService,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

struct HostedService {
    service: Box<dyn StateMachineService>,
    index: LogIndex,
}

/// Partition-owned state machine reachable by direct calls.
///
/// Stands in for a remote partition: operations from every client run
/// server-side against one shared service instance. Clients talk to it
/// through their own [`InMemoryPartitionTransport`].
pub struct InMemoryPartition {
    name: PrimitiveName,
    partition: PartitionId,
    hosted: Mutex<HostedService>,
    session: LocalSession,
    clients: Mutex<Vec<Weak<SessionStatus>>>,
    executions: AtomicUsize,
    deleted: AtomicBool,
    connect_failure: Mutex<Option<ProxyError>>,
}

impl InMemoryPartition {
    pub fn new(
        config: &PrimitiveConfig,
        partition: PartitionId,
        mut service: Box<dyn StateMachineService>,
    ) -> Self {
        let session = LocalSession::new(SessionId::generate(), config.name.clone());
        service.init(&ServiceContext {
            primitive_name: config.name.clone(),
            primitive_type: config.primitive_type.clone(),
            partition,
            local_session: None,
            codec: config.codec,
        });
        service.register(&session);

        Self {
            name: config.name.clone(),
            partition,
            hosted: Mutex::new(HostedService { service, index: 0 }),
            session,
            clients: Mutex::new(Vec::new()),
            executions: AtomicUsize::new(0),
            deleted: AtomicBool::new(false),
            connect_failure: Mutex::new(None),
        }
    }

    /// Opens a new client handle on this partition.
    pub fn transport(self: &Arc<Self>) -> InMemoryPartitionTransport {
        let status = Arc::new(SessionStatus::new(format!("{}/{}", self.name, self.partition)));
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients.retain(|client| client.strong_count() > 0);
        clients.push(Arc::downgrade(&status));
        InMemoryPartitionTransport {
            partition: Arc::clone(self),
            status,
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Number of operations that reached this partition, from any client.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    /// Client handles that are still alive.
    pub fn client_count(&self) -> usize {
        self.live_clients().len()
    }

    /// Reports a connection state change to every connected client, as a
    /// real partition would on network trouble.
    pub fn set_state(&self, state: ConnectionState) {
        for client in self.live_clients() {
            client.transition(state);
        }
    }

    /// Makes the next client `connect` fail with `error`.
    pub fn fail_next_connect(&self, error: ProxyError) {
        *self
            .connect_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    fn live_clients(&self) -> Vec<Arc<SessionStatus>> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn execute(&self, operation: &PrimitiveOperation) -> Result<Vec<u8>> {
        let mut hosted = self.hosted.lock()?;
        if operation.id.is_command() {
            hosted.index += 1;
        }
        let HostedService { service, index } = &mut *hosted;
        service
            .apply(Commit {
                index: *index,
                operation: &operation.id,
                payload: &operation.payload,
                session: &self.session,
                timestamp: Utc::now(),
            })
            .map_err(ProxyError::into_service_exception)
    }
}

/// One client's connection to an [`InMemoryPartition`].
///
/// Connection state belongs to the handle: closing it leaves other clients
/// of the same partition untouched, while `delete` removes the partition
/// for everyone.
pub struct InMemoryPartitionTransport {
    partition: Arc<InMemoryPartition>,
    status: Arc<SessionStatus>,
}

impl InMemoryPartitionTransport {
    /// Hosts `service` on a fresh partition and opens one client on it.
    pub fn new(
        config: &PrimitiveConfig,
        partition: PartitionId,
        service: Box<dyn StateMachineService>,
    ) -> Self {
        Arc::new(InMemoryPartition::new(config, partition, service)).transport()
    }

    pub fn hosted(&self) -> &Arc<InMemoryPartition> {
        &self.partition
    }

    pub fn executions(&self) -> usize {
        self.partition.executions()
    }

    /// Reports a connection state change on this client only.
    pub fn set_state(&self, state: ConnectionState) {
        self.status.transition(state);
    }

    pub fn fail_next_connect(&self, error: ProxyError) {
        self.partition.fail_next_connect(error);
    }
}

#[async_trait]
impl PartitionTransport for InMemoryPartitionTransport {
    async fn connect(&self) -> Result<()> {
        if let Some(error) = self.partition.connect_failure.lock()?.take() {
            return Err(error);
        }
        if self.partition.is_deleted() {
            return Err(ProxyError::DeliveryFailure(format!(
                "{} was deleted",
                self.partition.partition
            )));
        }
        self.status.transition(ConnectionState::Connected);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.status.transition(ConnectionState::Closed);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.partition.deleted.store(true, Ordering::SeqCst);
        self.partition.set_state(ConnectionState::Closed);
        Ok(())
    }

    async fn execute(&self, operation: PrimitiveOperation) -> Result<Vec<u8>> {
        self.partition.executions.fetch_add(1, Ordering::SeqCst);
        if self.status.is_closed() || self.partition.is_deleted() {
            return Err(ProxyError::DeliveryFailure(format!(
                "{} is not reachable",
                self.partition.partition
            )));
        }
        self.partition.execute(&operation)
    }

    fn on_state_change(&self, listener: StateChangeListener) {
        self.status.listeners().add(listener);
    }
}
