use super::ProxySession;
use super::status::{ListenerId, SessionStatus, StateChangeListener};
use crate::config::PrimitiveConfig;
use crate::core::{
    ConnectionState, PartitionId, PrimitiveName, PrimitiveOperation, ProxyError, Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{Instrument, Level, event, info_span};

/// Remote connection to one partition's state machine.
#[async_trait]
pub trait PartitionTransport: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn delete(&self) -> Result<()>;

    /// Executes one operation on the partition and returns the encoded result.
    async fn execute(&self, operation: PrimitiveOperation) -> Result<Vec<u8>>;

    /// Subscribes to connection state reports. Reports for one partition
    /// arrive in order and at least once per transition.
    fn on_state_change(&self, listener: StateChangeListener);
}

/// Direct-mode session: every operation is a request/response round trip.
pub struct PartitionSession {
    name: PrimitiveName,
    partition: PartitionId,
    transport: Arc<dyn PartitionTransport>,
    status: Arc<SessionStatus>,
    connected: OnceCell<Result<()>>,
}

impl PartitionSession {
    pub fn new(
        config: &PrimitiveConfig,
        partition: PartitionId,
        transport: Arc<dyn PartitionTransport>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            partition,
            transport,
            status: Arc::new(SessionStatus::new(format!("{}/{}", config.name, partition))),
            connected: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &PrimitiveName {
        &self.name
    }

    async fn open(&self) -> Result<()> {
        self.transport.on_state_change(self.status.mirror());
        self.transport.connect().await?;
        self.status.transition(ConnectionState::Connected);
        event!(Level::INFO, "partition session connected");
        Ok(())
    }
}

#[async_trait]
impl ProxySession for PartitionSession {
    fn partition_id(&self) -> PartitionId {
        self.partition
    }

    fn state(&self) -> ConnectionState {
        self.status.state()
    }

    async fn connect(&self) -> Result<()> {
        let span = info_span!(
            "partition.session.connect",
            primitive = %self.name,
            partition = %self.partition
        );
        self.connected
            .get_or_init(|| self.open().instrument(span))
            .await
            .clone()
    }

    async fn close(&self) -> Result<()> {
        self.transport.close().await?;
        self.status.transition(ConnectionState::Closed);
        event!(Level::INFO, session = %self.status.label(), "partition session closed");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.transport.delete().await?;
        self.status.transition(ConnectionState::Closed);
        event!(Level::INFO, session = %self.status.label(), "partition session deleted");
        Ok(())
    }

    async fn submit(&self, operation: PrimitiveOperation) -> Result<Vec<u8>> {
        if self.status.is_closed() {
            return Err(ProxyError::ClosedSession(self.status.label().to_string()));
        }
        event!(
            Level::TRACE,
            session = %self.status.label(),
            operation = %operation.id,
            "submitting direct operation"
        );
        self.transport.execute(operation).await
    }

    fn add_state_change_listener(&self, listener: StateChangeListener) -> ListenerId {
        self.status.listeners().add(listener)
    }

    fn attach_state_listener(&self, listener: StateChangeListener) -> ListenerId {
        self.status.attach(listener)
    }

    fn remove_state_change_listener(&self, id: ListenerId) -> bool {
        self.status.listeners().remove(id)
    }
}
