pub mod log;
pub mod partition;
pub mod status;

use crate::core::{ConnectionState, PartitionId, PrimitiveOperation, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

pub use log::{
    Commit, LocalSession, LogClient, LogConsumer, LogEnvelope, LogProducer, LogRecord,
    PrimitiveEvent, RecordCallback, ReplicaStats, ReplicatedLogSession, ServiceContext,
    SessionPhase, StateMachineService,
};
pub use partition::{PartitionSession, PartitionTransport};
pub use status::{Listener, ListenerId, ListenerRegistry, SessionStatus, StateChangeListener};

/// One partition's client session, in either execution mode.
#[async_trait]
pub trait ProxySession: Send + Sync {
    fn partition_id(&self) -> PartitionId;

    fn state(&self) -> ConnectionState;

    /// Connects the session. Repeated and concurrent calls share the outcome
    /// of the first call.
    async fn connect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    async fn delete(&self) -> Result<()>;

    /// Submits one operation and returns its encoded result.
    async fn submit(&self, operation: PrimitiveOperation) -> Result<Vec<u8>>;

    fn add_state_change_listener(&self, listener: StateChangeListener) -> ListenerId;

    /// Like [`add_state_change_listener`](Self::add_state_change_listener),
    /// but the listener first receives the current state.
    fn attach_state_listener(&self, listener: StateChangeListener) -> ListenerId;

    fn remove_state_change_listener(&self, id: ListenerId) -> bool;

    /// Events the primitive publishes to this session, when the mode has any.
    fn subscribe_events(&self) -> Option<broadcast::Receiver<PrimitiveEvent>> {
        None
    }
}
