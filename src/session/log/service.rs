/// Static facts handed to a state machine before the first record.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub primitive_name: PrimitiveName,
    pub primitive_type: PrimitiveType,
    pub partition: PartitionId,
    /// Session id of the hosting client, or `None` when hosted server-side.
    pub local_session: Option<SessionId>,
    pub codec: Codec,
}

/// One operation applied to a state machine.
///
/// For queries `index` and `timestamp` are those of the last applied record.
pub struct Commit<'a> {
    pub index: LogIndex,
    pub operation: &'a OperationId,
    pub payload: &'a [u8],
    pub session: &'a LocalSession,
    pub timestamp: DateTime<Utc>,
}

impl Commit<'_> {
    pub fn is_query(&self) -> bool {
        self.operation.kind() == OperationKind::Query
    }
}

/// Replicated business logic.
///
/// `apply` must be deterministic: the same ordered input yields the same
/// results and the same event publications on every replica.
pub trait StateMachineService: Send {
    fn init(&mut self, _context: &ServiceContext) {}

    /// Called once for every session, the first time it appears in the log.
    fn register(&mut self, _session: &LocalSession) {}

    fn apply(&mut self, commit: Commit<'_>) -> Result<Vec<u8>>;
}

/// Event published by a state machine to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveEvent {
    pub session_id: SessionId,
    pub event_type: String,
    pub payload: Vec<u8>,
}

/// Session materialized from the log, addressable by the state machine.
///
/// Only the session of the local producer carries an event sink; events
/// for other sessions are delivered by the replica hosting them.
#[derive(Clone)]
pub struct LocalSession {
    id: SessionId,
    primitive_name: PrimitiveName,
    events: Option<broadcast::Sender<PrimitiveEvent>>,
}

impl LocalSession {
    pub fn new(id: SessionId, primitive_name: PrimitiveName) -> Self {
        Self {
            id,
            primitive_name,
            events: None,
        }
    }

    fn with_events(mut self, events: broadcast::Sender<PrimitiveEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn primitive_name(&self) -> &PrimitiveName {
        &self.primitive_name
    }

    pub fn is_local(&self) -> bool {
        self.events.is_some()
    }

    /// Publishes an event to this session. Returns whether it was delivered
    /// to at least one local subscriber.
    pub fn publish(&self, event_type: impl Into<String>, payload: Vec<u8>) -> bool {
        let Some(events) = &self.events else {
            return false;
        };
        events
            .send(PrimitiveEvent {
                session_id: self.id,
                event_type: event_type.into(),
                payload,
            })
            .is_ok()
    }
}

impl fmt::Debug for LocalSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSession")
            .field("id", &self.id)
            .field("primitive_name", &self.primitive_name)
            .field("local", &self.is_local())
            .finish()
    }
}
