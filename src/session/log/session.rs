/// Lifecycle of a log-replicated session, independent of its connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Ready,
}

/// Point-in-time counters of a log-replicated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaStats {
    pub consumer_position: LogIndex,
    pub last_appended_index: LogIndex,
    pub pending_writes: usize,
    pub pending_reads: usize,
    pub local_sessions: usize,
}

/// State shared between callers and the replay callback.
struct LogSessionShared {
    replay: Mutex<ReplayState>,
    writes: Mutex<PendingWrites>,
    last_appended: AtomicU64,
}

impl LogSessionShared {
    fn apply_record(&self, record: LogRecord) {
        match self.replay.lock() {
            Ok(mut replay) => replay.apply_record(record, &self.writes),
            Err(err) => event!(
                Level::ERROR,
                index = record.index,
                error = %err,
                "replay state poisoned, dropping record"
            ),
        }
    }
}

/// Log-replicated session.
///
/// Commands are appended to the shared log and complete when the local
/// replay reaches them. Queries run against the local copy of the state
/// machine once it has replayed everything this session has written.
pub struct ReplicatedLogSession {
    name: PrimitiveName,
    primitive_type: PrimitiveType,
    partition: PartitionId,
    codec: Codec,
    start_index: LogIndex,
    session_id: SessionId,
    log: Arc<dyn LogClient>,
    status: Arc<SessionStatus>,
    shared: Arc<LogSessionShared>,
    events: broadcast::Sender<PrimitiveEvent>,
    phase: Mutex<SessionPhase>,
    connected: OnceCell<Result<()>>,
}

const EVENT_BUFFER: usize = 1024;

impl ReplicatedLogSession {
    pub fn new(
        config: &PrimitiveConfig,
        partition: PartitionId,
        log: Arc<dyn LogClient>,
        service: Box<dyn StateMachineService>,
    ) -> Self {
        let session_id = SessionId::generate();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let local_session =
            LocalSession::new(session_id, config.name.clone()).with_events(events.clone());
        let replay = ReplayState::new(config.name.clone(), config.codec, local_session, service);

        Self {
            name: config.name.clone(),
            primitive_type: config.primitive_type.clone(),
            partition,
            codec: config.codec,
            start_index: config.log_start_index,
            session_id,
            log,
            status: Arc::new(SessionStatus::new(format!("{}/{}", config.name, partition))),
            shared: Arc::new(LogSessionShared {
                replay: Mutex::new(replay),
                writes: Mutex::new(PendingWrites::default()),
                last_appended: AtomicU64::new(0),
            }),
            events,
            phase: Mutex::new(SessionPhase::Uninitialized),
            connected: OnceCell::new(),
        }
    }

    /// Id this session's producer stamps on every envelope.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn name(&self) -> &PrimitiveName {
        &self.name
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Highest log index applied by the replay loop.
    pub fn consumer_position(&self) -> Result<LogIndex> {
        Ok(self.shared.replay.lock()?.position)
    }

    /// Highest log index acknowledged for this session's own appends.
    pub fn last_appended_index(&self) -> LogIndex {
        self.shared.last_appended.load(Ordering::SeqCst)
    }

    /// Whether a session with the given id has been seen in the log.
    pub fn has_local_session(&self, id: SessionId) -> Result<bool> {
        Ok(self.shared.replay.lock()?.sessions.contains_key(&id))
    }

    pub fn stats(&self) -> Result<ReplicaStats> {
        let (consumer_position, pending_reads, local_sessions) = {
            let replay = self.shared.replay.lock()?;
            (replay.position, replay.pending_reads.len(), replay.sessions.len())
        };
        let pending_writes = self.shared.writes.lock()?.len();
        Ok(ReplicaStats {
            consumer_position,
            last_appended_index: self.last_appended_index(),
            pending_writes,
            pending_reads,
            local_sessions,
        })
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn closed_error(&self) -> ProxyError {
        ProxyError::ClosedSession(self.status.label().to_string())
    }

    async fn open(&self) -> Result<()> {
        self.set_phase(SessionPhase::Initializing);
        {
            let context = ServiceContext {
                primitive_name: self.name.clone(),
                primitive_type: self.primitive_type.clone(),
                partition: self.partition,
                local_session: Some(self.session_id),
                codec: self.codec,
            };
            self.shared.replay.lock()?.service.init(&context);
        }

        self.log.on_state_change(self.status.mirror());
        self.log.connect().await?;

        let shared = Arc::clone(&self.shared);
        let callback: RecordCallback =
            Arc::new(move |record: LogRecord| shared.apply_record(record));
        self.log.consume(self.start_index, callback).await?;

        self.set_phase(SessionPhase::Ready);
        self.status.transition(ConnectionState::Connected);
        event!(Level::INFO, session = %self.session_id, "log session connected");
        Ok(())
    }

    /// Stops replay and resolves every in-flight operation as closed.
    async fn shutdown(&self) -> Result<()> {
        self.log.stop_consuming().await?;
        self.log.close().await?;
        self.status.transition(ConnectionState::Closed);

        let writes = self.shared.writes.lock()?.abandon_all();
        let reads = self.shared.replay.lock()?.abandon_reads();
        if writes > 0 || reads > 0 {
            event!(
                Level::WARN,
                session = %self.status.label(),
                writes,
                reads,
                "abandoned in-flight operations on close"
            );
        }
        Ok(())
    }

    async fn submit_command(&self, operation: PrimitiveOperation) -> Result<Vec<u8>> {
        if self.status.is_closed() {
            return Err(self.closed_error());
        }

        let (tx, rx) = oneshot::channel();
        let write_index = self.shared.writes.lock()?.register(tx);
        let span = info_span!(
            "log.session.command",
            session = %self.session_id,
            write_index,
            operation = %operation.id
        );

        let envelope = LogEnvelope {
            session_id: self.session_id,
            primitive_name: self.name.clone(),
            write_index,
            operation: operation.id,
            payload: operation.payload,
        };
        let appended = match envelope.encode(self.codec) {
            Ok(bytes) => self.log.append(bytes).instrument(span.clone()).await,
            Err(err) => Err(err),
        };

        match appended {
            Ok(index) => {
                self.shared.last_appended.fetch_max(index, Ordering::SeqCst);
                span.in_scope(|| event!(Level::TRACE, index, "command appended"));
            }
            Err(err) => {
                self.shared.writes.lock()?.take(write_index);
                span.in_scope(|| event!(Level::WARN, error = %err, "command append failed"));
                return Err(err);
            }
        }

        rx.await.map_err(|_| self.closed_error())?
    }

    async fn submit_query(&self, operation: PrimitiveOperation) -> Result<Vec<u8>> {
        if self.status.is_closed() {
            return Err(self.closed_error());
        }

        let rx = {
            let mut replay = self.shared.replay.lock()?;
            let required_index = self.shared.last_appended.load(Ordering::SeqCst);
            if replay.position >= required_index {
                return replay.query(&operation.id, &operation.payload);
            }

            let (tx, rx) = oneshot::channel();
            event!(
                Level::TRACE,
                required_index,
                position = replay.position,
                operation = %operation.id,
                "query waits for replay"
            );
            replay.enqueue_read(PendingRead {
                required_index,
                operation: operation.id,
                payload: operation.payload,
                result: tx,
            });
            rx
        };

        rx.await.map_err(|_| self.closed_error())?
    }
}

#[async_trait]
impl ProxySession for ReplicatedLogSession {
    fn partition_id(&self) -> PartitionId {
        self.partition
    }

    fn state(&self) -> ConnectionState {
        self.status.state()
    }

    async fn connect(&self) -> Result<()> {
        let span = info_span!(
            "log.session.connect",
            primitive = %self.name,
            partition = %self.partition
        );
        self.connected
            .get_or_init(|| self.open().instrument(span))
            .await
            .clone()
    }

    async fn close(&self) -> Result<()> {
        self.shutdown().await?;
        event!(Level::INFO, session = %self.status.label(), "log session closed");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.shutdown().await?;
        self.shared.replay.lock()?.sessions.clear();
        event!(Level::INFO, session = %self.status.label(), "log session deleted");
        Ok(())
    }

    async fn submit(&self, operation: PrimitiveOperation) -> Result<Vec<u8>> {
        match operation.id.kind() {
            OperationKind::Command => self.submit_command(operation).await,
            OperationKind::Query => self.submit_query(operation).await,
        }
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

    fn subscribe_events(&self) -> Option<broadcast::Receiver<PrimitiveEvent>> {
        Some(self.events.subscribe())
    }
}
