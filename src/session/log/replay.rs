type ResultHandle = oneshot::Sender<Result<Vec<u8>>>;

/// Query waiting for the consumer to reach `required_index`.
struct PendingRead {
    required_index: LogIndex,
    operation: OperationId,
    payload: Vec<u8>,
    result: ResultHandle,
}

/// Producer-side bookkeeping: write index allocation and in-flight commands.
#[derive(Default)]
struct PendingWrites {
    last_write_index: WriteIndex,
    entries: HashMap<WriteIndex, ResultHandle>,
}

impl PendingWrites {
    fn register(&mut self, handle: ResultHandle) -> WriteIndex {
        // Callers that gave up no longer need their result.
        self.entries.retain(|_, pending| !pending.is_closed());
        self.last_write_index += 1;
        self.entries.insert(self.last_write_index, handle);
        self.last_write_index
    }

    fn take(&mut self, write_index: WriteIndex) -> Option<ResultHandle> {
        self.entries.remove(&write_index)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn abandon_all(&mut self) -> usize {
        let abandoned = self.entries.len();
        self.entries.clear();
        abandoned
    }
}

/// Everything owned by the replay loop.
///
/// Mutated only while applying a record; callers take the same lock to
/// evaluate or enqueue a query.
struct ReplayState {
    primitive_name: PrimitiveName,
    codec: Codec,
    local_session: LocalSession,
    service: Box<dyn StateMachineService>,
    position: LogIndex,
    last_timestamp: DateTime<Utc>,
    sessions: HashMap<SessionId, LocalSession>,
    pending_reads: VecDeque<PendingRead>,
}

impl ReplayState {
    fn new(
        primitive_name: PrimitiveName,
        codec: Codec,
        local_session: LocalSession,
        service: Box<dyn StateMachineService>,
    ) -> Self {
        Self {
            primitive_name,
            codec,
            local_session,
            service,
            position: 0,
            last_timestamp: DateTime::<Utc>::default(),
            sessions: HashMap::new(),
            pending_reads: VecDeque::new(),
        }
    }

    fn apply_record(&mut self, record: LogRecord, writes: &Mutex<PendingWrites>) {
        let envelope = match LogEnvelope::decode(self.codec, &record.data) {
            Ok(envelope) => envelope,
            Err(err) => {
                event!(
                    Level::WARN,
                    index = record.index,
                    error = %err,
                    "skipping undecodable log record"
                );
                return;
            }
        };

        if envelope.primitive_name != self.primitive_name {
            event!(
                Level::TRACE,
                index = record.index,
                primitive = %envelope.primitive_name,
                "skipping record of another primitive"
            );
            return;
        }

        if record.index <= self.position {
            event!(
                Level::WARN,
                index = record.index,
                position = self.position,
                "ignoring record at or below the consumer position"
            );
            return;
        }

        let session = self.session_for(envelope.session_id);
        self.position = record.index;
        self.last_timestamp = record.timestamp;

        let result = self
            .service
            .apply(Commit {
                index: record.index,
                operation: &envelope.operation,
                payload: &envelope.payload,
                session: &session,
                timestamp: record.timestamp,
            })
            .map_err(ProxyError::into_service_exception);
        if let Err(err) = &result {
            event!(
                Level::WARN,
                index = record.index,
                operation = %envelope.operation,
                error = %err,
                "command failed in state machine"
            );
        }

        if envelope.session_id == self.local_session.id() {
            let handle = writes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(envelope.write_index);
            if let Some(handle) = handle {
                let _ = handle.send(result);
            }
        }

        self.drain_reads(record.index);
    }

    fn session_for(&mut self, id: SessionId) -> LocalSession {
        match self.sessions.entry(id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let session = if id == self.local_session.id() {
                    self.local_session.clone()
                } else {
                    LocalSession::new(id, self.primitive_name.clone())
                };
                self.service.register(&session);
                event!(Level::DEBUG, session = %id, "session materialized from log");
                entry.insert(session).clone()
            }
        }
    }

    /// Evaluates a query at the current consumer position.
    fn query(&mut self, operation: &OperationId, payload: &[u8]) -> Result<Vec<u8>> {
        self.service
            .apply(Commit {
                index: self.position,
                operation,
                payload,
                session: &self.local_session,
                timestamp: self.last_timestamp,
            })
            .map_err(ProxyError::into_service_exception)
    }

    fn enqueue_read(&mut self, read: PendingRead) {
        self.pending_reads.retain(|pending| !pending.result.is_closed());
        self.pending_reads.push_back(read);
    }

    /// Resolves queued reads from the head while they are satisfied.
    ///
    /// Reads leave the queue in submission order; a read whose required
    /// index is not yet reached holds back the reads behind it.
    fn drain_reads(&mut self, index: LogIndex) {
        while self
            .pending_reads
            .front()
            .is_some_and(|read| read.required_index <= index)
        {
            let Some(read) = self.pending_reads.pop_front() else {
                break;
            };
            let result = self.query(&read.operation, &read.payload);
            if let Err(err) = &result {
                event!(
                    Level::WARN,
                    operation = %read.operation,
                    error = %err,
                    "queued query failed"
                );
            }
            let _ = read.result.send(result);
        }
    }

    fn abandon_reads(&mut self) -> usize {
        let abandoned = self.pending_reads.len();
        self.pending_reads.clear();
        abandoned
    }
}
