use crate::core::{ConnectionState, LogIndex, ProxyError, Result};
use crate::session::{
    LogClient, LogConsumer, LogProducer, LogRecord, RecordCallback, SessionStatus,
    StateChangeListener,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{Level, event};

struct ConsumerCursor {
    next_index: LogIndex,
    callback: RecordCallback,
}

#[derive(Default)]
struct LogInner {
    records: Vec<LogRecord>,
    consumers: BTreeMap<u64, ConsumerCursor>,
    next_consumer_id: u64,
    paused: bool,
    append_failures: VecDeque<ProxyError>,
}

impl LogInner {
    /// Hands every undelivered record to every consumer, in index order.
    fn deliver(&mut self) {
        if self.paused {
            return;
        }
        let Self {
            records, consumers, ..
        } = self;
        for cursor in consumers.values_mut() {
            while let Some(record) = records.get(cursor.next_index as usize - 1) {
                (cursor.callback)(record.clone());
                cursor.next_index += 1;
            }
        }
    }
}

/// Shared append-only log kept in memory.
///
/// Records are delivered to consumers synchronously from `append` unless
/// delivery is paused. Clones share the same log.
#[derive(Clone, Default)]
pub struct InMemoryLog {
    inner: Arc<Mutex<LogInner>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// New client session on this log with its own consumer registration.
    pub fn client(&self) -> InMemoryLogClient {
        InMemoryLogClient {
            log: self.clone(),
            consumer: Mutex::new(None),
            status: Arc::new(SessionStatus::new("in-memory-log")),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the newest record, or 0 for an empty log.
    pub fn last_index(&self) -> LogIndex {
        self.lock().records.len() as LogIndex
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().records.clone()
    }

    /// Holds back delivery; appends still succeed.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    /// Resumes delivery and flushes everything held back.
    pub fn resume(&self) {
        let mut inner = self.lock();
        inner.paused = false;
        inner.deliver();
    }

    /// Makes the next append fail with `error`.
    pub fn fail_next_append(&self, error: ProxyError) {
        self.lock().append_failures.push_back(error);
    }

    fn append(&self, data: Vec<u8>) -> Result<LogIndex> {
        let mut inner = self.lock();
        if let Some(error) = inner.append_failures.pop_front() {
            return Err(error);
        }
        let index = inner.records.len() as LogIndex + 1;
        inner.records.push(LogRecord {
            index,
            timestamp: Utc::now(),
            data,
        });
        inner.deliver();
        Ok(index)
    }

    fn register_consumer(&self, start: LogIndex, callback: RecordCallback) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_consumer_id;
        inner.next_consumer_id += 1;
        inner.consumers.insert(
            id,
            ConsumerCursor {
                next_index: start.max(1),
                callback,
            },
        );
        inner.deliver();
        id
    }

    fn remove_consumer(&self, id: u64) {
        self.lock().consumers.remove(&id);
    }
}

/// One client's session on an [`InMemoryLog`].
pub struct InMemoryLogClient {
    log: InMemoryLog,
    consumer: Mutex<Option<u64>>,
    status: Arc<SessionStatus>,
}

impl InMemoryLogClient {
    pub fn log(&self) -> &InMemoryLog {
        &self.log
    }

    /// Reports a connection state change to the owning session.
    pub fn set_state(&self, state: ConnectionState) {
        self.status.transition(state);
    }
}

#[async_trait]
impl LogProducer for InMemoryLogClient {
    async fn append(&self, entry: Vec<u8>) -> Result<LogIndex> {
        if self.status.is_closed() {
            return Err(ProxyError::DeliveryFailure("log client is closed".to_string()));
        }
        self.log.append(entry)
    }
}

#[async_trait]
impl LogConsumer for InMemoryLogClient {
    async fn consume(&self, start: LogIndex, callback: RecordCallback) -> Result<()> {
        let mut consumer = self.consumer.lock()?;
        if consumer.is_some() {
            return Err(ProxyError::DeliveryFailure(
                "log client already has a consumer".to_string(),
            ));
        }
        *consumer = Some(self.log.register_consumer(start, callback));
        event!(Level::DEBUG, start, "in-memory consumer registered");
        Ok(())
    }

    async fn stop_consuming(&self) -> Result<()> {
        if let Some(id) = self.consumer.lock()?.take() {
            self.log.remove_consumer(id);
        }
        Ok(())
    }
}

#[async_trait]
impl LogClient for InMemoryLogClient {
    async fn connect(&self) -> Result<()> {
        self.status.transition(ConnectionState::Connected);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.status.transition(ConnectionState::Closed);
        Ok(())
    }

    fn on_state_change(&self, listener: StateChangeListener) {
        self.status.listeners().add(listener);
    }
}
