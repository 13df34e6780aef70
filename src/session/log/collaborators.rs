/// One record delivered by the log consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub index: LogIndex,
    /// Assigned by the log when the record was appended; replay uses it in
    /// place of wall-clock time.
    pub timestamp: DateTime<Utc>,
    pub data: Vec<u8>,
}

/// Callback receiving replayed records, one at a time, in index order.
pub type RecordCallback = Arc<dyn Fn(LogRecord) + Send + Sync>;

/// Write side of the shared log. Append is the only write primitive.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Appends one entry and returns the index the log assigned to it.
    async fn append(&self, entry: Vec<u8>) -> Result<LogIndex>;
}

/// Read side of the shared log.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Delivers every record from `start` onward to `callback`, exactly once
    /// and in strictly increasing index order.
    async fn consume(&self, start: LogIndex, callback: RecordCallback) -> Result<()>;

    /// Drops the registered callback; no records are delivered afterwards.
    async fn stop_consuming(&self) -> Result<()>;
}

/// A client's session with one partition's log.
#[async_trait]
pub trait LogClient: LogProducer + LogConsumer {
    async fn connect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn on_state_change(&self, listener: StateChangeListener);
}
