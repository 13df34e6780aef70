use crate::client::AggregateClient;
use crate::codec::Codec;
use crate::config::{ExecutionMode, PrimitiveConfig};
use crate::core::{ProxyError, Result, SessionId};
use crate::session::{Commit, LocalSession, PrimitiveEvent, ServiceContext, StateMachineService};
use crate::stub::{PrimitiveOperations, StubDispatcher};
use primitive_proxy_derive::Operations;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{Level, event};

pub const MAP_TYPE: &str = "map";

/// Event type published by [`MapService`] on every mutation.
pub const MAP_CHANGE_EVENT: &str = "map.change";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Operations)]
pub enum MapOperation {
    #[operation(command)]
    Put,
    #[operation(query)]
    Get,
    #[operation(command)]
    Remove,
    #[operation(query)]
    ContainsKey,
    #[operation(query)]
    Size,
    #[operation(command)]
    Listen,
    #[operation(command)]
    Unlisten,
}

#[derive(Debug, Serialize, Deserialize)]
struct PutArgs {
    key: String,
    value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapEventKind {
    Insert,
    Update,
    Remove,
}

/// Wire form of a change event; values stay encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MapEventRecord {
    kind: MapEventKind,
    key: String,
    old_value: Option<Vec<u8>>,
    new_value: Option<Vec<u8>>,
}

/// Replicated key/value state of one map partition.
#[derive(Default)]
pub struct MapService {
    codec: Codec,
    entries: BTreeMap<String, Vec<u8>>,
    sessions: HashMap<SessionId, LocalSession>,
    listeners: BTreeSet<SessionId>,
}

impl MapService {
    fn notify(&self, record: MapEventRecord) -> Result<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        let payload = self.codec.encode(&record)?;
        for id in &self.listeners {
            if let Some(session) = self.sessions.get(id) {
                session.publish(MAP_CHANGE_EVENT, payload.clone());
            }
        }
        Ok(())
    }
}

impl StateMachineService for MapService {
    fn init(&mut self, context: &ServiceContext) {
        self.codec = context.codec;
    }

    fn register(&mut self, session: &LocalSession) {
        self.sessions.insert(session.id(), session.clone());
    }

    fn apply(&mut self, commit: Commit<'_>) -> Result<Vec<u8>> {
        let operation = MapOperation::from_operation_id(commit.operation)
            .ok_or_else(|| ProxyError::UnknownOperation(commit.operation.name().to_string()))?;

        match operation {
            MapOperation::Put => {
                let PutArgs { key, value } = self.codec.decode(commit.payload)?;
                let previous = self.entries.insert(key.clone(), value.clone());
                self.notify(MapEventRecord {
                    kind: if previous.is_some() {
                        MapEventKind::Update
                    } else {
                        MapEventKind::Insert
                    },
                    key,
                    old_value: previous.clone(),
                    new_value: Some(value),
                })?;
                self.codec.encode(&previous)
            }
            MapOperation::Get => {
                let key: String = self.codec.decode(commit.payload)?;
                self.codec.encode(&self.entries.get(&key))
            }
            MapOperation::Remove => {
                let key: String = self.codec.decode(commit.payload)?;
                let previous = self.entries.remove(&key);
                if previous.is_some() {
                    self.notify(MapEventRecord {
                        kind: MapEventKind::Remove,
                        key,
                        old_value: previous.clone(),
                        new_value: None,
                    })?;
                }
                self.codec.encode(&previous)
            }
            MapOperation::ContainsKey => {
                let key: String = self.codec.decode(commit.payload)?;
                self.codec.encode(&self.entries.contains_key(&key))
            }
            MapOperation::Size => self.codec.encode(&(self.entries.len() as u64)),
            MapOperation::Listen => {
                self.listeners.insert(commit.session.id());
                self.codec.encode(&())
            }
            MapOperation::Unlisten => {
                self.listeners.remove(&commit.session.id());
                self.codec.encode(&())
            }
        }
    }
}

/// A change observed by a map listener.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEvent<V> {
    pub kind: MapEventKind,
    pub key: String,
    pub old_value: Option<V>,
    pub new_value: Option<V>,
}

/// Stream of change events delivered to this client.
pub struct MapEvents<V> {
    codec: Codec,
    events: broadcast::Receiver<PrimitiveEvent>,
    _values: PhantomData<fn() -> V>,
}

impl<V: DeserializeOwned> MapEvents<V> {
    /// Next change event, or `None` once every partition session is gone.
    pub async fn next(&mut self) -> Option<Result<MapEvent<V>>> {
        loop {
            match self.events.recv().await {
                Ok(event) if event.event_type == MAP_CHANGE_EVENT => {
                    return Some(self.decode(&event.payload));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    event!(Level::WARN, skipped, "map listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<MapEvent<V>> {
        let record: MapEventRecord = self.codec.decode(payload)?;
        let value = |bytes: Option<Vec<u8>>| -> Result<Option<V>> {
            bytes.map(|bytes| self.codec.decode(&bytes)).transpose()
        };
        Ok(MapEvent {
            kind: record.kind,
            key: record.key,
            old_value: value(record.old_value)?,
            new_value: value(record.new_value)?,
        })
    }
}

/// Partitioned map from string keys to `V`.
///
/// Each key lives on the partition chosen by the client's router.
pub struct DistributedMap<V> {
    stub: StubDispatcher<MapOperation>,
    _values: PhantomData<fn() -> V>,
}

impl<V> Clone for DistributedMap<V> {
    fn clone(&self) -> Self {
        Self {
            stub: self.stub.clone(),
            _values: PhantomData,
        }
    }
}

impl<V> DistributedMap<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    /// Key-aware map configuration over `partitions` partitions.
    pub fn config(name: &str, mode: ExecutionMode, partitions: u32) -> PrimitiveConfig {
        PrimitiveConfig::new(name, MAP_TYPE)
            .mode(mode)
            .partition_count(partitions)
    }

    pub fn new(client: Arc<AggregateClient>) -> Result<Self> {
        if client.primitive_type().as_str() != MAP_TYPE {
            return Err(ProxyError::ConfigError(format!(
                "primitive '{}' is a {}, not a map",
                client.name(),
                client.primitive_type()
            )));
        }
        Ok(Self {
            stub: StubDispatcher::new(client),
            _values: PhantomData,
        })
    }

    pub fn client(&self) -> &Arc<AggregateClient> {
        self.stub.client()
    }

    /// Stores `value` and returns the previous one.
    pub async fn put(&self, key: &str, value: &V) -> Result<Option<V>> {
        let args = PutArgs {
            key: key.to_string(),
            value: self.stub.codec().encode(value)?,
        };
        let previous: Option<Vec<u8>> = self
            .stub
            .invoke(MapOperation::Put, Some(key.as_bytes()), &args)
            .await?;
        self.decode_value(previous)
    }

    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        let value: Option<Vec<u8>> = self
            .stub
            .invoke(MapOperation::Get, Some(key.as_bytes()), key)
            .await?;
        self.decode_value(value)
    }

    /// Removes `key` and returns its value, if any.
    pub async fn remove(&self, key: &str) -> Result<Option<V>> {
        let previous: Option<Vec<u8>> = self
            .stub
            .invoke(MapOperation::Remove, Some(key.as_bytes()), key)
            .await?;
        self.decode_value(previous)
    }

    pub async fn contains_key(&self, key: &str) -> Result<bool> {
        self.stub
            .invoke(MapOperation::ContainsKey, Some(key.as_bytes()), key)
            .await
    }

    /// Number of entries across all partitions.
    pub async fn size(&self) -> Result<u64> {
        let sizes: Vec<u64> = self.stub.invoke_all(MapOperation::Size, &()).await?;
        Ok(sizes.into_iter().sum())
    }

    /// Subscribes this client to change events on every partition.
    ///
    /// Events are delivered through the local replica, so the client must
    /// run in log-replicated mode.
    pub async fn listen(&self) -> Result<MapEvents<V>> {
        if self.client().config().mode != ExecutionMode::LogReplicated {
            return Err(ProxyError::ConfigError(format!(
                "map '{}' delivers events only in log-replicated mode",
                self.client().name()
            )));
        }
        let events = self.client().subscribe_events();
        let _: Vec<()> = self.stub.invoke_all(MapOperation::Listen, &()).await?;
        Ok(MapEvents {
            codec: self.stub.codec(),
            events,
            _values: PhantomData,
        })
    }

    pub async fn unlisten(&self) -> Result<()> {
        let _: Vec<()> = self.stub.invoke_all(MapOperation::Unlisten, &()).await?;
        Ok(())
    }

    fn decode_value(&self, bytes: Option<Vec<u8>>) -> Result<Option<V>> {
        bytes
            .map(|bytes| self.stub.codec().decode(&bytes))
            .transpose()
    }
}
