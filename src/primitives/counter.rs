use crate::client::AggregateClient;
use crate::codec::Codec;
use crate::config::{ExecutionMode, PrimitiveConfig};
use crate::core::{ProxyError, Result};
use crate::session::{Commit, ServiceContext, StateMachineService};
use crate::stub::{PrimitiveOperations, StubDispatcher};
use primitive_proxy_derive::Operations;
use std::sync::Arc;

pub const COUNTER_TYPE: &str = "counter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Operations)]
pub enum CounterOperation {
    #[operation(query)]
    Get,
    #[operation(command)]
    Set,
    #[operation(command)]
    AddAndGet,
    #[operation(command, name = "increment_and_get")]
    IncrementAndGet,
    #[operation(command, name = "cas")]
    CompareAndSet,
}

/// Single replicated `i64`.
#[derive(Default)]
pub struct CounterService {
    codec: Codec,
    value: i64,
}

impl StateMachineService for CounterService {
    fn init(&mut self, context: &ServiceContext) {
        self.codec = context.codec;
    }

    fn apply(&mut self, commit: Commit<'_>) -> Result<Vec<u8>> {
        let operation = CounterOperation::from_operation_id(commit.operation)
            .ok_or_else(|| ProxyError::UnknownOperation(commit.operation.name().to_string()))?;

        match operation {
            CounterOperation::Get => self.codec.encode(&self.value),
            CounterOperation::Set => {
                self.value = self.codec.decode(commit.payload)?;
                self.codec.encode(&())
            }
            CounterOperation::AddAndGet => {
                let delta: i64 = self.codec.decode(commit.payload)?;
                self.value = self.value.checked_add(delta).ok_or_else(|| {
                    ProxyError::ServiceException(format!(
                        "counter overflow adding {} to {}",
                        delta, self.value
                    ))
                })?;
                self.codec.encode(&self.value)
            }
            CounterOperation::IncrementAndGet => {
                self.value = self.value.checked_add(1).ok_or_else(|| {
                    ProxyError::ServiceException("counter overflow".to_string())
                })?;
                self.codec.encode(&self.value)
            }
            CounterOperation::CompareAndSet => {
                let (expect, update): (i64, i64) = self.codec.decode(commit.payload)?;
                let swapped = self.value == expect;
                if swapped {
                    self.value = update;
                }
                self.codec.encode(&swapped)
            }
        }
    }
}

/// Key-less counter; every call goes to the first partition.
#[derive(Clone)]
pub struct AtomicCounter {
    stub: StubDispatcher<CounterOperation>,
}

impl AtomicCounter {
    pub fn config(name: &str, mode: ExecutionMode) -> PrimitiveConfig {
        PrimitiveConfig::new(name, COUNTER_TYPE)
            .mode(mode)
            .key_aware(false)
    }

    pub fn new(client: Arc<AggregateClient>) -> Result<Self> {
        if client.primitive_type().as_str() != COUNTER_TYPE {
            return Err(ProxyError::ConfigError(format!(
                "primitive '{}' is a {}, not a counter",
                client.name(),
                client.primitive_type()
            )));
        }
        Ok(Self {
            stub: StubDispatcher::new(client),
        })
    }

    pub fn client(&self) -> &Arc<AggregateClient> {
        self.stub.client()
    }

    pub async fn get(&self) -> Result<i64> {
        self.stub.invoke(CounterOperation::Get, None, &()).await
    }

    pub async fn set(&self, value: i64) -> Result<()> {
        self.stub.invoke(CounterOperation::Set, None, &value).await
    }

    pub async fn add_and_get(&self, delta: i64) -> Result<i64> {
        self.stub
            .invoke(CounterOperation::AddAndGet, None, &delta)
            .await
    }

    pub async fn increment_and_get(&self) -> Result<i64> {
        self.stub
            .invoke(CounterOperation::IncrementAndGet, None, &())
            .await
    }

    /// Sets the value to `update` if it currently equals `expect`.
    pub async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool> {
        self.stub
            .invoke(CounterOperation::CompareAndSet, None, &(expect, update))
            .await
    }
}
