use super::log::InMemoryLog;
use super::transport::InMemoryPartition;
use crate::client::PrimitiveBackend;
use crate::config::PrimitiveConfig;
use crate::core::{PartitionId, PrimitiveName, PrimitiveType, ProxyError, Result};
use crate::session::{LogClient, PartitionTransport, StateMachineService};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{Level, event};

/// Builds a fresh state machine instance for one primitive type.
pub type ServiceFactory = Arc<dyn Fn() -> Box<dyn StateMachineService> + Send + Sync>;

#[derive(Default)]
struct ClusterInner {
    services: HashMap<PrimitiveType, ServiceFactory>,
    logs: HashMap<PartitionId, InMemoryLog>,
    partitions: HashMap<(PrimitiveName, PartitionId), Arc<InMemoryPartition>>,
}

/// Process-local cluster serving both execution modes.
///
/// Every partition has one log shared by all primitives, and every
/// primitive partition has one server-side state machine shared by all
/// direct-mode clients. Each direct-mode client gets its own transport
/// handle on that state machine. Clones share the same cluster.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    inner: Arc<Mutex<ClusterInner>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the state machine backing `primitive_type`.
    pub fn register_service(
        &self,
        primitive_type: impl Into<PrimitiveType>,
        factory: ServiceFactory,
    ) -> Result<()> {
        self.inner
            .lock()?
            .services
            .insert(primitive_type.into(), factory);
        Ok(())
    }

    /// Registers a default-constructed `S` for `primitive_type`.
    pub fn with_service<S>(self, primitive_type: impl Into<PrimitiveType>) -> Result<Self>
    where
        S: StateMachineService + Default + 'static,
    {
        self.register_service(primitive_type, Arc::new(|| Box::new(S::default())))?;
        Ok(self)
    }

    /// Log of `partition`, created on first use.
    pub fn log(&self, partition: PartitionId) -> Result<InMemoryLog> {
        Ok(self.inner.lock()?.logs.entry(partition).or_default().clone())
    }

    /// Hosted partition already created for a primitive.
    pub fn partition(
        &self,
        name: &PrimitiveName,
        partition: PartitionId,
    ) -> Result<Option<Arc<InMemoryPartition>>> {
        Ok(self
            .inner
            .lock()?
            .partitions
            .get(&(name.clone(), partition))
            .cloned())
    }

    fn new_service(&self, config: &PrimitiveConfig) -> Result<Box<dyn StateMachineService>> {
        let factory = self
            .inner
            .lock()?
            .services
            .get(&config.primitive_type)
            .cloned()
            .ok_or_else(|| {
                ProxyError::ConfigError(format!(
                    "no service registered for primitive type '{}'",
                    config.primitive_type
                ))
            })?;
        Ok(factory())
    }
}

impl PrimitiveBackend for InMemoryCluster {
    fn partition_transport(
        &self,
        config: &PrimitiveConfig,
        partition: PartitionId,
    ) -> Result<Arc<dyn PartitionTransport>> {
        let key = (config.name.clone(), partition);
        let existing = self.inner.lock()?.partitions.get(&key).cloned();
        let hosted = match existing {
            Some(hosted) => hosted,
            None => {
                let service = self.new_service(config)?;
                let mut inner = self.inner.lock()?;
                let hosted = inner.partitions.entry(key).or_insert_with(|| {
                    event!(
                        Level::DEBUG,
                        primitive = %config.name,
                        partition = %partition,
                        "hosting in-memory partition service"
                    );
                    Arc::new(InMemoryPartition::new(config, partition, service))
                });
                Arc::clone(hosted)
            }
        };
        Ok(Arc::new(hosted.transport()))
    }

    fn log_client(
        &self,
        _config: &PrimitiveConfig,
        partition: PartitionId,
    ) -> Result<Arc<dyn LogClient>> {
        Ok(Arc::new(self.log(partition)?.client()))
    }

    fn state_machine(
        &self,
        config: &PrimitiveConfig,
        _partition: PartitionId,
    ) -> Result<Box<dyn StateMachineService>> {
        self.new_service(config)
    }
}
