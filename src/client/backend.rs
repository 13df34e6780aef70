use crate::config::{ExecutionMode, PrimitiveConfig};
use crate::core::{PartitionId, ProxyError, Result};
use crate::session::{
    LogClient, PartitionSession, PartitionTransport, ProxySession, ReplicatedLogSession,
    StateMachineService,
};
use std::sync::Arc;

/// Supplies the per-partition collaborators a primitive's sessions need.
///
/// A backend only has to provide what its execution modes use; the
/// defaults reject the request with a configuration error.
pub trait PrimitiveBackend: Send + Sync {
    fn partition_transport(
        &self,
        config: &PrimitiveConfig,
        _partition: PartitionId,
    ) -> Result<Arc<dyn PartitionTransport>> {
        Err(ProxyError::ConfigError(format!(
            "backend has no direct transport for primitive '{}'",
            config.name
        )))
    }

    fn log_client(
        &self,
        config: &PrimitiveConfig,
        _partition: PartitionId,
    ) -> Result<Arc<dyn LogClient>> {
        Err(ProxyError::ConfigError(format!(
            "backend has no log for primitive '{}'",
            config.name
        )))
    }

    fn state_machine(
        &self,
        config: &PrimitiveConfig,
        _partition: PartitionId,
    ) -> Result<Box<dyn StateMachineService>> {
        Err(ProxyError::ConfigError(format!(
            "backend has no state machine for primitive type '{}'",
            config.primitive_type
        )))
    }
}

/// Builds one session per configured partition, in the configured mode.
pub fn build_sessions(
    config: &PrimitiveConfig,
    backend: &dyn PrimitiveBackend,
) -> Result<Vec<Arc<dyn ProxySession>>> {
    config.validate()?;
    config
        .partitions
        .iter()
        .map(|partition| -> Result<Arc<dyn ProxySession>> {
            match config.mode {
                ExecutionMode::Direct => {
                    let transport = backend.partition_transport(config, *partition)?;
                    Ok(Arc::new(PartitionSession::new(config, *partition, transport)))
                }
                ExecutionMode::LogReplicated => {
                    let log = backend.log_client(config, *partition)?;
                    let service = backend.state_machine(config, *partition)?;
                    Ok(Arc::new(ReplicatedLogSession::new(
                        config, *partition, log, service,
                    )))
                }
            }
        })
        .collect()
}
