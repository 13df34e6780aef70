use crate::codec::Codec;
use crate::core::{LogIndex, PartitionId, PrimitiveName, PrimitiveType, ProxyError, Result};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// How operations reach a partition's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Request/response against a partition-owned state machine.
    #[default]
    Direct,
    /// Commands go through a shared log replayed into a local state machine.
    LogReplicated,
}

impl FromStr for ExecutionMode {
    type Err = ProxyError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "log" | "log-replicated" => Ok(Self::LogReplicated),
            other => Err(ProxyError::ConfigError(format!(
                "unknown execution mode '{}', expected 'direct' or 'log'",
                other
            ))),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::LogReplicated => f.write_str("log"),
        }
    }
}

/// Primitive configuration
///
/// Describes one logical primitive and how its client sessions are built.
#[derive(Debug, Clone)]
pub struct PrimitiveConfig {
    /// Name of the primitive, shared by every partition
    pub name: PrimitiveName,

    /// Operation/event schema of the primitive
    pub primitive_type: PrimitiveType,

    /// Direct or log-replicated sessions
    pub mode: ExecutionMode,

    /// Partitions in routing order
    pub partitions: Vec<PartitionId>,

    /// Route calls by key; key-less primitives always use the first partition
    pub key_aware: bool,

    /// Codec for arguments, results and log envelopes
    pub codec: Codec,

    /// First log index replayed by log-replicated sessions
    pub log_start_index: LogIndex,
}

impl PrimitiveConfig {
    /// Create a new configuration with a single partition in direct mode
    pub fn new(name: &str, primitive_type: &str) -> Self {
        Self {
            name: PrimitiveName::new(name),
            primitive_type: PrimitiveType::new(primitive_type),
            mode: ExecutionMode::Direct,
            partitions: vec![PartitionId::new(1)],
            key_aware: true,
            codec: Codec::MessagePack,
            log_start_index: 1,
        }
    }

    /// Set the execution mode
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Use partitions `1..=count`
    pub fn partition_count(mut self, count: u32) -> Self {
        self.partitions = (1..=count).map(PartitionId::new).collect();
        self
    }

    /// Set an explicit partition list; it is sorted into routing order
    pub fn partitions(mut self, partitions: Vec<PartitionId>) -> Self {
        self.partitions = partitions;
        self.partitions.sort();
        self
    }

    /// Set whether calls are routed by key
    pub fn key_aware(mut self, key_aware: bool) -> Self {
        self.key_aware = key_aware;
        self
    }

    /// Set the codec
    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the first log index to replay
    pub fn log_start_index(mut self, index: LogIndex) -> Self {
        self.log_start_index = index;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.as_str().trim().is_empty() {
            return Err(ProxyError::ConfigError(
                "primitive name must not be empty".to_string(),
            ));
        }

        if self.primitive_type.as_str().trim().is_empty() {
            return Err(ProxyError::ConfigError(
                "primitive type must not be empty".to_string(),
            ));
        }

        if self.partitions.is_empty() {
            return Err(ProxyError::ConfigError(
                "at least one partition is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for partition in &self.partitions {
            if !seen.insert(*partition) {
                return Err(ProxyError::ConfigError(format!(
                    "duplicate partition {}",
                    partition
                )));
            }
        }

        if self.log_start_index == 0 {
            return Err(ProxyError::ConfigError(
                "log_start_index must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
