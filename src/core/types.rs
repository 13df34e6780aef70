use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Position of a record in the shared log. The first record has index 1.
pub type LogIndex = u64;

/// Per-producer command counter, independent of the log's own index.
pub type WriteIndex = u64;

/// Identifier of one partition of a primitive.
///
/// Totally ordered so partition lists have a deterministic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(u32);

impl PartitionId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for PartitionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition-{}", self.0)
    }
}

/// Name of the logical object a session serves.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrimitiveName(String);

impl PrimitiveName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PrimitiveName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for PrimitiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation/event schema a primitive speaks, e.g. `map` or `counter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimitiveType(String);

impl PrimitiveType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PrimitiveType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection state of a single session or of a whole primitive.
///
/// `Closed` is the initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connected,
    Suspended,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "CLOSED",
            Self::Connected => "CONNECTED",
            Self::Suspended => "SUSPENDED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Mutates state; appended to the log in replicated mode.
    Command,
    /// Read-only; never touches the log.
    Query,
}

/// Identifies one named operation of a primitive and its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
    name: Cow<'static, str>,
    kind: OperationKind,
}

impl OperationId {
    pub const fn command(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind: OperationKind::Command,
        }
    }

    pub const fn query(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind: OperationKind::Query,
        }
    }

    pub fn new(name: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn is_command(&self) -> bool {
        self.kind == OperationKind::Command
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OperationKind::Command => write!(f, "command:{}", self.name),
            OperationKind::Query => write!(f, "query:{}", self.name),
        }
    }
}

/// An operation ready for submission: its id plus the encoded arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveOperation {
    pub id: OperationId,
    pub payload: Vec<u8>,
}

impl PrimitiveOperation {
    pub fn new(id: OperationId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }
}

/// Identity of a producer session in the log-replicated mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_ordering() {
        let mut partitions = vec![PartitionId::new(3), PartitionId::new(1), PartitionId::new(2)];
        partitions.sort();
        assert_eq!(
            partitions,
            vec![PartitionId::new(1), PartitionId::new(2), PartitionId::new(3)]
        );
        assert_eq!(PartitionId::new(7).to_string(), "partition-7");
    }

    #[test]
    fn test_operation_id_equality_ignores_storage() {
        const PUT: OperationId = OperationId::command("put");
        let decoded = OperationId::new("put", OperationKind::Command);
        assert_eq!(PUT, decoded);
        assert!(PUT.is_command());
        assert_ne!(PUT, OperationId::query("put"));
    }
}
