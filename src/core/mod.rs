pub mod error;
pub mod types;

pub use error::{ProxyError, Result};
pub use types::{
    ConnectionState, LogIndex, OperationId, OperationKind, PartitionId, PrimitiveName,
    PrimitiveOperation, PrimitiveType, SessionId, WriteIndex,
};
