// ============================================================================
// Primitive Proxy Library
// ============================================================================

//! Client access layer for partitioned, replicated primitives.
//!
//! A primitive (a map, a counter, ...) is split into partitions. Each
//! partition is reached through a [`ProxySession`] that runs in one of two
//! modes:
//!
//! - direct: every operation is a request/response call to the partition,
//! - log-replicated: commands go through a shared log and are replayed into
//!   a local copy of the state machine, which also answers queries.
//!
//! [`AggregateClient`] composes the sessions of every partition into one
//! logical primitive and [`StubDispatcher`] turns typed calls into encoded
//! operations.
//!
//! ```no_run
//! use primitive_proxy::{AggregateClient, DistributedMap, ExecutionMode};
//! use primitive_proxy::in_memory::InMemoryCluster;
//! use primitive_proxy::primitives::{MAP_TYPE, MapService};
//! use std::sync::Arc;
//!
//! # async fn run() -> primitive_proxy::Result<()> {
//! let cluster = InMemoryCluster::new().with_service::<MapService>(MAP_TYPE)?;
//! let config = DistributedMap::<String>::config("users", ExecutionMode::LogReplicated, 3);
//! let client = Arc::new(AggregateClient::open(config, &cluster)?);
//! client.connect().await?;
//!
//! let users = DistributedMap::<String>::new(client)?;
//! users.put("alice", &"admin".to_string()).await?;
//! assert_eq!(users.get("alice").await?, Some("admin".to_string()));
//! # Ok(())
//! # }
//! ```

extern crate self as primitive_proxy;

pub mod client;
pub mod codec;
pub mod config;
pub mod core;
pub mod in_memory;
pub mod primitives;
pub mod routing;
pub mod session;
pub mod stub;

pub use client::{AggregateClient, AggregateState, PrimitiveBackend};
pub use codec::Codec;
pub use config::{ExecutionMode, PrimitiveConfig};
pub use crate::core::{
    ConnectionState, LogIndex, OperationId, OperationKind, PartitionId, PrimitiveName,
    PrimitiveOperation, PrimitiveType, ProxyError, Result, SessionId, WriteIndex,
};
pub use primitive_proxy_derive::Operations;
pub use primitives::{AtomicCounter, DistributedMap};
pub use routing::{HashRouter, JumpHashRouter, PartitionRouter};
pub use session::{
    PartitionSession, ProxySession, ReplicatedLogSession, StateMachineService,
};
pub use stub::{PrimitiveOperations, StubDispatcher};
