//! Process-local collaborators: a shared log, partition-hosted state
//! machines and a backend wiring both into primitive clients.

mod cluster;
mod log;
mod transport;

pub use cluster::{InMemoryCluster, ServiceFactory};
pub use log::{InMemoryLog, InMemoryLogClient};
pub use transport::{InMemoryPartition, InMemoryPartitionTransport};
