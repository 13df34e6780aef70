use crate::core::{ConnectionState, PartitionId};
use std::collections::BTreeMap;

/// Folds per-partition connection states into one primitive-wide state.
///
/// The worst observed state wins; `Connected` requires every partition to
/// be connected.
#[derive(Debug, Clone)]
pub struct AggregateState {
    partitions: BTreeMap<PartitionId, ConnectionState>,
    state: ConnectionState,
}

impl AggregateState {
    pub fn new(partitions: &[PartitionId]) -> Self {
        Self {
            partitions: partitions
                .iter()
                .map(|partition| (*partition, ConnectionState::Closed))
                .collect(),
            state: ConnectionState::Closed,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn partition_state(&self, partition: PartitionId) -> Option<ConnectionState> {
        self.partitions.get(&partition).copied()
    }

    /// Records a partition report and returns the new aggregate state if it
    /// changed.
    pub fn on_partition_change(
        &mut self,
        partition: PartitionId,
        next: ConnectionState,
    ) -> Option<ConnectionState> {
        let slot = self.partitions.get_mut(&partition)?;
        *slot = next;

        let transition = match next {
            ConnectionState::Connected => self.state != ConnectionState::Connected
                && self
                    .partitions
                    .values()
                    .all(|state| *state == ConnectionState::Connected),
            ConnectionState::Suspended => self.state == ConnectionState::Connected,
            ConnectionState::Closed => self.state != ConnectionState::Closed,
        };

        if transition {
            self.state = next;
            Some(next)
        } else {
            None
        }
    }
}
