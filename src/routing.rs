use crate::core::PartitionId;

/// Maps a routing key onto one partition of an ordered partition set.
///
/// Implementations must be pure: the same key and partition set always
/// yield the same partition. Calling `route` with an empty partition set
/// is a caller error and panics.
pub trait PartitionRouter: Send + Sync {
    fn route(&self, key: &[u8], partitions: &[PartitionId]) -> PartitionId;
}

/// Computes a stable 64-bit FNV-1a hash of a routing key.
pub fn stable_key_hash(key: &[u8]) -> u64 {
    let mut hash = 14695981039346656037u64;
    for byte in key {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

/// Routes by `hash(key) mod N` over the ordered partition list.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashRouter;

impl PartitionRouter for HashRouter {
    fn route(&self, key: &[u8], partitions: &[PartitionId]) -> PartitionId {
        assert!(!partitions.is_empty(), "cannot route over an empty partition set");
        let slot = stable_key_hash(key) % partitions.len() as u64;
        partitions[slot as usize]
    }
}

/// Jump consistent hashing (Lamping & Veach).
///
/// Growing the partition list from N to N+1 moves only ~1/(N+1) of the keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct JumpHashRouter;

impl JumpHashRouter {
    fn bucket(mut key: u64, buckets: usize) -> usize {
        let mut b: i64 = -1;
        let mut j: i64 = 0;
        while j < buckets as i64 {
            b = j;
            key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
            j = ((b + 1) as f64 * ((1u64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
        }
        b as usize
    }
}

impl PartitionRouter for JumpHashRouter {
    fn route(&self, key: &[u8], partitions: &[PartitionId]) -> PartitionId {
        assert!(!partitions.is_empty(), "cannot route over an empty partition set");
        partitions[Self::bucket(stable_key_hash(key), partitions.len())]
    }
}
