//! Shared flow-keyed tables.
//!
//! Both the rule table (`FlowKey -> ShapingParams`) and the pacing state
//! (`FlowKey -> last departure ns`) are plain key/value maps with
//! last-writer-wins semantics per key. Readers never block writers; a
//! reader sees either the old or the new value, never a torn one.

use std::sync::Arc;

use dashmap::DashMap;
use emunet_core::wire::DEFAULT_TABLE_CAPACITY;
use emunet_core::{FlowKey, ShapingParams};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("table full ({0} entries)")]
    Full(usize),
    #[error("table backend error: {0}")]
    Backend(String),
}

/// A concurrent map keyed by flow identity.
pub trait FlowTable<V>: Send + Sync {
    fn lookup(&self, key: &FlowKey) -> Option<V>;

    /// Insert or overwrite.
    fn update(&self, key: FlowKey, value: V) -> Result<(), TableError>;

    /// Remove. Removing an absent key succeeds.
    fn remove(&self, key: &FlowKey) -> Result<(), TableError>;

    /// Snapshot of all entries, in no particular order.
    fn entries(&self) -> Result<Vec<(FlowKey, V)>, TableError>;
}

pub type RuleTable = dyn FlowTable<ShapingParams>;
pub type PacingTable = dyn FlowTable<u64>;

// ── In-process table ──────────────────────────────────────────────────────────

/// DashMap-backed table with a fixed entry capacity, like a kernel hash map.
pub struct MemoryFlowTable<V> {
    entries: DashMap<FlowKey, V>,
    capacity: usize,
}

impl<V> MemoryFlowTable<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for MemoryFlowTable<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_CAPACITY)
    }
}

impl<V: Copy + Send + Sync> FlowTable<V> for MemoryFlowTable<V> {
    fn lookup(&self, key: &FlowKey) -> Option<V> {
        self.entries.get(key).map(|v| *v)
    }

    fn update(&self, key: FlowKey, value: V) -> Result<(), TableError> {
        if let Some(mut slot) = self.entries.get_mut(&key) {
            *slot = value;
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(TableError::Full(self.capacity));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &FlowKey) -> Result<(), TableError> {
        self.entries.remove(key);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(FlowKey, V)>, TableError> {
        Ok(self.entries.iter().map(|e| (*e.key(), *e.value())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emunet_core::MacAddr;

    fn key(n: u8) -> FlowKey {
        FlowKey::new(u32::from(n), MacAddr::new([2, 0, 0, 0, 0, n]))
    }

    #[test]
    fn last_writer_wins() {
        let table: MemoryFlowTable<u64> = MemoryFlowTable::new(4);
        table.update(key(1), 10).unwrap();
        table.update(key(1), 20).unwrap();
        assert_eq!(table.lookup(&key(1)), Some(20));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn capacity_applies_to_new_keys_only() {
        let table: MemoryFlowTable<u64> = MemoryFlowTable::new(2);
        table.update(key(1), 1).unwrap();
        table.update(key(2), 2).unwrap();
        assert_eq!(table.update(key(3), 3), Err(TableError::Full(2)));
        // Overwriting an existing key still works at capacity.
        table.update(key(2), 22).unwrap();
        assert_eq!(table.lookup(&key(2)), Some(22));
    }

    #[test]
    fn remove_is_idempotent() {
        let table: MemoryFlowTable<ShapingParams> = MemoryFlowTable::default();
        table.remove(&key(9)).unwrap();
        table.update(key(9), ShapingParams::default()).unwrap();
        table.remove(&key(9)).unwrap();
        table.remove(&key(9)).unwrap();
        assert!(table.lookup(&key(9)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn entries_snapshot() {
        let table: MemoryFlowTable<u64> = MemoryFlowTable::new(8);
        for n in 1..=3 {
            table.update(key(n), u64::from(n) * 100).unwrap();
        }
        let mut all = table.entries().unwrap();
        all.sort_by_key(|(k, _)| k.ifindex());
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].1, 300);
    }
}
