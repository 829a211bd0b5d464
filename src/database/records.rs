//! Per-process record store
//!
//! A fixed number of hash buckets, each a singly-linked chain threaded
//! through a node arena by index. Deleted nodes go onto a free chain and
//! are handed back out by the next insert, so steady-state churn never
//! touches the heap.

use crate::kinds::{ResourceKind, VidMemClass};
use serde::{Deserialize, Serialize};

/// One tracked allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Category of the allocation
    pub kind: ResourceKind,
    /// Opaque pointer-sized key the driver identifies the resource by
    pub owner_key: u64,
    /// Opaque physical address token
    pub physical: u64,
    /// Size in bytes
    pub bytes: u64,
    /// Surface/pool the bytes were accounted under (video memory only)
    pub class: Option<VidMemClass>,
}

impl ResourceRecord {
    /// Record for `bytes` of `kind` identified by `owner_key`
    pub fn new(kind: ResourceKind, owner_key: u64, bytes: u64) -> Self {
        Self {
            kind,
            owner_key,
            physical: 0,
            bytes,
            class: None,
        }
    }

    /// Attach a physical address token
    pub fn with_physical(mut self, physical: u64) -> Self {
        self.physical = physical;
        self
    }

    /// Attach a video memory sub-classification
    pub fn with_class(mut self, class: VidMemClass) -> Self {
        self.class = Some(class);
        self
    }

    /// Check the record identity
    pub fn matches(&self, kind: ResourceKind, owner_key: u64) -> bool {
        self.kind == kind && self.owner_key == owner_key
    }
}

#[derive(Debug, Clone)]
struct RecordNode {
    record: ResourceRecord,
    next: Option<usize>,
}

/// Hash table of [`ResourceRecord`]s keyed by owner key
#[derive(Debug, Clone)]
pub struct RecordStore {
    buckets: Vec<Option<usize>>,
    nodes: Vec<RecordNode>,
    free: Option<usize>,
    free_len: usize,
    len: usize,
}

impl RecordStore {
    /// Create an empty store with `buckets` chains
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: vec![None; buckets.max(1)],
            nodes: Vec::new(),
            free: None,
            free_len: 0,
            len: 0,
        }
    }

    /// Bucket an owner key hashes into
    pub fn slot_for(&self, owner_key: u64) -> usize {
        (owner_key % self.buckets.len() as u64) as usize
    }

    /// Link `record` at the head of its bucket and return its node index.
    ///
    /// No duplicate check happens here.
    pub fn insert(&mut self, record: ResourceRecord) -> usize {
        let slot = self.slot_for(record.owner_key);
        let head = self.buckets[slot];

        let index = match self.free {
            Some(index) => {
                self.free = self.nodes[index].next;
                self.free_len -= 1;
                self.nodes[index] = RecordNode { record, next: head };
                index
            }
            None => {
                self.nodes.push(RecordNode { record, next: head });
                self.nodes.len() - 1
            }
        };

        self.buckets[slot] = Some(index);
        self.len += 1;
        index
    }

    /// Unlink the record matching (kind, owner key) and return it
    pub fn delete(&mut self, kind: ResourceKind, owner_key: u64) -> Option<ResourceRecord> {
        let slot = self.slot_for(owner_key);
        let mut previous: Option<usize> = None;
        let mut cursor = self.buckets[slot];

        while let Some(index) = cursor {
            if self.nodes[index].record.matches(kind, owner_key) {
                break;
            }
            previous = Some(index);
            cursor = self.nodes[index].next;
        }

        let index = cursor?;
        let next = self.nodes[index].next;
        match previous {
            None => self.buckets[slot] = next,
            Some(previous) => self.nodes[previous].next = next,
        }

        self.nodes[index].next = self.free;
        self.free = Some(index);
        self.free_len += 1;
        self.len -= 1;

        Some(self.nodes[index].record)
    }

    /// Copy of the record matching (kind, owner key)
    pub fn find(&self, kind: ResourceKind, owner_key: u64) -> Option<ResourceRecord> {
        let mut cursor = self.buckets[self.slot_for(owner_key)];
        while let Some(index) = cursor {
            let node = &self.nodes[index];
            if node.record.matches(kind, owner_key) {
                return Some(node.record);
            }
            cursor = node.next;
        }
        None
    }

    /// Check whether a record matching (kind, owner key) exists
    pub fn contains(&self, kind: ResourceKind, owner_key: u64) -> bool {
        self.find(kind, owner_key).is_some()
    }

    /// Live records in bucket order
    pub fn iter(&self) -> RecordIter<'_> {
        RecordIter {
            store: self,
            bucket: 0,
            cursor: None,
        }
    }

    /// Unlink every live record and hand the copies back
    pub fn drain(&mut self) -> Vec<ResourceRecord> {
        let records = self.iter().copied().collect();
        self.clear();
        records
    }

    /// Return every live node to the free chain
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.free = None;
        for index in (0..self.nodes.len()).rev() {
            self.nodes[index].next = self.free;
            self.free = Some(index);
        }
        self.free_len = self.nodes.len();
        self.len = 0;
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of recycled nodes waiting for reuse
    pub fn free_len(&self) -> usize {
        self.free_len
    }

    /// Total nodes ever allocated from the heap
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }
}

/// Iterator over live records, see [`RecordStore::iter`]
pub struct RecordIter<'a> {
    store: &'a RecordStore,
    bucket: usize,
    cursor: Option<usize>,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = &'a ResourceRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(index) = self.cursor {
                let node = &self.store.nodes[index];
                self.cursor = node.next;
                return Some(&node.record);
            }
            if self.bucket >= self.store.buckets.len() {
                return None;
            }
            self.cursor = self.store.buckets[self.bucket];
            self.bucket += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: ResourceKind, owner_key: u64, bytes: u64) -> ResourceRecord {
        ResourceRecord {
            kind,
            owner_key,
            physical: 0,
            bytes,
            class: None,
        }
    }

    #[test]
    fn test_insert_find_delete() {
        let mut store = RecordStore::new(8);
        store.insert(record(ResourceKind::NonPaged, 0x1000, 4096));

        let found = store.find(ResourceKind::NonPaged, 0x1000).unwrap();
        assert_eq!(found.bytes, 4096);

        let deleted = store.delete(ResourceKind::NonPaged, 0x1000).unwrap();
        assert_eq!(deleted.bytes, 4096);
        assert!(store.find(ResourceKind::NonPaged, 0x1000).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_kind_is_part_of_identity() {
        let mut store = RecordStore::new(8);
        store.insert(record(ResourceKind::NonPaged, 0x40, 1));
        store.insert(record(ResourceKind::Contiguous, 0x40, 2));

        assert_eq!(store.delete(ResourceKind::Contiguous, 0x40).unwrap().bytes, 2);
        assert_eq!(store.find(ResourceKind::NonPaged, 0x40).unwrap().bytes, 1);
        assert!(store.delete(ResourceKind::Context, 0x40).is_none());
    }

    #[test]
    fn test_delete_from_middle_of_chain() {
        let mut store = RecordStore::new(4);
        // 0x0, 0x4 and 0x8 all hash into bucket 0.
        for key in [0x0u64, 0x4, 0x8] {
            store.insert(record(ResourceKind::Signal, key, key));
        }
        assert_eq!(store.slot_for(0x4), store.slot_for(0x8));

        assert!(store.delete(ResourceKind::Signal, 0x4).is_some());
        assert!(store.find(ResourceKind::Signal, 0x0).is_some());
        assert!(store.find(ResourceKind::Signal, 0x8).is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_freed_nodes_are_reused() {
        let mut store = RecordStore::new(8);
        for key in 0..16u64 {
            store.insert(record(ResourceKind::MapMemory, key, 1));
        }
        for key in 0..16u64 {
            store.delete(ResourceKind::MapMemory, key).unwrap();
        }
        assert_eq!(store.free_len(), 16);

        for key in 100..110u64 {
            store.insert(record(ResourceKind::MapMemory, key, 1));
        }
        assert_eq!(store.capacity(), 16);
        assert_eq!(store.free_len(), 6);
    }

    #[test]
    fn test_drain_empties_store() {
        let mut store = RecordStore::new(4);
        store.insert(record(ResourceKind::Context, 0x1, 10));
        store.insert(record(ResourceKind::Context, 0x5, 20));

        let mut drained: Vec<u64> = store.drain().iter().map(|r| r.owner_key).collect();
        drained.sort_unstable();
        assert_eq!(drained, vec![0x1, 0x5]);
        assert!(store.is_empty());
        assert_eq!(store.free_len(), 2);
        assert!(store.drain().is_empty());
    }

    #[test]
    fn test_iter_and_clear() {
        let mut store = RecordStore::new(3);
        for key in 1..=5u64 {
            store.insert(record(ResourceKind::CommandBuffer, key, key));
        }
        let total: u64 = store.iter().map(|r| r.bytes).sum();
        assert_eq!(total, 15);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.iter().count(), 0);
        assert_eq!(store.free_len(), 5);
    }
}
