//! Hash table mapping page tags to the buffer slot holding them.
//!
//! Each bucket is a chain guarded by its own latch. Lookups take it shared;
//! the load path takes it exclusively and keeps it across the check, the
//! slot replacement and the insert.

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::common::hash::oid_hash;
use crate::common::{Buffer, BufferTag, Oid};

/// Multiplier spreading block numbers before they are folded into the oid
const BLOCK_SPREAD: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTableEntry {
    pub tag: BufferTag,
    pub buffer: Buffer,
}

pub struct BufferTable {
    buckets: Vec<RwLock<Vec<BufferTableEntry>>>,
}

impl BufferTable {
    pub fn new(bucket_count: usize) -> Self {
        assert!(bucket_count > 0, "buffer table needs at least one bucket");
        Self {
            buckets: (0..bucket_count).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_index(&self, tag: &BufferTag) -> usize {
        let mixed = tag.object_id ^ (tag.block_num as u64).wrapping_mul(BLOCK_SPREAD);
        oid_hash(mixed, self.buckets.len())
    }

    pub fn lookup(&self, tag: &BufferTag) -> Option<Buffer> {
        let chain = self.buckets[self.bucket_index(tag)].read();
        find_in(&chain, tag)
    }

    /// Takes the bucket of `tag` exclusively.
    pub fn lock_bucket(&self, tag: &BufferTag) -> BucketGuard<'_> {
        BucketGuard {
            chain: self.buckets[self.bucket_index(tag)].write(),
        }
    }

    pub fn insert(&self, tag: BufferTag, buffer: Buffer) {
        self.lock_bucket(&tag).insert(tag, buffer);
    }

    pub fn remove(&self, tag: &BufferTag) -> bool {
        self.lock_bucket(tag).remove(tag)
    }

    /// Removes every entry of object `oid`, returning the freed slots.
    pub fn remove_all_for(&self, oid: Oid) -> Vec<Buffer> {
        let mut removed = Vec::new();
        for bucket in &self.buckets {
            let mut chain = bucket.write();
            chain.retain(|entry| {
                if entry.tag.object_id == oid {
                    removed.push(entry.buffer);
                    false
                } else {
                    true
                }
            });
        }
        removed
    }

    /// Total number of entries across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn find_in(chain: &[BufferTableEntry], tag: &BufferTag) -> Option<Buffer> {
    chain
        .iter()
        .find(|entry| entry.tag == *tag)
        .map(|entry| entry.buffer)
}

/// Exclusive hold on one bucket chain.
pub struct BucketGuard<'a> {
    chain: RwLockWriteGuard<'a, Vec<BufferTableEntry>>,
}

impl BucketGuard<'_> {
    /// Looks `tag` up in the held bucket.
    pub fn lookup_without_lock(&self, tag: &BufferTag) -> Option<Buffer> {
        find_in(&self.chain, tag)
    }

    /// Appends an entry at the chain tail.
    ///
    /// # Panics
    ///
    /// If `tag` already has an entry.
    pub fn insert(&mut self, tag: BufferTag, buffer: Buffer) {
        assert!(
            find_in(&self.chain, &tag).is_none(),
            "duplicate buffer table entry for {}",
            tag
        );
        self.chain.push(BufferTableEntry { tag, buffer });
    }

    pub fn remove(&mut self, tag: &BufferTag) -> bool {
        match self.chain.iter().position(|entry| entry.tag == *tag) {
            Some(pos) => {
                self.chain.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lookup_remove() {
        let table = BufferTable::new(16);
        let tag = BufferTag::new(1, 4);
        assert_eq!(table.lookup(&tag), None);
        table.insert(tag, Buffer(3));
        assert_eq!(table.lookup(&tag), Some(Buffer(3)));
        assert!(table.remove(&tag));
        assert!(!table.remove(&tag));
        assert!(table.is_empty());
    }

    #[test]
    fn test_chains_in_one_bucket() {
        let table = BufferTable::new(1);
        for block in 0..10 {
            table.insert(BufferTag::new(2, block), Buffer(block as u32));
        }
        assert!(table.remove(&BufferTag::new(2, 5)));
        for block in 0..10 {
            let expected = if block == 5 { None } else { Some(Buffer(block as u32)) };
            assert_eq!(table.lookup(&BufferTag::new(2, block)), expected);
        }
    }

    #[test]
    #[should_panic(expected = "duplicate")]
    fn test_duplicate_insert_panics() {
        let table = BufferTable::new(4);
        let tag = BufferTag::new(1, 1);
        table.insert(tag, Buffer(0));
        table.insert(tag, Buffer(1));
    }

    #[test]
    fn test_bucket_guard_lookup_and_remove() {
        let table = BufferTable::new(4);
        let tag = BufferTag::new(9, 0);
        let mut guard = table.lock_bucket(&tag);
        guard.insert(tag, Buffer(2));
        assert_eq!(guard.lookup_without_lock(&tag), Some(Buffer(2)));
        assert!(guard.remove(&tag));
        assert_eq!(guard.lookup_without_lock(&tag), None);
        drop(guard);
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_all_for() {
        let table = BufferTable::new(8);
        for block in 0..5 {
            table.insert(BufferTag::new(1, block), Buffer(block as u32));
            table.insert(BufferTag::new(2, block), Buffer(10 + block as u32));
        }
        let mut removed = table.remove_all_for(1);
        removed.sort();
        assert_eq!(removed, (0..5).map(Buffer).collect::<Vec<_>>());
        assert_eq!(table.len(), 5);
    }
}
