use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};

use super::buffer_guard::PinnedBuffer;
use super::buffer_pool::{BufferPool, PageBlock};
use super::buffer_table::BufferTable;
use super::descriptor::{BufferDescriptor, Sweep};
use crate::common::{
    BlockNum, Buffer, BufferTag, Oid, Result, StorageConfig, StrataError, ZERO_OID,
};
use crate::storage::{FileDescCache, PageState};
use crate::sync::{Backoff, RwLockMode};

/// Counters describing buffer manager activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub reads: u64,
    pub writes: u64,
}

/// BufferManager maps table pages onto a fixed set of in-memory slots.
///
/// A page is reached with [`read_buffer`](Self::read_buffer), which pins its
/// slot until [`release_buffer`](Self::release_buffer). Pinned slots are never
/// evicted. Free slots are found by a clock sweep over the descriptors; a
/// slot is taken once its usage count has aged to zero while unpinned.
pub struct BufferManager {
    config: StorageConfig,
    descriptors: Vec<BufferDescriptor>,
    table: BufferTable,
    pool: BufferPool,
    /// Next slot the clock hand visits
    clock_hand: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BufferManager {
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let files = Arc::new(FileDescCache::new(&config.data_dir)?);
        let slot_count = config.slot_count;
        info!(
            "buffer manager ready: {} slots, data dir {}",
            slot_count,
            config.data_dir.display()
        );
        Ok(Self {
            descriptors: (0..slot_count)
                .map(|i| BufferDescriptor::new(Buffer(i as u32)))
                .collect(),
            table: BufferTable::new(slot_count),
            pool: BufferPool::new(slot_count, files),
            config,
            clock_hand: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn slot_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn buffer_table(&self) -> &BufferTable {
        &self.table
    }

    pub fn files(&self) -> &Arc<FileDescCache> {
        self.pool.files()
    }

    /// Returns the descriptor of `buffer`, checking the handle.
    pub fn descriptor(&self, buffer: Buffer) -> Result<&BufferDescriptor> {
        self.descriptors
            .get(buffer.as_usize())
            .ok_or(StrataError::InvalidBuffer(buffer))
    }

    fn desc(&self, buffer: Buffer) -> &BufferDescriptor {
        assert!(
            buffer.as_usize() < self.descriptors.len(),
            "{} out of range",
            buffer
        );
        &self.descriptors[buffer.as_usize()]
    }

    pub fn create_table(&self, oid: Oid) -> Result<()> {
        assert_ne!(oid, ZERO_OID, "the zero oid names no table");
        self.files().create_table_file(oid)
    }

    /// Returns the slot holding block `block_num` of `oid`, pinned.
    pub fn read_buffer(&self, oid: Oid, block_num: BlockNum) -> Result<Buffer> {
        if block_num < 0 {
            return Err(StrataError::InvalidBlock(block_num));
        }
        let tag = BufferTag::new(oid, block_num);
        if let Some(buffer) = self.table.lookup(&tag) {
            if self.desc(buffer).pin_if_tag(&tag) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(buffer);
            }
        }
        self.load_new_buffer(tag)
    }

    /// Like [`read_buffer`](Self::read_buffer), but the pin is dropped with
    /// the returned guard.
    pub fn pin(&self, oid: Oid, block_num: BlockNum) -> Result<PinnedBuffer<'_>> {
        let buffer = self.read_buffer(oid, block_num)?;
        Ok(PinnedBuffer::new(self, buffer))
    }

    fn load_new_buffer(&self, tag: BufferTag) -> Result<Buffer> {
        // The slot is claimed before the bucket of `tag` is taken, so a
        // loader never holds one bucket while waiting for another.
        let buffer = self.find_free_slot()?;
        let desc = self.desc(buffer);

        let mut bucket = self.table.lock_bucket(&tag);
        if let Some(existing) = bucket.lookup_without_lock(&tag) {
            if self.desc(existing).pin_if_tag(&tag) {
                desc.reset_claim();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(existing);
            }
            bucket.remove(&tag);
        }

        if let Err(e) = self.pool.read_block(&tag, buffer) {
            desc.reset_claim();
            return Err(e);
        }
        desc.assign(tag);
        bucket.insert(tag, buffer);
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(buffer)
    }

    fn clock_tick(&self) -> usize {
        let n = self.descriptors.len();
        let tick = self.clock_hand.fetch_add(1, Ordering::Relaxed);
        let victim = tick % n;
        if victim == 0 && tick > 0 {
            debug!("clock hand wrapped after {} ticks", tick);
        }
        victim
    }

    /// Runs the clock until a slot is claimed and detached from its old page.
    ///
    /// A pass that finds nothing counts against `eviction_rounds` only when
    /// every slot is pinned by a user. Slots claimed by other loaders, or
    /// still aging, will come free without anyone releasing a pin.
    fn find_free_slot(&self) -> Result<Buffer> {
        let rounds = self.config.eviction_rounds;
        let mut exhausted = 0;
        let mut backoff = Backoff::new();
        loop {
            for _ in 0..self.descriptors.len() {
                let desc = &self.descriptors[self.clock_tick()];
                match desc.sweep() {
                    Sweep::Skip => continue,
                    Sweep::Empty => return Ok(desc.buffer()),
                    Sweep::Victim(old) => {
                        if self.evict(desc, old)? {
                            return Ok(desc.buffer());
                        }
                    }
                }
            }
            if self.descriptors.iter().all(|d| d.is_held_by_user()) {
                exhausted += 1;
                if exhausted >= rounds {
                    warn!("no evictable slot after {} clock rounds", rounds);
                    return Err(StrataError::BufferPoolFull { rounds });
                }
            }
            backoff.snooze();
        }
    }

    /// Detaches a claimed victim from `old`: flushes it if dirty and drops
    /// its table entry. Returns false when a late pin took the victim back.
    fn evict(&self, desc: &BufferDescriptor, old: BufferTag) -> Result<bool> {
        let mut bucket = self.table.lock_bucket(&old);
        if !desc.invalidate_claim() {
            return Ok(false);
        }
        let flushed = self.pool.write_block(&old, desc.buffer());
        if bucket.lookup_without_lock(&old) == Some(desc.buffer()) {
            bucket.remove(&old);
        }
        if let Err(e) = flushed {
            desc.reset_claim();
            return Err(e);
        }
        self.evictions.fetch_add(1, Ordering::Relaxed);
        debug!("evicted {} from {}", old, desc.buffer());
        Ok(true)
    }

    pub fn release_buffer(&self, buffer: Buffer) {
        self.desc(buffer).unpin();
    }

    /// Adds a pin to an already pinned buffer.
    pub fn pin_buffer(&self, buffer: Buffer) {
        self.desc(buffer).pin();
    }

    pub fn lock_buffer(&self, buffer: Buffer, mode: RwLockMode) {
        self.desc(buffer).content_lock().acquire(mode);
    }

    pub fn unlock_buffer(&self, buffer: Buffer) {
        self.desc(buffer).content_lock().release();
    }

    pub fn upgrade_lock_buffer(&self, buffer: Buffer) {
        self.desc(buffer).content_lock().upgrade();
    }

    pub fn downgrade_lock_buffer(&self, buffer: Buffer) {
        self.desc(buffer).content_lock().downgrade();
    }

    pub fn get_lock_mode_buffer(&self, buffer: Buffer) -> RwLockMode {
        self.desc(buffer).content_lock().mode()
    }

    /// Page memory of a pinned buffer. Valid only while the pin is held.
    pub fn get_page(&self, buffer: Buffer) -> &PageBlock {
        self.desc(buffer);
        self.pool.block(buffer)
    }

    pub fn get_page_copy(&self, buffer: Buffer) -> Bytes {
        Bytes::copy_from_slice(&self.get_page(buffer).read()[..])
    }

    pub fn make_dirty(&self, buffer: Buffer) {
        self.desc(buffer);
        self.pool.set_state(buffer, PageState::Dirty);
    }

    pub fn make_normal(&self, buffer: Buffer) {
        self.desc(buffer);
        self.pool.set_state(buffer, PageState::Normal);
    }

    pub fn is_dirty(&self, buffer: Buffer) -> bool {
        self.desc(buffer);
        self.pool.is_dirty(buffer)
    }

    /// Writes a pinned buffer back if it is dirty.
    pub fn write_block(&self, buffer: Buffer) -> Result<bool> {
        match self.desc(buffer).tag() {
            Some(tag) => self.pool.write_block(&tag, buffer),
            None => Ok(false),
        }
    }

    /// Writes every dirty resident page back, returning how many were written.
    pub fn flush_all(&self) -> Result<usize> {
        let mut written = 0;
        for desc in &self.descriptors {
            let Some(tag) = desc.tag() else { continue };
            if !desc.pin_if_tag(&tag) {
                continue;
            }
            let result = self.pool.write_block(&tag, desc.buffer());
            desc.unpin();
            if result? {
                written += 1;
            }
        }
        info!("flushed {} dirty pages", written);
        Ok(written)
    }

    /// Forgets every resident page of `oid` without writing it, then removes
    /// the table file. Callers hold the table exclusively. Slots still pinned
    /// lose their page now and become free with their last release.
    pub fn drop_table(&self, oid: Oid) -> Result<()> {
        let mut freed = 0;
        for buffer in self.table.remove_all_for(oid) {
            if self.desc(buffer).invalidate_object(oid) {
                freed += 1;
            } else {
                warn!("{} of dropped table {} is still pinned", buffer, oid);
            }
        }
        self.files().remove_table_file(oid)?;
        info!("dropped table {} ({} resident pages freed)", oid, freed);
        Ok(())
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            reads: self.files().num_reads(),
            writes: self.files().num_writes(),
        }
    }
}
