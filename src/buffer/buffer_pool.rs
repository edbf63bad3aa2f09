use std::sync::Arc;

use log::trace;
use parking_lot::RwLock;

use crate::common::{Buffer, BufferTag, Result, PAGE_SIZE};
use crate::storage::{page_state, set_page_state, FileDescCache, PageState};

/// Memory of one slot, behind its physical latch.
pub type PageBlock = RwLock<Box<[u8; PAGE_SIZE]>>;

/// Page memory for every slot plus the block I/O that fills and drains it.
pub struct BufferPool {
    blocks: Vec<PageBlock>,
    files: Arc<FileDescCache>,
}

impl BufferPool {
    pub fn new(slot_count: usize, files: Arc<FileDescCache>) -> Self {
        Self {
            blocks: (0..slot_count)
                .map(|_| RwLock::new(Box::new([0u8; PAGE_SIZE])))
                .collect(),
            files,
        }
    }

    pub fn files(&self) -> &Arc<FileDescCache> {
        &self.files
    }

    pub fn block(&self, buffer: Buffer) -> &PageBlock {
        &self.blocks[buffer.as_usize()]
    }

    /// Fills the slot with the on-disk image of `tag`.
    pub fn read_block(&self, tag: &BufferTag, buffer: Buffer) -> Result<()> {
        let mut data = self.block(buffer).write();
        self.files
            .read_block(tag.object_id, tag.block_num, &mut data[..])?;
        trace!("read {} into {}", tag, buffer);
        Ok(())
    }

    /// Writes the slot back as `tag` when it is dirty and its table still
    /// exists. Returns whether a write happened.
    pub fn write_block(&self, tag: &BufferTag, buffer: Buffer) -> Result<bool> {
        let mut data = self.block(buffer).write();
        if page_state(&data[..]) != PageState::Dirty {
            return Ok(false);
        }
        if !self.files.table_file_exists(tag.object_id) {
            return Ok(false);
        }
        set_page_state(&mut data[..], PageState::Normal);
        if let Err(e) = self
            .files
            .write_block(tag.object_id, tag.block_num, &data[..])
        {
            set_page_state(&mut data[..], PageState::Dirty);
            return Err(e);
        }
        trace!("wrote {} from {}", tag, buffer);
        Ok(true)
    }

    pub fn is_dirty(&self, buffer: Buffer) -> bool {
        page_state(&self.block(buffer).read()[..]) == PageState::Dirty
    }

    pub fn set_state(&self, buffer: Buffer, state: PageState) {
        set_page_state(&mut self.block(buffer).write()[..], state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_block_only_when_dirty() {
        let dir = tempdir().unwrap();
        let files = Arc::new(FileDescCache::new(dir.path()).unwrap());
        files.create_table_file(1).unwrap();
        let pool = BufferPool::new(2, Arc::clone(&files));
        let tag = BufferTag::new(1, 0);

        pool.read_block(&tag, Buffer(0)).unwrap();
        assert!(!pool.write_block(&tag, Buffer(0)).unwrap());

        pool.block(Buffer(0)).write()[100] = 7;
        pool.set_state(Buffer(0), PageState::Dirty);
        assert!(pool.write_block(&tag, Buffer(0)).unwrap());
        assert!(!pool.is_dirty(Buffer(0)));
        assert!(!pool.write_block(&tag, Buffer(0)).unwrap());

        pool.read_block(&tag, Buffer(1)).unwrap();
        assert_eq!(pool.block(Buffer(1)).read()[100], 7);
        assert_eq!(files.num_writes(), 1);
    }

    #[test]
    fn test_write_block_skips_missing_table() {
        let dir = tempdir().unwrap();
        let files = Arc::new(FileDescCache::new(dir.path()).unwrap());
        let pool = BufferPool::new(1, files);
        pool.set_state(Buffer(0), PageState::Dirty);
        assert!(!pool.write_block(&BufferTag::new(77, 0), Buffer(0)).unwrap());
        assert!(pool.is_dirty(Buffer(0)));
    }
}
