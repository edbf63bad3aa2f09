use bytes::Bytes;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use super::buffer_manager::BufferManager;
use crate::common::{Buffer, PAGE_SIZE};
use crate::sync::RwLockMode;

/// RAII pin on a buffer. The pin is released when the guard is dropped.
pub struct PinnedBuffer<'a> {
    manager: &'a BufferManager,
    buffer: Buffer,
}

impl<'a> PinnedBuffer<'a> {
    pub(crate) fn new(manager: &'a BufferManager, buffer: Buffer) -> Self {
        Self { manager, buffer }
    }

    pub fn buffer(&self) -> Buffer {
        self.buffer
    }

    /// Shared access to the page memory.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.manager.get_page(self.buffer).read()
    }

    /// Exclusive access to the page memory. Does not mark the page dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.manager.get_page(self.buffer).write()
    }

    pub fn copy(&self) -> Bytes {
        self.manager.get_page_copy(self.buffer)
    }

    pub fn mark_dirty(&self) {
        self.manager.make_dirty(self.buffer);
    }

    /// Takes the content lock; it is released before the pin.
    pub fn lock(&self, mode: RwLockMode) -> ContentGuard<'_> {
        self.manager.lock_buffer(self.buffer, mode);
        ContentGuard {
            manager: self.manager,
            buffer: self.buffer,
        }
    }
}

impl Drop for PinnedBuffer<'_> {
    fn drop(&mut self) {
        self.manager.release_buffer(self.buffer);
    }
}

/// RAII hold of a buffer content lock.
pub struct ContentGuard<'a> {
    manager: &'a BufferManager,
    buffer: Buffer,
}

impl ContentGuard<'_> {
    pub fn mode(&self) -> RwLockMode {
        self.manager.get_lock_mode_buffer(self.buffer)
    }

    pub fn upgrade(&self) {
        self.manager.upgrade_lock_buffer(self.buffer);
    }

    pub fn downgrade(&self) {
        self.manager.downgrade_lock_buffer(self.buffer);
    }
}

impl Drop for ContentGuard<'_> {
    fn drop(&mut self) {
        self.manager.unlock_buffer(self.buffer);
    }
}
