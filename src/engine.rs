use std::sync::Arc;

use log::info;

use crate::buffer::BufferManager;
use crate::common::{Oid, Result, StorageConfig};
use crate::index::BTree;
use crate::sync::{TableLockRegistry, TableRegistry};

/// Owns the shared storage state: the buffer manager, the exclusive table
/// locks and the record of which worker uses which table.
pub struct Engine {
    manager: Arc<BufferManager>,
    table_locks: TableLockRegistry,
    registry: TableRegistry,
}

impl Engine {
    pub fn new(config: StorageConfig) -> Result<Self> {
        Ok(Self {
            manager: Arc::new(BufferManager::new(config)?),
            table_locks: TableLockRegistry::new(),
            registry: TableRegistry::new(),
        })
    }

    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    pub fn table_locks(&self) -> &TableLockRegistry {
        &self.table_locks
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Creates table `oid` and registers the calling worker as its user.
    pub fn create_table(&self, oid: Oid, value_len: usize) -> Result<BTree> {
        self.table_locks.check_table_locked(oid);
        let tree = BTree::create(Arc::clone(&self.manager), oid, value_len)?;
        self.registry.try_register(oid);
        Ok(tree)
    }

    /// Opens table `oid`, waiting while it is held exclusively.
    pub fn open_table(&self, oid: Oid) -> Result<BTree> {
        self.table_locks.check_table_locked(oid);
        self.registry.try_register(oid);
        BTree::open(Arc::clone(&self.manager), oid).map_err(|e| {
            self.registry.unregister(oid);
            e
        })
    }

    pub fn close_table(&self, oid: Oid) {
        self.registry.unregister(oid);
    }

    /// Drops table `oid` once every other worker has closed it.
    pub fn drop_table(&self, oid: Oid) -> Result<()> {
        self.registry.unregister(oid);
        self.table_locks.capture_table(&self.registry, oid);
        let dropped = self.manager.drop_table(oid);
        self.table_locks.release_table(oid)?;
        dropped
    }

    /// Writes every dirty page back and forgets the calling worker's tables.
    pub fn shutdown(&self) -> Result<usize> {
        self.registry.unregister_all();
        let written = self.manager.flush_all()?;
        info!("engine shut down, {} pages written", written);
        Ok(written)
    }
}
