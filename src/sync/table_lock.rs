//! Exclusive per-table locks for whole-table operations such as drop.
//!
//! Ordinary readers and writers only check that no exclusive lock is held;
//! they never take one.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;

use super::spinlock::SpinLock;
use super::table_reg::TableRegistry;
use crate::common::{Oid, Result, StrataError, ZERO_OID};

/// Poll interval while waiting for other users of a captured table to leave
const CAPTURE_POLL: Duration = Duration::from_micros(100);

struct TableLockEntity {
    object_id: Oid,
    lock: SpinLock,
}

#[derive(Default)]
pub struct TableLockRegistry {
    entities: Mutex<HashMap<Oid, Arc<TableLockEntity>>>,
}

impl TableLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, oid: Oid) -> Option<Arc<TableLockEntity>> {
        self.entities.lock().get(&oid).cloned()
    }

    fn find_or_register(&self, oid: Oid) -> Arc<TableLockEntity> {
        let mut entities = self.entities.lock();
        Arc::clone(entities.entry(oid).or_insert_with(|| {
            debug!("registering table lock for oid {}", oid);
            Arc::new(TableLockEntity {
                object_id: oid,
                lock: SpinLock::new(),
            })
        }))
    }

    /// Blocks while some worker holds `oid` exclusively.
    pub fn check_table_locked(&self, oid: Oid) {
        assert_ne!(oid, ZERO_OID, "table lock on the zero oid");
        if let Some(entity) = self.find(oid) {
            entity.lock.wait_for_lock();
        }
    }

    /// Takes the exclusive lock of `oid`, registering it on first use.
    /// Not reentrant.
    pub fn try_acquire_table(&self, oid: Oid) {
        assert_ne!(oid, ZERO_OID, "table lock on the zero oid");
        let entity = self.find_or_register(oid);
        entity.lock.acquire();
        debug!("table {} locked exclusively", entity.object_id);
    }

    pub fn try_release_table(&self, oid: Oid) -> Result<()> {
        let entity = self.find(oid).ok_or(StrataError::TableNotFound(oid))?;
        entity.lock.release();
        debug!("table {} unlocked", entity.object_id);
        Ok(())
    }

    pub fn is_table_locked(&self, oid: Oid) -> bool {
        self.find(oid).map_or(false, |e| e.lock.is_locked())
    }

    /// Takes the exclusive lock, then waits until no other worker has the
    /// table registered as in use.
    pub fn capture_table(&self, registry: &TableRegistry, oid: Oid) {
        self.try_acquire_table(oid);
        let mut waited = false;
        while registry.is_shared_by_others(oid) {
            if !waited {
                info!("waiting for other users of table {} to leave", oid);
                waited = true;
            }
            thread::sleep(CAPTURE_POLL);
        }
    }

    pub fn release_table(&self, oid: Oid) -> Result<()> {
        self.try_release_table(oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_check_unregistered_table_returns() {
        let locks = TableLockRegistry::new();
        locks.check_table_locked(7);
        assert!(!locks.is_table_locked(7));
    }

    #[test]
    fn test_release_unknown_table_errors() {
        let locks = TableLockRegistry::new();
        assert!(matches!(
            locks.try_release_table(9),
            Err(StrataError::TableNotFound(9))
        ));
    }

    #[test]
    fn test_check_blocks_until_release() {
        let locks = Arc::new(TableLockRegistry::new());
        locks.try_acquire_table(3);
        assert!(locks.is_table_locked(3));

        let passed = Arc::new(AtomicBool::new(false));
        let checker = {
            let locks = Arc::clone(&locks);
            let passed = Arc::clone(&passed);
            thread::spawn(move || {
                locks.check_table_locked(3);
                passed.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!passed.load(Ordering::SeqCst));
        locks.try_release_table(3).unwrap();
        checker.join().unwrap();
        assert!(passed.load(Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "zero oid")]
    fn test_zero_oid_rejected() {
        TableLockRegistry::new().try_acquire_table(ZERO_OID);
    }
}
