//! Which workers currently have which tables open.

use log::trace;
use parking_lot::Mutex;

use super::owner::current_owner;
use crate::common::{Oid, OwnerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableRegEntry {
    oid: Oid,
    owner: OwnerId,
}

#[derive(Default)]
pub struct TableRegistry {
    entries: Mutex<Vec<TableRegEntry>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the calling worker uses `oid`. Registering twice is a no-op.
    pub fn try_register(&self, oid: Oid) {
        let entry = TableRegEntry {
            oid,
            owner: current_owner(),
        };
        let mut entries = self.entries.lock();
        if !entries.contains(&entry) {
            trace!("{} registered table {}", entry.owner, oid);
            entries.push(entry);
        }
    }

    /// Drops the calling worker's registration of `oid`.
    pub fn unregister(&self, oid: Oid) {
        let owner = current_owner();
        self.entries
            .lock()
            .retain(|e| !(e.oid == oid && e.owner == owner));
    }

    /// Drops every registration of the calling worker.
    pub fn unregister_all(&self) {
        let owner = current_owner();
        self.entries.lock().retain(|e| e.owner != owner);
    }

    pub fn is_shared_by_others(&self, oid: Oid) -> bool {
        let owner = current_owner();
        self.entries
            .lock()
            .iter()
            .any(|e| e.oid == oid && e.owner != owner)
    }

    pub fn is_registered(&self, oid: Oid) -> bool {
        let owner = current_owner();
        self.entries
            .lock()
            .iter()
            .any(|e| e.oid == oid && e.owner == owner)
    }
}
