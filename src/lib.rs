//! Strata - the shared-memory storage core of a small relational engine
//!
//! Table pages are cached in a fixed set of buffer slots shared by every
//! worker thread. Access is coordinated by a small family of locks, and a
//! paged B+tree stores each table's rows.
//!
//! # Architecture
//!
//! - **Sync** (`sync`): locking primitives
//!   - `SpinLock` / `SpinMutex`: test-and-set locks with spin-then-sleep backoff
//!   - `RwLockEntry`: owner-aware readers/writer lock with upgrade and downgrade
//!   - `TableLockRegistry` / `TableRegistry`: exclusive table locks and
//!     the record of which worker has which table open
//!
//! - **Storage** (`storage`): one file per table, a cache of open handles and
//!   block I/O with zero-fill past EOF
//!
//! - **Buffer** (`buffer`): the buffer manager
//!   - `BufferTable`: tag to slot hash table with per-bucket latches
//!   - `BufferDescriptor`: per-slot pin state and content lock
//!   - `BufferManager`: lookup, clock-sweep replacement, pinning, write-back
//!   - `PinnedBuffer` / `ContentGuard`: RAII pin and lock holders
//!
//! - **Index** (`index`): B+tree over `u64` keys with fixed-size values,
//!   cursors and parallel scans
//!
//! - **Parallel** (`parallel`): fixed-size worker pool
//!
//! # Example
//!
//! ```rust,no_run
//! use strata::{Engine, StorageConfig};
//!
//! let engine = Engine::new(StorageConfig::new("data").with_slot_count(64)).unwrap();
//! let users = engine.create_table(1, 8).unwrap();
//! users.insert(42, &7u64.to_le_bytes()).unwrap();
//! assert!(users.get(42).unwrap().is_some());
//! engine.shutdown().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod engine;
pub mod index;
pub mod parallel;
pub mod storage;
pub mod sync;

// Re-export commonly used types at the crate root
pub use buffer::{BufferManager, PinnedBuffer};
pub use common::{
    init_log, BlockNum, Buffer, BufferTag, Oid, OwnerId, Refer, Result, StorageConfig,
    StrataError,
};
pub use engine::Engine;
pub use index::{BTree, Cursor};
pub use sync::{RwLockEntry, RwLockMode};
