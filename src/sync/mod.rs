mod owner;
mod rwlock;
mod spinlock;
mod table_lock;
mod table_reg;

pub use owner::current_owner;
pub use rwlock::{RwLockEntry, RwLockMode};
pub(crate) use spinlock::Backoff;
pub use spinlock::{SpinLock, SpinLockGuard, SpinMutex, SpinMutexGuard};
pub use table_lock::TableLockRegistry;
pub use table_reg::TableRegistry;
