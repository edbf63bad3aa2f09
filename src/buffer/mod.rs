mod buffer_guard;
mod buffer_manager;
mod buffer_pool;
mod buffer_table;
mod descriptor;

pub use buffer_guard::{ContentGuard, PinnedBuffer};
pub use buffer_manager::{BufferManager, BufferStats};
pub use buffer_pool::PageBlock;
pub use buffer_table::{BucketGuard, BufferTable, BufferTableEntry};
pub use descriptor::{BufferDescriptor, BufferStatus, DescriptorState};
