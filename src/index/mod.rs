mod btree;
mod cursor;
pub mod node;

pub use btree::{BTree, Row, MAX_VALUE_LEN};
pub use cursor::{BTreeIterator, Cursor};
