use std::fmt;

/// Object identifier - names a table (or any other object with its own file)
pub type Oid = u64;

/// Block number inside a table file. Block 0 is the root node.
pub type BlockNum = i64;

/// Zero oid, never assigned to a real object
pub const ZERO_OID: Oid = 0;

/// Identifies one page uniquely: which object and which block within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferTag {
    pub object_id: Oid,
    pub block_num: BlockNum,
}

impl BufferTag {
    pub fn new(object_id: Oid, block_num: BlockNum) -> Self {
        Self {
            object_id,
            block_num,
        }
    }
}

impl fmt::Display for BufferTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferTag({}, {})", self.object_id, self.block_num)
    }
}

/// Buffer handle - an index into the slot array, not an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Buffer(pub u32);

impl Buffer {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({})", self.0)
    }
}

/// Identity of a lock owner. Plays the role a process id plays when workers
/// are separate processes; here every worker thread gets its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

impl OwnerId {
    /// Nobody. Stored in a lock that has no writer.
    pub const NONE: OwnerId = OwnerId(0);
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.0)
    }
}

/// Refer - locates one row version on disk: (object, page, cell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Refer {
    pub oid: Oid,
    pub page_num: u32,
    pub cell_num: u32,
}

impl Refer {
    pub fn new(oid: Oid, page_num: u32, cell_num: u32) -> Self {
        Self {
            oid,
            page_num,
            cell_num,
        }
    }
}

impl PartialOrd for Refer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        // Refers of different objects have no order.
        if self.oid != other.oid {
            return None;
        }
        Some(
            self.page_num
                .cmp(&other.page_num)
                .then(self.cell_num.cmp(&other.cell_num)),
        )
    }
}
