use std::sync::Arc;

use bytes::Bytes;
use log::{debug, trace};

use super::cursor::{BTreeIterator, Cursor};
use super::node::{leaf_capacity, Node, NodeKind, HEADER_SIZE, INTERNAL_CAPACITY, ROOT_BLOCK};
use crate::buffer::{BufferManager, PinnedBuffer};
use crate::common::{Oid, Refer, Result, StrataError, PAGE_SIZE};
use crate::parallel::{parallel_compute, Task};
use crate::storage::{set_page_state, PageState};
use crate::sync::RwLockMode;

/// A row as returned by lookups and scans
pub type Row = (u64, Bytes);

/// Fewest cells a node may be configured to hold
const MIN_CAPACITY: usize = 3;

/// Longest value that still leaves room for `MIN_CAPACITY` leaf cells
pub const MAX_VALUE_LEN: usize = (PAGE_SIZE - HEADER_SIZE) / MIN_CAPACITY - 8;

/// B+tree keyed by `u64` with fixed-size values, one tree per table object.
///
/// Block 0 is always the root. Readers copy one node at a time under a
/// readers lock and never hold two locks. Structural changes hold the root
/// in writer mode for their whole duration, so at most one split runs per
/// tree; a reader with a stale route follows the leaf chain to the right
/// until it reaches the leaf whose high key covers its key.
pub struct BTree {
    manager: Arc<BufferManager>,
    oid: Oid,
    value_len: usize,
    leaf_capacity: usize,
    internal_capacity: usize,
}

impl BTree {
    /// Creates the table file of `oid` with an empty root leaf.
    pub fn create(manager: Arc<BufferManager>, oid: Oid, value_len: usize) -> Result<Self> {
        if value_len == 0 || value_len > MAX_VALUE_LEN {
            return Err(StrataError::ValueLength {
                expected: MAX_VALUE_LEN,
                actual: value_len,
            });
        }
        manager.create_table(oid)?;
        {
            let root = manager.pin(oid, ROOT_BLOCK as i64)?;
            let _lock = root.lock(RwLockMode::Writer);
            let mut data = root.write();
            let mut node = Node::new(&mut data[..]);
            node.init_leaf(value_len);
            node.set_next_block(ROOT_BLOCK + 1);
            set_page_state(&mut data[..], PageState::Dirty);
        }
        debug!("created btree {} with {}-byte values", oid, value_len);
        Ok(Self::with_layout(manager, oid, value_len))
    }

    /// Opens the existing tree of `oid`.
    pub fn open(manager: Arc<BufferManager>, oid: Oid) -> Result<Self> {
        let value_len = {
            let root = manager.pin(oid, ROOT_BLOCK as i64)?;
            let _lock = root.lock(RwLockMode::Readers);
            let data = root.read();
            let node = Node::new(&data[..]);
            node.kind()?;
            node.value_len()
        };
        if value_len == 0 {
            return Err(StrataError::IndexCorrupted(format!(
                "root of {} has no value length",
                oid
            )));
        }
        Ok(Self::with_layout(manager, oid, value_len))
    }

    fn with_layout(manager: Arc<BufferManager>, oid: Oid, value_len: usize) -> Self {
        Self {
            manager,
            oid,
            value_len,
            leaf_capacity: leaf_capacity(value_len),
            internal_capacity: INTERNAL_CAPACITY,
        }
    }

    /// Lowers the node fill limits. Both are clamped to what fits a page.
    pub fn with_capacity(mut self, leaf: usize, internal: usize) -> Self {
        self.leaf_capacity = leaf.clamp(MIN_CAPACITY, leaf_capacity(self.value_len));
        self.internal_capacity = internal.clamp(MIN_CAPACITY, INTERNAL_CAPACITY);
        self
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn value_len(&self) -> usize {
        self.value_len
    }

    pub fn manager(&self) -> &Arc<BufferManager> {
        &self.manager
    }

    fn pin(&self, block: u32) -> Result<PinnedBuffer<'_>> {
        self.manager.pin(self.oid, block as i64)
    }

    /// Snapshot of one node, taken under its readers lock.
    pub(crate) fn read_node(&self, block: u32) -> Result<Bytes> {
        let pinned = self.pin(block)?;
        let _lock = pinned.lock(RwLockMode::Readers);
        Ok(pinned.copy())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.value_len {
            return Err(StrataError::ValueLength {
                expected: self.value_len,
                actual: value.len(),
            });
        }
        Ok(())
    }

    /// Leaf responsible for `key`, with its snapshot.
    pub(crate) fn find_leaf(&self, key: u64) -> Result<(u32, Bytes)> {
        let mut block = ROOT_BLOCK;
        loop {
            let data = self.read_node(block)?;
            let node = Node::new(&data[..]);
            match node.kind()? {
                NodeKind::Internal => block = node.route(key),
                NodeKind::Leaf => match node.next_leaf() {
                    Some(next) if key > node.high_key() => block = next,
                    _ => return Ok((block, data)),
                },
            }
        }
    }

    /// Blocks from the root down to the leaf of `key`.
    fn path_to_leaf(&self, key: u64) -> Result<Vec<u32>> {
        let mut path = vec![ROOT_BLOCK];
        let mut block = ROOT_BLOCK;
        loop {
            let data = self.read_node(block)?;
            let node = Node::new(&data[..]);
            match node.kind()? {
                NodeKind::Internal => {
                    block = node.route(key);
                    path.push(block);
                }
                NodeKind::Leaf => return Ok(path),
            }
        }
    }

    /// Leftmost leaf below `block`.
    pub(crate) fn leftmost_leaf(&self, mut block: u32) -> Result<(u32, Bytes)> {
        loop {
            let data = self.read_node(block)?;
            let node = Node::new(&data[..]);
            match node.kind()? {
                NodeKind::Internal => block = node.first_child(),
                NodeKind::Leaf => return Ok((block, data)),
            }
        }
    }

    pub fn get(&self, key: u64) -> Result<Option<Bytes>> {
        let (_, data) = self.find_leaf(key)?;
        let node = Node::new(&data[..]);
        Ok(node
            .leaf_search(key)
            .ok()
            .map(|i| data.slice(node.leaf_value_range(i))))
    }

    pub fn contains(&self, key: u64) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Number of levels, counting the leaf level.
    pub fn height(&self) -> Result<usize> {
        let mut height = 1;
        let mut block = ROOT_BLOCK;
        loop {
            let data = self.read_node(block)?;
            let node = Node::new(&data[..]);
            match node.kind()? {
                NodeKind::Internal => {
                    height += 1;
                    block = node.first_child();
                }
                NodeKind::Leaf => return Ok(height),
            }
        }
    }

    pub fn insert(&self, key: u64, value: &[u8]) -> Result<()> {
        self.check_value(value)?;
        let (mut block, _) = self.find_leaf(key)?;
        loop {
            let pinned = self.pin(block)?;
            let _lock = pinned.lock(RwLockMode::Writer);
            let mut data = pinned.write();
            let mut node = Node::new(&mut data[..]);
            if node.kind()? != NodeKind::Leaf {
                // The root leaf split under us.
                drop(data);
                block = self.find_leaf(key)?.0;
                continue;
            }
            if let Some(next) = node.next_leaf().filter(|_| key > node.high_key()) {
                block = next;
                continue;
            }
            let pos = match node.leaf_search(key) {
                Ok(_) => return Err(StrataError::DuplicateKey(key)),
                Err(pos) => pos,
            };
            if node.cell_count() >= self.leaf_capacity {
                break;
            }
            node.leaf_insert(pos, key, value);
            set_page_state(&mut data[..], PageState::Dirty);
            return Ok(());
        }
        self.insert_with_split(key, value)
    }

    /// Insert path taken when the target leaf is full.
    fn insert_with_split(&self, key: u64, value: &[u8]) -> Result<()> {
        let root = self.pin(ROOT_BLOCK)?;
        let _structure = root.lock(RwLockMode::Writer);
        let path = self.path_to_leaf(key)?;
        let leaf_block = path[path.len() - 1];

        let (left, separator, right) = {
            let pinned = self.pin(leaf_block)?;
            let _lock = (leaf_block != ROOT_BLOCK).then(|| pinned.lock(RwLockMode::Writer));
            let mut data = pinned.write();
            let mut node = Node::new(&mut data[..]);
            let pos = match node.leaf_search(key) {
                Ok(_) => return Err(StrataError::DuplicateKey(key)),
                Err(pos) => pos,
            };
            if node.cell_count() < self.leaf_capacity {
                node.leaf_insert(pos, key, value);
                set_page_state(&mut data[..], PageState::Dirty);
                return Ok(());
            }

            let cell_size = 8 + self.value_len;
            let mut cells = node.leaf_cells_raw().to_vec();
            let mut cell = key.to_le_bytes().to_vec();
            cell.extend_from_slice(value);
            cells.splice(pos * cell_size..pos * cell_size, cell);

            let total = cells.len() / cell_size;
            let mid = total / 2;
            let (lower, upper) = cells.split_at(mid * cell_size);
            let mut sep_bytes = [0u8; 8];
            sep_bytes.copy_from_slice(&lower[(mid - 1) * cell_size..(mid - 1) * cell_size + 8]);
            let separator = u64::from_le_bytes(sep_bytes);

            if leaf_block == ROOT_BLOCK {
                let left = node.take_next_block();
                let right = node.take_next_block();
                self.write_new_node(left, |n| {
                    n.init_leaf(self.value_len);
                    n.set_leaf_cells_raw(lower);
                    n.set_next_leaf(Some(right));
                    n.set_high_key(separator);
                })?;
                self.write_new_node(right, |n| {
                    n.init_leaf(self.value_len);
                    n.set_leaf_cells_raw(upper);
                })?;
                let next_block = node.next_block();
                node.init_internal(self.value_len);
                node.set_next_block(next_block);
                node.set_internal_entries(&[(separator, left)], right);
                set_page_state(&mut data[..], PageState::Dirty);
                debug!("btree {}: root leaf split into {} and {}", self.oid, left, right);
                return Ok(());
            }

            let right = self.allocate(&root);
            let old_next = node.next_leaf();
            let old_high = node.high_key();
            self.write_new_node(right, |n| {
                n.init_leaf(self.value_len);
                n.set_leaf_cells_raw(upper);
                n.set_next_leaf(old_next);
                n.set_high_key(old_high);
            })?;
            node.set_leaf_cells_raw(lower);
            node.set_next_leaf(Some(right));
            node.set_high_key(separator);
            set_page_state(&mut data[..], PageState::Dirty);
            trace!("btree {}: leaf {} split, new right {}", self.oid, leaf_block, right);
            (leaf_block, separator, right)
        };

        self.insert_into_parent(&root, &path[..path.len() - 1], left, separator, right)
    }

    /// Links `right`, split off `left` at `separator`, into the ancestors
    /// listed in `path`, splitting them as needed.
    fn insert_into_parent(
        &self,
        root: &PinnedBuffer<'_>,
        path: &[u32],
        mut left: u32,
        mut separator: u64,
        mut right: u32,
    ) -> Result<()> {
        for &parent in path.iter().rev() {
            let pinned = self.pin(parent)?;
            let _lock = (parent != ROOT_BLOCK).then(|| pinned.lock(RwLockMode::Writer));
            let mut data = pinned.write();
            let mut node = Node::new(&mut data[..]);
            let (mut entries, mut right_child) = node.internal_entries();
            match entries.iter().position(|(_, child)| *child == left) {
                Some(i) => {
                    entries[i].1 = right;
                    entries.insert(i, (separator, left));
                }
                None if right_child == left => {
                    right_child = right;
                    entries.push((separator, left));
                }
                None => {
                    return Err(StrataError::IndexCorrupted(format!(
                        "block {} is not a child of {}",
                        left, parent
                    )))
                }
            }

            if entries.len() <= self.internal_capacity {
                node.set_internal_entries(&entries, right_child);
                set_page_state(&mut data[..], PageState::Dirty);
                return Ok(());
            }

            let mid = entries.len() / 2;
            let (up_key, mid_child) = entries[mid];
            let lower = &entries[..mid];
            let upper = &entries[mid + 1..];

            if parent == ROOT_BLOCK {
                let new_left = node.take_next_block();
                let new_right = node.take_next_block();
                self.write_new_node(new_left, |n| {
                    n.init_internal(self.value_len);
                    n.set_internal_entries(lower, mid_child);
                })?;
                self.write_new_node(new_right, |n| {
                    n.init_internal(self.value_len);
                    n.set_internal_entries(upper, right_child);
                })?;
                node.set_internal_entries(&[(up_key, new_left)], new_right);
                set_page_state(&mut data[..], PageState::Dirty);
                debug!(
                    "btree {}: root internal split into {} and {}",
                    self.oid, new_left, new_right
                );
                return Ok(());
            }

            let sibling = self.allocate(root);
            self.write_new_node(sibling, |n| {
                n.init_internal(self.value_len);
                n.set_internal_entries(upper, right_child);
            })?;
            node.set_internal_entries(lower, mid_child);
            set_page_state(&mut data[..], PageState::Dirty);
            trace!("btree {}: internal {} split, new right {}", self.oid, parent, sibling);

            left = parent;
            separator = up_key;
            right = sibling;
        }
        Err(StrataError::IndexCorrupted(format!(
            "split of block {} ran past the root",
            left
        )))
    }

    /// Takes the next unused block from the root header. The caller holds
    /// the root in writer mode and not its page latch.
    fn allocate(&self, root: &PinnedBuffer<'_>) -> u32 {
        let mut data = root.write();
        let block = Node::new(&mut data[..]).take_next_block();
        set_page_state(&mut data[..], PageState::Dirty);
        block
    }

    /// Formats a block nobody can reach yet.
    fn write_new_node<F>(&self, block: u32, init: F) -> Result<()>
    where
        F: FnOnce(&mut Node<&mut [u8]>),
    {
        let pinned = self.pin(block)?;
        let mut data = pinned.write();
        {
            let mut node = Node::new(&mut data[..]);
            init(&mut node);
        }
        set_page_state(&mut data[..], PageState::Dirty);
        Ok(())
    }

    /// Overwrites the value of an existing key in place.
    pub fn update(&self, key: u64, value: &[u8]) -> Result<()> {
        self.check_value(value)?;
        let (mut block, _) = self.find_leaf(key)?;
        loop {
            let pinned = self.pin(block)?;
            let _lock = pinned.lock(RwLockMode::Readers);
            let mut data = pinned.write();
            let mut node = Node::new(&mut data[..]);
            if node.kind()? != NodeKind::Leaf {
                drop(data);
                block = self.find_leaf(key)?.0;
                continue;
            }
            if let Some(next) = node.next_leaf().filter(|_| key > node.high_key()) {
                block = next;
                continue;
            }
            let pos = node
                .leaf_search(key)
                .map_err(|_| StrataError::KeyNotFound(key))?;
            node.leaf_set_value(pos, value);
            set_page_state(&mut data[..], PageState::Dirty);
            return Ok(());
        }
    }

    pub fn delete(&self, key: u64) -> Result<()> {
        let (mut block, _) = self.find_leaf(key)?;
        loop {
            let pinned = self.pin(block)?;
            let _lock = pinned.lock(RwLockMode::Writer);
            let mut data = pinned.write();
            let mut node = Node::new(&mut data[..]);
            if node.kind()? != NodeKind::Leaf {
                drop(data);
                block = self.find_leaf(key)?.0;
                continue;
            }
            if let Some(next) = node.next_leaf().filter(|_| key > node.high_key()) {
                block = next;
                continue;
            }
            let pos = node
                .leaf_search(key)
                .map_err(|_| StrataError::KeyNotFound(key))?;
            node.leaf_remove(pos);
            set_page_state(&mut data[..], PageState::Dirty);
            return Ok(());
        }
    }

    /// Every row in key order, following the leaf chain.
    pub fn scan(&self) -> Result<Vec<Row>> {
        let (_, first) = self.leftmost_leaf(ROOT_BLOCK)?;
        self.scan_range(first, None, None)
    }

    /// Rows with keys in `(lower, upper]`, walking the leaf chain from the
    /// snapshot `first`.
    fn scan_range(&self, first: Bytes, lower: Option<u64>, upper: Option<u64>) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut data = first;
        loop {
            let node = Node::new(&data[..]);
            for i in 0..node.cell_count() {
                let key = node.leaf_key(i);
                if lower.map_or(false, |l| key <= l) {
                    continue;
                }
                if upper.map_or(false, |u| key > u) {
                    return Ok(rows);
                }
                rows.push((key, data.slice(node.leaf_value_range(i))));
            }
            match node.next_leaf() {
                Some(next) if upper.map_or(true, |u| node.high_key() < u) => {
                    data = self.read_node(next)?;
                }
                _ => return Ok(rows),
            }
        }
    }

    /// Like [`scan`](Self::scan), with one task per child of the root run on
    /// `worker_num` workers.
    pub fn scan_parallel(&self, worker_num: usize) -> Result<Vec<Row>> {
        let data = self.read_node(ROOT_BLOCK)?;
        let root = Node::new(&data[..]);
        if root.kind()? == NodeKind::Leaf {
            return self.scan();
        }

        let (entries, right_child) = root.internal_entries();
        let mut ranges = Vec::with_capacity(entries.len() + 1);
        let mut lower = None;
        for (key, child) in entries {
            ranges.push((child, lower, Some(key)));
            lower = Some(key);
        }
        ranges.push((right_child, lower, None));

        let tasks: Vec<Task<'_, Vec<Row>>> = ranges
            .into_iter()
            .map(|(child, lower, upper)| {
                Box::new(move || {
                    let (_, first) = self.leftmost_leaf(child)?;
                    self.scan_range(first, lower, upper)
                }) as Task<'_, Vec<Row>>
            })
            .collect();
        let parts = parallel_compute(worker_num, tasks)?;
        Ok(parts.into_iter().flatten().collect())
    }

    /// Cursor at the first row with a key `>= key`.
    pub fn define_cursor(&self, key: u64) -> Result<Cursor> {
        let (block, data) = self.find_leaf(key)?;
        let node = Node::new(&data[..]);
        let cell = match node.leaf_search(key) {
            Ok(i) | Err(i) => i,
        };
        let mut cursor = Cursor::new(self.oid, block, cell as u32);
        if cell >= node.cell_count() {
            self.advance_past_end(&mut cursor)?;
        }
        Ok(cursor)
    }

    /// Cursor at the first row of the tree.
    pub fn first_cursor(&self) -> Result<Cursor> {
        let (block, data) = self.leftmost_leaf(ROOT_BLOCK)?;
        let mut cursor = Cursor::new(self.oid, block, 0);
        if Node::new(&data[..]).cell_count() == 0 {
            self.advance_past_end(&mut cursor)?;
        }
        Ok(cursor)
    }

    /// Row under `cursor`, or `None` once it is past the last row.
    pub fn cursor_row(&self, cursor: &Cursor) -> Result<Option<Row>> {
        self.check_cursor(cursor)?;
        let data = self.read_node(cursor.page_num)?;
        let node = Node::new(&data[..]);
        if node.kind()? != NodeKind::Leaf {
            return Err(StrataError::IndexCorrupted(format!(
                "cursor block {} is not a leaf",
                cursor.page_num
            )));
        }
        let cell = cursor.cell_num as usize;
        if cell >= node.cell_count() {
            return Ok(None);
        }
        Ok(Some((
            node.leaf_key(cell),
            data.slice(node.leaf_value_range(cell)),
        )))
    }

    /// Moves `cursor` to the next row. Returns false when there is none.
    pub fn advance(&self, cursor: &mut Cursor) -> Result<bool> {
        self.check_cursor(cursor)?;
        cursor.cell_num += 1;
        let data = self.read_node(cursor.page_num)?;
        if (cursor.cell_num as usize) < Node::new(&data[..]).cell_count() {
            return Ok(true);
        }
        self.advance_past_end(cursor)
    }

    /// Moves a cursor sitting past the last cell of its leaf to the first
    /// cell of the next non-empty leaf.
    fn advance_past_end(&self, cursor: &mut Cursor) -> Result<bool> {
        let mut data = self.read_node(cursor.page_num)?;
        loop {
            let node = Node::new(&data[..]);
            let Some(next) = node.next_leaf() else {
                cursor.cell_num = node.cell_count() as u32;
                return Ok(false);
            };
            data = self.read_node(next)?;
            cursor.page_num = next;
            cursor.cell_num = 0;
            if Node::new(&data[..]).cell_count() > 0 {
                return Ok(true);
            }
        }
    }

    fn check_cursor(&self, cursor: &Cursor) -> Result<()> {
        if cursor.oid != self.oid {
            return Err(StrataError::TableNotFound(cursor.oid));
        }
        Ok(())
    }

    /// Row a [`Refer`] points at.
    pub fn row_at(&self, refer: &Refer) -> Result<Option<Row>> {
        self.cursor_row(&Cursor::from_refer(*refer))
    }

    /// Iterates rows with keys `>= key` in order.
    pub fn iter_from(&self, key: u64) -> Result<BTreeIterator<'_>> {
        Ok(BTreeIterator::new(self, self.define_cursor(key)?))
    }

    pub fn iter(&self) -> Result<BTreeIterator<'_>> {
        Ok(BTreeIterator::new(self, self.first_cursor()?))
    }
}
