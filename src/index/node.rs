//! On-page layout of B-tree nodes.
//!
//! Header (32 bytes):
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 1    | page state, owned by the buffer layer  |
//! | 1      | 1    | node kind                              |
//! | 2      | 2    | cell count                             |
//! | 4      | 2    | value length of the tree               |
//! | 6      | 4    | next leaf block                        |
//! | 10     | 4    | rightmost child block                  |
//! | 14     | 4    | next unused block (root only)          |
//! | 18     | 8    | high key of a leaf                     |
//!
//! Leaf cells are `key: u64 | value: [u8; value_len]`, sorted by key.
//! Internal cells are `key: u64 | child: u32`; a child holds keys `<=` its
//! key and the rightmost child holds keys above the last one.

use std::ops::Range;

use crate::common::{Result, StrataError, PAGE_SIZE};

pub const HEADER_SIZE: usize = 32;

const KIND_OFFSET: usize = 1;
const CELL_COUNT_OFFSET: usize = 2;
const VALUE_LEN_OFFSET: usize = 4;
const NEXT_LEAF_OFFSET: usize = 6;
const RIGHT_CHILD_OFFSET: usize = 10;
const NEXT_BLOCK_OFFSET: usize = 14;
const HIGH_KEY_OFFSET: usize = 18;

const KEY_SIZE: usize = 8;
const CHILD_SIZE: usize = 4;
const INTERNAL_CELL_SIZE: usize = KEY_SIZE + CHILD_SIZE;

/// Marks an absent block link
pub const NO_BLOCK: u32 = u32::MAX;

/// The root always lives in block 0
pub const ROOT_BLOCK: u32 = 0;

/// Most cells an internal node can hold
pub const INTERNAL_CAPACITY: usize = (PAGE_SIZE - HEADER_SIZE) / INTERNAL_CELL_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    Leaf = 1,
    Internal = 2,
}

/// Most cells a leaf with `value_len`-byte values can hold.
pub fn leaf_capacity(value_len: usize) -> usize {
    (PAGE_SIZE - HEADER_SIZE) / (KEY_SIZE + value_len)
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&data[offset..offset + 2]);
    u16::from_le_bytes(bytes)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn link(value: u32) -> Option<u32> {
    (value != NO_BLOCK).then_some(value)
}

/// A node view over page bytes: read-only over `&[u8]` or `Bytes`,
/// writable over `&mut [u8]`.
pub struct Node<B> {
    data: B,
}

impl<B: AsRef<[u8]>> Node<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn kind(&self) -> Result<NodeKind> {
        match self.bytes()[KIND_OFFSET] {
            1 => Ok(NodeKind::Leaf),
            2 => Ok(NodeKind::Internal),
            other => Err(StrataError::InvalidNodeType(other)),
        }
    }

    pub fn cell_count(&self) -> usize {
        read_u16(self.bytes(), CELL_COUNT_OFFSET) as usize
    }

    pub fn value_len(&self) -> usize {
        read_u16(self.bytes(), VALUE_LEN_OFFSET) as usize
    }

    pub fn next_leaf(&self) -> Option<u32> {
        link(read_u32(self.bytes(), NEXT_LEAF_OFFSET))
    }

    pub fn right_child(&self) -> u32 {
        read_u32(self.bytes(), RIGHT_CHILD_OFFSET)
    }

    pub fn next_block(&self) -> u32 {
        read_u32(self.bytes(), NEXT_BLOCK_OFFSET)
    }

    /// Largest key this leaf is responsible for.
    pub fn high_key(&self) -> u64 {
        read_u64(self.bytes(), HIGH_KEY_OFFSET)
    }

    fn leaf_cell_size(&self) -> usize {
        KEY_SIZE + self.value_len()
    }

    fn leaf_cell_offset(&self, index: usize) -> usize {
        HEADER_SIZE + index * self.leaf_cell_size()
    }

    pub fn leaf_key(&self, index: usize) -> u64 {
        read_u64(self.bytes(), self.leaf_cell_offset(index))
    }

    /// Byte range of the value of cell `index` within the page.
    pub fn leaf_value_range(&self, index: usize) -> Range<usize> {
        let start = self.leaf_cell_offset(index) + KEY_SIZE;
        start..start + self.value_len()
    }

    pub fn leaf_value(&self, index: usize) -> &[u8] {
        &self.bytes()[self.leaf_value_range(index)]
    }

    /// `Ok(index)` of `key`, or `Err(index)` where it would be inserted.
    pub fn leaf_search(&self, key: u64) -> std::result::Result<usize, usize> {
        let (mut lo, mut hi) = (0, self.cell_count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            let k = self.leaf_key(mid);
            if k == key {
                return Ok(mid);
            }
            if k < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Err(lo)
    }

    /// Raw bytes of every leaf cell, in order.
    pub fn leaf_cells_raw(&self) -> &[u8] {
        &self.bytes()[HEADER_SIZE..self.leaf_cell_offset(self.cell_count())]
    }

    fn internal_cell_offset(index: usize) -> usize {
        HEADER_SIZE + index * INTERNAL_CELL_SIZE
    }

    pub fn internal_key(&self, index: usize) -> u64 {
        read_u64(self.bytes(), Self::internal_cell_offset(index))
    }

    pub fn internal_child(&self, index: usize) -> u32 {
        read_u32(self.bytes(), Self::internal_cell_offset(index) + KEY_SIZE)
    }

    /// Child block to descend into for `key`.
    pub fn route(&self, key: u64) -> u32 {
        let n = self.cell_count();
        let (mut lo, mut hi) = (0, n);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.internal_key(mid) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo < n {
            self.internal_child(lo)
        } else {
            self.right_child()
        }
    }

    /// Cells of an internal node plus its rightmost child.
    pub fn internal_entries(&self) -> (Vec<(u64, u32)>, u32) {
        let entries = (0..self.cell_count())
            .map(|i| (self.internal_key(i), self.internal_child(i)))
            .collect();
        (entries, self.right_child())
    }

    /// Leftmost child of an internal node.
    pub fn first_child(&self) -> u32 {
        if self.cell_count() > 0 {
            self.internal_child(0)
        } else {
            self.right_child()
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Node<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.bytes_mut()[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.bytes_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn write_u64(&mut self, offset: usize, value: u64) {
        self.bytes_mut()[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Clears everything but the page state byte.
    fn init(&mut self, kind: NodeKind, value_len: usize) {
        self.bytes_mut()[1..].fill(0);
        self.bytes_mut()[KIND_OFFSET] = kind as u8;
        self.write_u16(VALUE_LEN_OFFSET, value_len as u16);
        self.write_u32(NEXT_LEAF_OFFSET, NO_BLOCK);
        self.write_u32(RIGHT_CHILD_OFFSET, NO_BLOCK);
        self.write_u64(HIGH_KEY_OFFSET, u64::MAX);
    }

    pub fn init_leaf(&mut self, value_len: usize) {
        self.init(NodeKind::Leaf, value_len);
    }

    pub fn init_internal(&mut self, value_len: usize) {
        self.init(NodeKind::Internal, value_len);
    }

    fn set_cell_count(&mut self, count: usize) {
        self.write_u16(CELL_COUNT_OFFSET, count as u16);
    }

    pub fn set_next_leaf(&mut self, block: Option<u32>) {
        self.write_u32(NEXT_LEAF_OFFSET, block.unwrap_or(NO_BLOCK));
    }

    pub fn set_right_child(&mut self, block: u32) {
        self.write_u32(RIGHT_CHILD_OFFSET, block);
    }

    pub fn set_next_block(&mut self, block: u32) {
        self.write_u32(NEXT_BLOCK_OFFSET, block);
    }

    /// Hands out the next unused block number of the tree.
    pub fn take_next_block(&mut self) -> u32 {
        let block = self.next_block();
        self.set_next_block(block + 1);
        block
    }

    pub fn set_high_key(&mut self, key: u64) {
        self.write_u64(HIGH_KEY_OFFSET, key);
    }

    /// Inserts a cell at `index`, shifting later cells right.
    pub fn leaf_insert(&mut self, index: usize, key: u64, value: &[u8]) {
        let count = self.cell_count();
        debug_assert!(index <= count);
        debug_assert_eq!(value.len(), self.value_len());
        let size = self.leaf_cell_size();
        let at = self.leaf_cell_offset(index);
        let end = self.leaf_cell_offset(count);
        self.bytes_mut().copy_within(at..end, at + size);
        self.write_u64(at, key);
        self.bytes_mut()[at + KEY_SIZE..at + size].copy_from_slice(value);
        self.set_cell_count(count + 1);
    }

    pub fn leaf_remove(&mut self, index: usize) {
        let count = self.cell_count();
        debug_assert!(index < count);
        let size = self.leaf_cell_size();
        let at = self.leaf_cell_offset(index);
        let end = self.leaf_cell_offset(count);
        self.bytes_mut().copy_within(at + size..end, at);
        self.set_cell_count(count - 1);
    }

    pub fn leaf_set_value(&mut self, index: usize, value: &[u8]) {
        let range = self.leaf_value_range(index);
        self.bytes_mut()[range].copy_from_slice(value);
    }

    /// Replaces all cells with `raw`, a whole number of leaf cells.
    pub fn set_leaf_cells_raw(&mut self, raw: &[u8]) {
        let size = self.leaf_cell_size();
        debug_assert_eq!(raw.len() % size, 0);
        self.bytes_mut()[HEADER_SIZE..HEADER_SIZE + raw.len()].copy_from_slice(raw);
        self.set_cell_count(raw.len() / size);
    }

    pub fn set_internal_entries(&mut self, entries: &[(u64, u32)], right_child: u32) {
        for (i, (key, child)) in entries.iter().enumerate() {
            let at = Self::internal_cell_offset(i);
            self.write_u64(at, *key);
            self.write_u32(at + KEY_SIZE, *child);
        }
        self.set_cell_count(entries.len());
        self.set_right_child(right_child);
    }
}
