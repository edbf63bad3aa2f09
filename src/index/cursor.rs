use crate::common::{Oid, Refer, Result};

use super::btree::{BTree, Row};

/// Position of one row inside a tree: leaf block and cell index.
///
/// This is a physical position. A split that moves the row elsewhere leaves
/// the cursor pointing at whatever now occupies the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub oid: Oid,
    pub page_num: u32,
    pub cell_num: u32,
}

impl Cursor {
    pub fn new(oid: Oid, page_num: u32, cell_num: u32) -> Self {
        Self {
            oid,
            page_num,
            cell_num,
        }
    }

    pub fn to_refer(&self) -> Refer {
        Refer::new(self.oid, self.page_num, self.cell_num)
    }

    pub fn from_refer(refer: Refer) -> Self {
        Self::new(refer.oid, refer.page_num, refer.cell_num)
    }
}

impl From<Refer> for Cursor {
    fn from(refer: Refer) -> Self {
        Self::from_refer(refer)
    }
}

pub struct BTreeIterator<'a> {
    tree: &'a BTree,
    cursor: Cursor,
    done: bool,
}

impl<'a> BTreeIterator<'a> {
    pub fn new(tree: &'a BTree, cursor: Cursor) -> Self {
        Self {
            tree,
            cursor,
            done: false,
        }
    }

    /// Current position; where the next row comes from.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let row = match self.tree.cursor_row(&self.cursor)? {
            Some(row) => row,
            None => {
                self.done = true;
                return Ok(None);
            }
        };
        if !self.tree.advance(&mut self.cursor)? {
            self.done = true;
        }
        Ok(Some(row))
    }
}

impl Iterator for BTreeIterator<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_refer_conversion() {
        let cursor = Cursor::new(4, 9, 2);
        let refer = cursor.to_refer();
        assert_eq!(refer, Refer::new(4, 9, 2));
        assert_eq!(Cursor::from(refer), cursor);
    }
}
