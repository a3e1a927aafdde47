//! SSTable Iterator
//!
//! Sequential iteration over all rows of a table, one page at a time.

use std::vec::IntoIter;

use crate::error::Result;

use super::{Row, SSTableReader};

/// Iterator over table rows in sorted key order
pub struct SSTableIterator<'a> {
    reader: &'a mut SSTableReader,
    next_page: usize,
    current: IntoIter<Row>,
    failed: bool,
}

impl<'a> SSTableIterator<'a> {
    pub(super) fn new(reader: &'a mut SSTableReader) -> Self {
        Self {
            reader,
            next_page: 0,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }
}

impl<'a> Iterator for SSTableIterator<'a> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(row) = self.current.next() {
                return Some(Ok(row));
            }
            if self.next_page >= self.reader.page_count() {
                return None;
            }
            match self.reader.read_page(self.next_page) {
                Ok(page) => {
                    self.next_page += 1;
                    self.current = page.rows.into_iter();
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
