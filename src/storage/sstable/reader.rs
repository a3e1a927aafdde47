//! SSTable Reader
//!
//! Opens table files, keeps the page index in memory and reads single pages
//! on demand.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::error::{DepotError, Result};

use super::iterator::SSTableIterator;
use super::{
    decode_rows, read_u32, read_u64, Page, PageInfo, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION,
};

/// Reader for table files with an in-memory page index
pub struct SSTableReader {
    path: PathBuf,
    file: BufReader<File>,
    pages: Vec<PageInfo>,
    row_count: u64,
}

impl SSTableReader {
    /// Open a table for reading
    ///
    /// Loads and verifies the page index; pages themselves stay on disk.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(DepotError::Storage(format!(
                "table {} too small: {} bytes",
                path.display(),
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(DepotError::Storage(format!(
                "Invalid table magic: expected BDPT, got {:?}",
                &header[0..4]
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(DepotError::Storage(format!(
                "Unsupported table version: {}",
                version
            )));
        }
        let row_count = read_u64(&header, 6).unwrap_or(0);

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;
        let corrupt = || DepotError::Storage(format!("corrupt table footer in {}", path.display()));
        let index_offset = read_u64(&footer, 0).ok_or_else(corrupt)?;
        let index_crc = read_u32(&footer, 8).ok_or_else(corrupt)?;
        let page_count = read_u32(&footer, 12).ok_or_else(corrupt)? as usize;

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(corrupt());
        }
        let mut index_data = vec![0u8; (file_size - FOOTER_SIZE - index_offset) as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut index_data)?;
        if crc32fast::hash(&index_data) != index_crc {
            return Err(DepotError::Storage(format!(
                "page index CRC mismatch in {}",
                path.display()
            )));
        }

        let pages = Self::parse_index(&index_data, page_count).ok_or_else(corrupt)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            pages,
            row_count,
        })
    }

    /// Parse `[KeyLen][Offset][Len][CRC][Rows][FirstKey]` entries
    fn parse_index(data: &[u8], page_count: usize) -> Option<Vec<PageInfo>> {
        let mut pages = Vec::with_capacity(page_count);
        let mut pos = 0;
        while pos < data.len() {
            let key_len = read_u32(data, pos)? as usize;
            let offset = read_u64(data, pos + 4)?;
            let len = read_u32(data, pos + 12)?;
            let crc = read_u32(data, pos + 16)?;
            let row_count = read_u32(data, pos + 20)?;
            pos += 24;
            let first_key = data.get(pos..pos + key_len)?.to_vec();
            pos += key_len;
            pages.push(PageInfo {
                first_key,
                offset,
                len,
                crc,
                row_count,
            });
        }
        (pages.len() == page_count).then_some(pages)
    }

    /// Read and verify one page from disk
    pub fn read_page(&mut self, page_no: usize) -> Result<Page> {
        let info = self.pages.get(page_no).ok_or_else(|| {
            DepotError::Storage(format!("page {} out of range in {}", page_no, self.path.display()))
        })?;
        let (offset, len, crc) = (info.offset, info.len, info.crc);

        let mut buf = vec![0u8; len as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;

        if crc32fast::hash(&buf) != crc {
            return Err(DepotError::Storage(format!(
                "page {} CRC mismatch in {}",
                page_no,
                self.path.display()
            )));
        }
        let rows = decode_rows(&buf).ok_or_else(|| {
            DepotError::Storage(format!("page {} malformed in {}", page_no, self.path.display()))
        })?;
        Ok(Page { rows })
    }

    /// Page where a forward scan starting at `lower` begins
    pub fn page_for_forward(&self, lower: Bound<&[u8]>) -> usize {
        let key = match lower {
            Bound::Included(k) | Bound::Excluded(k) => k,
            Bound::Unbounded => return 0,
        };
        self.pages
            .partition_point(|p| p.first_key.as_slice() <= key)
            .saturating_sub(1)
    }

    /// Page where a reverse scan ending at `upper` begins, if any
    pub fn page_for_reverse(&self, upper: Bound<&[u8]>) -> Option<usize> {
        let candidates = match upper {
            Bound::Included(k) => self.pages.partition_point(|p| p.first_key.as_slice() <= k),
            Bound::Excluded(k) => self.pages.partition_point(|p| p.first_key.as_slice() < k),
            Bound::Unbounded => self.pages.len(),
        };
        candidates.checked_sub(1)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate every row page by page, bypassing the page cache
    pub fn iter(&mut self) -> SSTableIterator<'_> {
        SSTableIterator::new(self)
    }
}
