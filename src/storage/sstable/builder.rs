//! SSTable Builder
//!
//! Writes sorted rows to a new table file, cutting a page every
//! `rows_per_page` rows.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{DepotError, Result};

use super::{PageInfo, SSTable, HEADER_SIZE, MAGIC, VERSION};

/// Builder for creating new tables from sorted rows
pub struct SSTableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    rows_per_page: usize,
    row_count: u64,
    /// Current write position
    current_offset: u64,
    /// Rows of the page being assembled
    page_buf: Vec<u8>,
    page_rows: u32,
    page_first_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
    index: Vec<PageInfo>,
}

impl SSTableBuilder {
    /// Create a new table builder
    ///
    /// Writes the header immediately; call `add()` in strictly increasing key
    /// order, then `finish()` to write the page index and footer.
    pub fn new(path: &Path, rows_per_page: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?; // Placeholder for row count

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows_per_page: rows_per_page.max(1),
            row_count: 0,
            current_offset: HEADER_SIZE,
            page_buf: Vec::new(),
            page_rows: 0,
            page_first_key: None,
            last_key: None,
            index: Vec::new(),
        })
    }

    /// Add a row (keys must be strictly increasing)
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                return Err(DepotError::Storage(
                    "table rows must be added in increasing key order".to_string(),
                ));
            }
        }
        self.last_key = Some(key.to_vec());

        if self.page_first_key.is_none() {
            self.page_first_key = Some(key.to_vec());
        }
        self.page_buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.page_buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.page_buf.extend_from_slice(key);
        self.page_buf.extend_from_slice(value);
        self.page_rows += 1;
        self.row_count += 1;

        if self.page_rows as usize >= self.rows_per_page {
            self.cut_page()?;
        }
        Ok(())
    }

    fn cut_page(&mut self) -> Result<()> {
        let Some(first_key) = self.page_first_key.take() else {
            return Ok(());
        };
        let len = u32::try_from(self.page_buf.len())
            .map_err(|_| DepotError::Storage("table page too large".to_string()))?;

        self.writer.write_all(&self.page_buf)?;
        self.index.push(PageInfo {
            first_key,
            offset: self.current_offset,
            len,
            crc: crc32fast::hash(&self.page_buf),
            row_count: self.page_rows,
        });

        self.current_offset += u64::from(len);
        self.page_buf.clear();
        self.page_rows = 0;
        Ok(())
    }

    /// Finish building: write page index, footer, and return metadata
    pub fn finish(mut self) -> Result<SSTable> {
        self.cut_page()?;

        let index_offset = self.current_offset;
        let mut index_bytes = Vec::new();
        for page in &self.index {
            index_bytes.extend_from_slice(&(page.first_key.len() as u32).to_le_bytes());
            index_bytes.extend_from_slice(&page.offset.to_le_bytes());
            index_bytes.extend_from_slice(&page.len.to_le_bytes());
            index_bytes.extend_from_slice(&page.crc.to_le_bytes());
            index_bytes.extend_from_slice(&page.row_count.to_le_bytes());
            index_bytes.extend_from_slice(&page.first_key);
        }
        self.writer.write_all(&index_bytes)?;

        // Footer: index_offset (8) + index_crc (4) + page_count (4)
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer
            .write_all(&crc32fast::hash(&index_bytes).to_le_bytes())?;
        self.writer
            .write_all(&(self.index.len() as u32).to_le_bytes())?;
        self.writer.flush()?;

        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| DepotError::Storage(format!("Failed to flush table: {}", e)))?;
        file.seek(SeekFrom::Start(6))?; // After magic + version
        file.write_all(&self.row_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();

        Ok(SSTable {
            path: self.path,
            row_count: self.row_count,
            page_count: self.index.len(),
            file_size,
        })
    }
}
