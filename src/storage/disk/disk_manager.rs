use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write, Seek, SeekFrom};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual page-granular disk I/O.
///
/// Pages are numbered from 1; page p lives at file offset (p - 1) * PAGE_SIZE.
/// Allocation is monotonic: deallocated ids are remembered but never handed
/// out again, so a page id uniquely identifies its contents for the lifetime
/// of the file.
pub struct DiskManager {
    db_file: Mutex<File>,
    freed_pages: Mutex<HashSet<PageId>>,
}

impl DiskManager {
    /// Create a new DiskManager over the specified database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)
            .map_err(DiskManagerError::IoError)?;

        Ok(Self {
            db_file: Mutex::new(file),
            freed_pages: Mutex::new(HashSet::new()),
        })
    }

    /// Read a page from disk. Reading a page the file does not yet cover
    /// yields a zeroed page carrying the requested id.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            if offset as u64 >= file_size {
                page.reset();
                page.page_id = page_id;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset as u64))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = self.page_offset(page.page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a fresh page id by extending the file with one zeroed page.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();

        // First page is 1, not 0
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId + 1;

        file.seek(SeekFrom::End(0))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Mark a page id as no longer in use. Space reclamation is deferred;
    /// the id is retired rather than recycled.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        self.freed_pages.lock().insert(page_id);
        Ok(())
    }

    /// Whether `page_id` has been deallocated.
    pub fn is_deallocated(&self, page_id: PageId) -> bool {
        self.freed_pages.lock().contains(&page_id)
    }

    /// Number of pages the backing file currently covers.
    pub fn num_pages(&self) -> u64 {
        let file = self.db_file.lock();
        file.metadata().map(|m| m.len()).unwrap_or(0) / PAGE_SIZE as u64
    }

    fn page_offset(&self, page_id: PageId) -> usize {
        (page_id as usize - 1) * PAGE_SIZE
    }
}
