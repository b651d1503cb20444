use log::warn;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::{Page, PageId};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};

pub(crate) type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;
pub(crate) type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// A fetched page held under its read latch. Dropping releases the latch and
/// then the pin, so every control-flow exit keeps the pin accounting intact.
pub(crate) struct ReadLatchedPage<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    guard: Option<PageReadGuard>,
}

impl<'a> ReadLatchedPage<'a> {
    pub fn fetch(pool: &'a BufferPoolManager, page_id: PageId) -> Result<Self, BufferPoolError> {
        let page = pool.fetch_page(page_id)?;
        let guard = page.read_arc();
        Ok(Self {
            pool,
            page_id,
            guard: Some(guard),
        })
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &Page {
        self.guard.as_ref().unwrap()
    }
}

impl Drop for ReadLatchedPage<'_> {
    fn drop(&mut self) {
        self.guard.take();
        if let Err(e) = self.pool.unpin_page(self.page_id, false) {
            warn!("unpin of read-latched page {} failed: {}", self.page_id, e);
        }
    }
}

/// A fetched (or freshly allocated) page held under its write latch.
/// Dropping releases the latch, then unpins with the accumulated dirty flag.
pub(crate) struct WriteLatchedPage<'a> {
    pool: &'a BufferPoolManager,
    page_id: PageId,
    guard: Option<PageWriteGuard>,
    dirty: bool,
}

impl<'a> WriteLatchedPage<'a> {
    pub fn fetch(pool: &'a BufferPoolManager, page_id: PageId) -> Result<Self, BufferPoolError> {
        let page = pool.fetch_page(page_id)?;
        let guard = page.write_arc();
        Ok(Self {
            pool,
            page_id,
            guard: Some(guard),
            dirty: false,
        })
    }

    /// Allocate a fresh page and latch it. The page is born dirty: it only
    /// exists to receive a node image.
    pub fn allocate(pool: &'a BufferPoolManager) -> Result<Self, BufferPoolError> {
        let (page, page_id) = pool.new_page()?;
        let guard = page.write_arc();
        Ok(Self {
            pool,
            page_id,
            guard: Some(guard),
            dirty: true,
        })
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &Page {
        self.guard.as_ref().unwrap()
    }

    pub fn page_mut(&mut self) -> &mut Page {
        self.guard.as_mut().unwrap()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for WriteLatchedPage<'_> {
    fn drop(&mut self) {
        self.guard.take();
        if let Err(e) = self.pool.unpin_page(self.page_id, self.dirty) {
            warn!("unpin of write-latched page {} failed: {}", self.page_id, e);
        }
    }
}
