use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use log::warn;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::container::hash::ExtendibleHashTable;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

const PAGE_TABLE_BUCKET_SIZE: usize = 32;

/// Per-frame bookkeeping, guarded by the pool's coarse mutex. The page
/// payload itself lives behind the per-page latch in `frames`.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

struct PoolState {
    meta: Vec<FrameMeta>,
    free_list: VecDeque<FrameId>,
}

/// Fixed-capacity page cache over a disk manager.
///
/// One coarse mutex (`state`) linearizes frame acquisition, the page table,
/// the replacer and the free list. Per-page latches are never held by the
/// pool for pinned pages: while holding the mutex, the pool only latches
/// frames with pin count zero (install, evict, delete), which by the pin
/// contract have no outstanding borrowers. `flush_page` pins its target and
/// takes the page latch only after releasing the mutex, so callers may flush
/// while other threads sit inside latch-then-unpin sequences.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, replacer_k, disk_manager))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut meta = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for i in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            meta.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            state: Mutex::new(PoolState { meta, free_list }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Allocate a fresh page, pin it, and return it zeroed.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = match self.disk_manager.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                state.free_list.push_front(frame_id);
                return Err(e.into());
            }
        };

        {
            let mut page = self.frames[frame_id as usize].write();
            page.reset();
            page.page_id = page_id;
        }

        let meta = &mut state.meta[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok((self.frames[frame_id as usize].clone(), page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident. The page
    /// comes back pinned; callers must pair this with `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }

        let mut state = self.state.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            state.meta[frame_id as usize].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(self.frames[frame_id as usize].clone());
        }

        let frame_id = self.acquire_frame(&mut state)?;

        let read_result = {
            let mut page = self.frames[frame_id as usize].write();
            self.disk_manager.read_page(page_id, &mut page)
        };
        if let Err(e) = read_result {
            state.free_list.push_front(frame_id);
            return Err(e.into());
        }

        let meta = &mut state.meta[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(self.frames[frame_id as usize].clone())
    }

    /// Drop one pin on a page. `is_dirty` is OR-merged into the frame's
    /// dirty flag; once the pin count reaches zero the frame becomes a
    /// candidate for eviction.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::NotResident(page_id))?;

        let meta = &mut state.meta[frame_id as usize];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::AlreadyUnpinned(page_id));
        }

        meta.pin_count -= 1;
        if is_dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }

        Ok(())
    }

    /// Write a page's current bytes to disk, regardless of the dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }

        // Pin the frame so it cannot be evicted or remapped, clear the dirty
        // flag, then latch and write outside the pool mutex.
        let (frame_id, page) = {
            let mut state = self.state.lock();
            let frame_id = self
                .page_table
                .find(&page_id)
                .ok_or(BufferPoolError::NotResident(page_id))?;
            let meta = &mut state.meta[frame_id as usize];
            if meta.pin_count == 0 {
                self.replacer.set_evictable(frame_id, false);
            }
            meta.pin_count += 1;
            meta.is_dirty = false;
            (frame_id, self.frames[frame_id as usize].clone())
        };

        let write_result = {
            let guard = page.read();
            self.disk_manager.write_page(&guard)
        };

        let mut state = self.state.lock();
        let meta = &mut state.meta[frame_id as usize];
        meta.pin_count -= 1;
        if write_result.is_err() {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        drop(state);

        write_result.map_err(Into::into)
    }

    /// Flush every resident page.
    pub fn flush_all(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let state = self.state.lock();
            state
                .meta
                .iter()
                .map(|m| m.page_id)
                .filter(|&id| id != INVALID_PAGE_ID)
                .collect()
        };

        for page_id in resident {
            match self.flush_page(page_id) {
                // Evicted in the meantime; eviction already wrote it out.
                Err(BufferPoolError::NotResident(_)) => {}
                other => other?,
            }
        }
        Ok(())
    }

    /// Drop a page from the pool and retire its id on disk. Deleting a page
    /// that is not resident succeeds; deleting a pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId);
        }

        let mut state = self.state.lock();

        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(()),
        };

        if state.meta[frame_id as usize].pin_count > 0 {
            return Err(BufferPoolError::Pinned(page_id));
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        self.frames[frame_id as usize].write().reset();
        state.meta[frame_id as usize].reset();
        state.free_list.push_back(frame_id);

        self.disk_manager.deallocate_page(page_id)?;
        Ok(())
    }

    /// Take a frame from the free list, or evict one. A dirty victim is
    /// written back before its frame is reused.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let victim = self.replacer.evict().ok_or(BufferPoolError::NoFrame)?;
        let meta = &mut state.meta[victim as usize];
        assert_eq!(
            meta.pin_count, 0,
            "evicting pinned frame {} (page {})",
            victim, meta.page_id
        );

        if meta.is_dirty {
            let write_result = {
                let page = self.frames[victim as usize].read();
                self.disk_manager.write_page(&page)
            };
            if let Err(e) = write_result {
                warn!("write-back of evicted page {} failed: {}", meta.page_id, e);
                // Put the frame back under replacement so the pool stays
                // consistent, then surface the error.
                self.replacer.record_access(victim);
                self.replacer.set_evictable(victim, true);
                return Err(e.into());
            }
            meta.is_dirty = false;
        }

        if meta.page_id != INVALID_PAGE_ID {
            self.page_table.remove(&meta.page_id);
            meta.page_id = INVALID_PAGE_ID;
        }

        Ok(victim)
    }
}
