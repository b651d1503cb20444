use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Page ID type. Disk pages are numbered from 1; 0 marks an unallocated slot.
pub type PageId = u32;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Transaction ID type
pub type TxnId = u32;

/// Sentinel for "no transaction".
pub const INVALID_TXN_ID: TxnId = 0;

/// Record ID type
pub type Rid = u32;

/// Table OID type
pub type TableOid = u32;

/// LSN (Log Sequence Number) type. Reserved for write-ahead logging; the
/// core never interprets it.
pub type Lsn = u64;

/// A fixed-size page of raw bytes plus its disk identity.
///
/// The surrounding `RwLock` (see [`PagePtr`]) is the per-page latch. It is
/// independent of the buffer pool's own mutex: the pool guards frame
/// metadata, the latch guards the payload.
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the payload and drop the disk identity.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
        self.lsn = 0;
    }
}

impl Clone for Page {
    fn clone(&self) -> Self {
        Self {
            data: self.data,
            page_id: self.page_id,
            lsn: self.lsn,
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id)
            .field("lsn", &self.lsn)
            .finish_non_exhaustive()
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;
