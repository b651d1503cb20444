use thiserror::Error;
use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("No free frame available, all pages are pinned")]
    NoFrame,

    #[error("Page {0} is not resident in the buffer pool")]
    NotResident(PageId),

    #[error("Page {0} is already unpinned")]
    AlreadyUnpinned(PageId),

    #[error("Page {0} is pinned")]
    Pinned(PageId),

    #[error("Invalid page ID")]
    InvalidPageId,

    #[error("Disk manager error: {0}")]
    Disk(#[from] DiskManagerError),
}
