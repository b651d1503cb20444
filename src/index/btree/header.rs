use std::collections::HashMap;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::storage::buffer::BufferPoolManager;

/// The header page persists `{index_name -> root_page_id}` records so
/// indexes can be reattached after a restart. It is always the first page
/// allocated in a database file.
pub const HEADER_PAGE_ID: PageId = 1;

const RECORDS_LEN_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

pub fn read_roots(page: &Page) -> Result<HashMap<String, PageId>, BTreeError> {
    let len = LittleEndian::read_u32(&page.data[RECORDS_LEN_OFFSET..RECORDS_OFFSET]) as usize;
    if len == 0 {
        return Ok(HashMap::new());
    }
    if RECORDS_OFFSET + len > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    bincode::deserialize(&page.data[RECORDS_OFFSET..RECORDS_OFFSET + len])
        .map_err(|e| BTreeError::SerializationError(e.to_string()))
}

pub fn write_roots(page: &mut Page, roots: &HashMap<String, PageId>) -> Result<(), BTreeError> {
    let bytes =
        bincode::serialize(roots).map_err(|e| BTreeError::SerializationError(e.to_string()))?;
    if RECORDS_OFFSET + bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }
    LittleEndian::write_u32(
        &mut page.data[RECORDS_LEN_OFFSET..RECORDS_OFFSET],
        bytes.len() as u32,
    );
    page.data[RECORDS_OFFSET..RECORDS_OFFSET + bytes.len()].copy_from_slice(&bytes);
    Ok(())
}

/// Allocate the header page in a fresh database file. Index creation is a
/// startup-time, single-threaded affair, like the rest of catalog setup.
pub fn ensure_header_page(pool: &BufferPoolManager) -> Result<(), BTreeError> {
    if pool.disk_manager().num_pages() > 0 {
        return Ok(());
    }
    let (_page, page_id) = pool.new_page()?;
    debug_assert_eq!(page_id, HEADER_PAGE_ID);
    pool.unpin_page(page_id, true)
        .map_err(BTreeError::BufferPoolError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_roundtrip() {
        let mut page = Page::new(HEADER_PAGE_ID);
        assert!(read_roots(&page).unwrap().is_empty());

        let mut roots = HashMap::new();
        roots.insert("orders_pk".to_string(), 12);
        roots.insert("users_pk".to_string(), 9);
        write_roots(&mut page, &roots).unwrap();

        assert_eq!(read_roots(&page).unwrap(), roots);
    }
}
