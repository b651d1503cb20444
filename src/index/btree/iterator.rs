use std::collections::VecDeque;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::ReadLatchedPage;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::tree::BPlusTree;

/// Forward iterator over the leaf chain.
///
/// Entries of one leaf are snapshotted under its shared latch, then the
/// latch is dropped before the next leaf is touched, so the iterator never
/// holds two latches at once. Iteration racing a concurrent merge can land
/// on a retired page; that surfaces as an error rather than silently
/// truncating the scan.
pub struct BPlusTreeIter<'a, K> {
    tree: &'a BPlusTree<K>,
    entries: VecDeque<(K, Rid)>,
    next_page_id: PageId,
    done: bool,
}

impl<'a, K> BPlusTreeIter<'a, K>
where
    K: Clone + Ord + Default + Serialize + DeserializeOwned,
{
    pub(super) fn new(
        tree: &'a BPlusTree<K>,
        snapshot: Option<(Vec<(K, Rid)>, PageId)>,
    ) -> Self {
        match snapshot {
            Some((entries, next_page_id)) => Self {
                tree,
                entries: entries.into(),
                next_page_id,
                done: false,
            },
            None => Self {
                tree,
                entries: VecDeque::new(),
                next_page_id: INVALID_PAGE_ID,
                done: true,
            },
        }
    }

    fn advance_leaf(&mut self) -> Result<(), BTreeError> {
        let latch = ReadLatchedPage::fetch(self.tree.buffer_pool(), self.next_page_id)?;
        let node = BTreeNode::<K>::load(latch.page())?;
        if !node.is_leaf() {
            return Err(BTreeError::InvalidPageFormat);
        }
        self.entries = node
            .keys
            .iter()
            .cloned()
            .zip(node.values.iter().copied())
            .collect();
        self.next_page_id = node.next_page_id;
        Ok(())
    }
}

impl<K> Iterator for BPlusTreeIter<'_, K>
where
    K: Clone + Ord + Default + Serialize + DeserializeOwned,
{
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(entry) = self.entries.pop_front() {
                return Some(Ok(entry));
            }
            if self.next_page_id == INVALID_PAGE_ID {
                self.done = true;
                return None;
            }
            if let Err(e) = self.advance_leaf() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
