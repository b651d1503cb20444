use std::marker::PhantomData;
use std::sync::Arc;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::config::EngineConfig;
use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::header::{self, HEADER_PAGE_ID};
use crate::index::btree::iterator::BPlusTreeIter;
use crate::index::btree::latch::{ReadLatchedPage, WriteLatchedPage};
use crate::index::btree::layout;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};

/// Concurrent B+ tree index over buffer pool pages.
///
/// Reads crab down with shared page latches. Mutations first try an
/// optimistic descent (shared latches down to the leaf, exclusive only at
/// the leaf); when the leaf might split or underflow they restart
/// pessimistically, write-latching the path and releasing every ancestor as
/// soon as a child proves safe. `root` is the root latch: it guards the
/// root page id and is held exclusively for as long as a writer might still
/// change it.
pub struct BPlusTree<K> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root: RwLock<PageId>,
    leaf_max_size: u32,
    internal_max_size: u32,
    _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Default + Serialize + DeserializeOwned,
{
    /// Create or reattach the index named `index_name`. A name already
    /// recorded on the header page resumes with its persisted root.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 2, "leaf pages must hold at least two keys");
        assert!(
            internal_max_size >= 3,
            "internal pages must hold at least three children"
        );
        let index_name = index_name.into();
        header::ensure_header_page(&buffer_pool)?;

        let root_page_id = {
            let mut latch = WriteLatchedPage::fetch(&buffer_pool, HEADER_PAGE_ID)?;
            let mut roots = header::read_roots(latch.page())?;
            match roots.get(&index_name) {
                Some(&id) => id,
                None => {
                    roots.insert(index_name.clone(), INVALID_PAGE_ID);
                    header::write_roots(latch.page_mut(), &roots)?;
                    latch.mark_dirty();
                    INVALID_PAGE_ID
                }
            }
        };

        Ok(Self {
            index_name,
            buffer_pool,
            root: RwLock::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn with_config(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        config: &EngineConfig,
    ) -> Result<Self, BTreeError> {
        Self::new(
            index_name,
            buffer_pool,
            config.leaf_max_size,
            config.internal_max_size,
        )
    }

    pub fn is_empty(&self) -> bool {
        *self.root.read() == INVALID_PAGE_ID
    }

    pub(super) fn buffer_pool(&self) -> &BufferPoolManager {
        &self.buffer_pool
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let root = self.root.read();
        if *root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut latch = ReadLatchedPage::fetch(&self.buffer_pool, *root)?;
        drop(root);

        loop {
            let node = BTreeNode::<K>::load(latch.page())?;
            if node.is_leaf() {
                return Ok(node.lookup(key));
            }
            let child_id = node.children[node.search(key)];
            latch = ReadLatchedPage::fetch(&self.buffer_pool, child_id)?;
        }
    }

    /// Insert a key-value pair. Returns false if the key is already present.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        if let Some(inserted) = self.insert_optimistic(key, rid)? {
            return Ok(inserted);
        }
        debug!("index {}: optimistic insert restarts pessimistic", self.index_name);
        self.insert_pessimistic(key, rid)
    }

    /// Remove a key. Absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        if self.remove_optimistic(key)?.is_some() {
            return Ok(());
        }
        debug!("index {}: optimistic remove restarts pessimistic", self.index_name);
        self.remove_pessimistic(key)
    }

    /// Iterator over every entry, in key order.
    pub fn begin(&self) -> Result<BPlusTreeIter<'_, K>, BTreeError> {
        let snapshot = self.leaf_snapshot(None)?;
        Ok(BPlusTreeIter::new(self, snapshot))
    }

    /// Iterator over entries with keys >= `key`, in key order.
    pub fn begin_at(&self, key: &K) -> Result<BPlusTreeIter<'_, K>, BTreeError> {
        let snapshot = self.leaf_snapshot(Some(key))?;
        Ok(BPlusTreeIter::new(self, snapshot))
    }

    // ------------------------------------------------------------------
    // Optimistic descents
    // ------------------------------------------------------------------

    /// Shared latches down, exclusive at the leaf; bail out with Ok(None)
    /// when the leaf could split.
    fn insert_optimistic(&self, key: &K, rid: Rid) -> Result<Option<bool>, BTreeError> {
        let root = self.root.read();
        if *root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let root_id = *root;

        if self.page_is_leaf(root_id)? {
            // A leaf root may split out from under us unless the root latch
            // stays held for the whole mutation.
            let mut latch = WriteLatchedPage::fetch(&self.buffer_pool, root_id)?;
            let mut node = BTreeNode::<K>::load(latch.page())?;
            if node.size() >= self.leaf_max_size {
                return Ok(None);
            }
            let inserted = node.insert_into_leaf(key.clone(), rid);
            if inserted {
                node.save(latch.page_mut())?;
                latch.mark_dirty();
            }
            return Ok(Some(inserted));
        }

        let mut latch = ReadLatchedPage::fetch(&self.buffer_pool, root_id)?;
        drop(root);

        loop {
            let node = BTreeNode::<K>::load(latch.page())?;
            let child_id = node.children[node.search(key)];

            if self.page_is_leaf(child_id)? {
                // Upgrade at the leaf: the parent's shared latch pins the
                // subtree shape, so the child stays a leaf across the
                // re-latch; only its contents may have moved.
                let mut leaf = WriteLatchedPage::fetch(&self.buffer_pool, child_id)?;
                drop(latch);
                let mut node = BTreeNode::<K>::load(leaf.page())?;
                if node.size() >= self.leaf_max_size {
                    return Ok(None);
                }
                let inserted = node.insert_into_leaf(key.clone(), rid);
                if inserted {
                    node.save(leaf.page_mut())?;
                    leaf.mark_dirty();
                }
                return Ok(Some(inserted));
            }

            latch = ReadLatchedPage::fetch(&self.buffer_pool, child_id)?;
        }
    }

    /// Shared latches down, exclusive at the leaf; bail out with Ok(None)
    /// when the leaf could underflow.
    fn remove_optimistic(&self, key: &K) -> Result<Option<()>, BTreeError> {
        let root = self.root.read();
        if *root == INVALID_PAGE_ID {
            return Ok(Some(()));
        }
        let root_id = *root;

        if self.page_is_leaf(root_id)? {
            let mut latch = WriteLatchedPage::fetch(&self.buffer_pool, root_id)?;
            let mut node = BTreeNode::<K>::load(latch.page())?;
            if node.size() <= 1 {
                // Removal could empty the root and requires the root latch
                // exclusively.
                return Ok(None);
            }
            if node.remove_from_leaf(key) {
                node.save(latch.page_mut())?;
                latch.mark_dirty();
            }
            return Ok(Some(()));
        }

        let mut latch = ReadLatchedPage::fetch(&self.buffer_pool, root_id)?;
        drop(root);

        loop {
            let node = BTreeNode::<K>::load(latch.page())?;
            let child_id = node.children[node.search(key)];

            if self.page_is_leaf(child_id)? {
                let mut leaf = WriteLatchedPage::fetch(&self.buffer_pool, child_id)?;
                drop(latch);
                let mut node = BTreeNode::<K>::load(leaf.page())?;
                if node.size() <= node.min_size() {
                    return Ok(None);
                }
                if node.remove_from_leaf(key) {
                    node.save(leaf.page_mut())?;
                    leaf.mark_dirty();
                }
                return Ok(Some(()));
            }

            latch = ReadLatchedPage::fetch(&self.buffer_pool, child_id)?;
        }
    }

    // ------------------------------------------------------------------
    // Pessimistic insert
    // ------------------------------------------------------------------

    fn insert_pessimistic(&self, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        let root_guard = self.root.write();

        if *root_guard == INVALID_PAGE_ID {
            let mut latch = WriteLatchedPage::allocate(&self.buffer_pool)?;
            let mut node = BTreeNode::new_leaf(latch.page_id(), self.leaf_max_size);
            node.insert_into_leaf(key.clone(), rid);
            node.save(latch.page_mut())?;
            let root_id = latch.page_id();
            drop(latch);
            let mut root_guard = root_guard;
            *root_guard = root_id;
            self.persist_root(root_id)?;
            return Ok(true);
        }

        let root_id = *root_guard;
        let mut root_guard = Some(root_guard);
        let mut ancestors: Vec<WriteLatchedPage<'_>> = Vec::new();

        let mut latch = WriteLatchedPage::fetch(&self.buffer_pool, root_id)?;
        let mut node = BTreeNode::<K>::load(latch.page())?;
        if Self::insert_safe(&node) {
            root_guard = None;
        }

        while !node.is_leaf() {
            let child_id = node.children[node.search(key)];
            let child_latch = WriteLatchedPage::fetch(&self.buffer_pool, child_id)?;
            let child_node = BTreeNode::<K>::load(child_latch.page())?;
            ancestors.push(latch);
            if Self::insert_safe(&child_node) {
                root_guard = None;
                ancestors.clear();
            }
            latch = child_latch;
            node = child_node;
        }

        if !node.insert_into_leaf(key.clone(), rid) {
            return Ok(false);
        }
        if node.size() <= self.leaf_max_size {
            node.save(latch.page_mut())?;
            latch.mark_dirty();
            debug_assert!(ancestors.is_empty());
            return Ok(true);
        }

        // The leaf overflowed: split and propagate the separator upward.
        let mut right_latch = WriteLatchedPage::allocate(&self.buffer_pool)?;
        let mut right = BTreeNode::new_leaf(right_latch.page_id(), self.leaf_max_size);
        let mut sep = node.split_leaf(&mut right);
        right.next_page_id = node.next_page_id;
        node.next_page_id = right_latch.page_id();

        let mut left_latch = latch;
        let mut left = node;

        loop {
            let mut parent_latch = match ancestors.pop() {
                Some(latch) => latch,
                None => {
                    // `left` is the root; grow the tree by one level.
                    let mut root_guard = root_guard
                        .take()
                        .expect("root latch must be held when the root splits");
                    let mut new_root_latch = WriteLatchedPage::allocate(&self.buffer_pool)?;
                    let new_root_id = new_root_latch.page_id();
                    let mut new_root =
                        BTreeNode::<K>::new_internal(new_root_id, self.internal_max_size);
                    new_root.keys = vec![K::default(), sep];
                    new_root.children = vec![left.page_id, right.page_id];

                    left.parent_page_id = new_root_id;
                    right.parent_page_id = new_root_id;
                    left.save(left_latch.page_mut())?;
                    left_latch.mark_dirty();
                    drop(left_latch);
                    self.adopt_children(&right)?;
                    right.save(right_latch.page_mut())?;
                    drop(right_latch);
                    new_root.save(new_root_latch.page_mut())?;
                    drop(new_root_latch);

                    *root_guard = new_root_id;
                    self.persist_root(new_root_id)?;
                    return Ok(true);
                }
            };

            let parent_id = parent_latch.page_id();
            let mut parent = BTreeNode::<K>::load(parent_latch.page())?;

            left.parent_page_id = parent_id;
            right.parent_page_id = parent_id;
            left.save(left_latch.page_mut())?;
            left_latch.mark_dirty();
            drop(left_latch);
            self.adopt_children(&right)?;
            let right_id = right.page_id;
            right.save(right_latch.page_mut())?;
            drop(right_latch);

            parent.insert_child(sep, right_id);
            if parent.size() <= self.internal_max_size {
                parent.save(parent_latch.page_mut())?;
                parent_latch.mark_dirty();
                debug_assert!(ancestors.is_empty());
                return Ok(true);
            }

            let new_right_latch = WriteLatchedPage::allocate(&self.buffer_pool)?;
            let mut new_right =
                BTreeNode::<K>::new_internal(new_right_latch.page_id(), self.internal_max_size);
            sep = parent.split_internal(&mut new_right);

            left_latch = parent_latch;
            left = parent;
            right_latch = new_right_latch;
            right = new_right;
        }
    }

    // ------------------------------------------------------------------
    // Pessimistic remove
    // ------------------------------------------------------------------

    fn remove_pessimistic(&self, key: &K) -> Result<(), BTreeError> {
        let root_guard = self.root.write();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(());
        }

        let root_id = *root_guard;
        let mut root_guard = Some(root_guard);
        let mut ancestors: Vec<WriteLatchedPage<'_>> = Vec::new();

        let mut latch = WriteLatchedPage::fetch(&self.buffer_pool, root_id)?;
        let mut node = BTreeNode::<K>::load(latch.page())?;
        if Self::remove_safe(&node, true) {
            root_guard = None;
        }

        while !node.is_leaf() {
            let child_id = node.children[node.search(key)];
            let child_latch = WriteLatchedPage::fetch(&self.buffer_pool, child_id)?;
            let child_node = BTreeNode::<K>::load(child_latch.page())?;
            ancestors.push(latch);
            if Self::remove_safe(&child_node, false) {
                root_guard = None;
                ancestors.clear();
            }
            latch = child_latch;
            node = child_node;
        }

        if !node.remove_from_leaf(key) {
            return Ok(());
        }

        if node.page_id == root_id && ancestors.is_empty() {
            if node.size() == 0 {
                // The tree is now empty; retire the root page.
                let old_root = latch.page_id();
                drop(latch);
                let mut root_guard = root_guard
                    .take()
                    .expect("root latch must be held when the root empties");
                *root_guard = INVALID_PAGE_ID;
                self.persist_root(INVALID_PAGE_ID)?;
                drop(root_guard);
                self.delete_pages(&[old_root])?;
                return Ok(());
            }
            node.save(latch.page_mut())?;
            latch.mark_dirty();
            return Ok(());
        }

        if node.size() >= node.min_size() {
            node.save(latch.page_mut())?;
            latch.mark_dirty();
            debug_assert!(ancestors.is_empty());
            return Ok(());
        }

        // Underflow: rebalance bottom-up. Pages emptied by merges are
        // deleted only after every latch is released.
        let mut deleted: Vec<PageId> = Vec::new();
        let mut cur_latch = latch;
        let mut cur = node;

        loop {
            let mut parent_latch = ancestors
                .pop()
                .expect("underflowing non-root must have a latched parent");
            let parent_id = parent_latch.page_id();
            let mut parent = BTreeNode::<K>::load(parent_latch.page())?;
            let idx = parent
                .children
                .iter()
                .position(|&c| c == cur.page_id)
                .expect("underflowing node must be registered in its parent");

            let (sib_idx, sib_is_left) = if idx > 0 { (idx - 1, true) } else { (1, false) };
            let sib_id = parent.children[sib_idx];
            let mut sib_latch = WriteLatchedPage::fetch(&self.buffer_pool, sib_id)?;
            let mut sib = BTreeNode::<K>::load(sib_latch.page())?;

            if sib.size() > sib.min_size() {
                if sib_is_left {
                    self.borrow_from_left(&mut cur, &mut sib, &mut parent, idx)?;
                } else {
                    self.borrow_from_right(&mut cur, &mut sib, &mut parent, idx)?;
                }
                cur.save(cur_latch.page_mut())?;
                cur_latch.mark_dirty();
                sib.save(sib_latch.page_mut())?;
                sib_latch.mark_dirty();
                parent.save(parent_latch.page_mut())?;
                parent_latch.mark_dirty();
                break;
            }

            // Merge with the sibling; the right partner dissolves into the
            // left one.
            let survivor_id = if sib_is_left {
                self.merge_nodes(&mut sib, &mut cur, &parent, idx)?;
                parent.keys.remove(idx);
                parent.children.remove(idx);
                let merged_id = cur.page_id;
                drop(cur_latch);
                deleted.push(merged_id);
                sib.save(sib_latch.page_mut())?;
                sib_latch.mark_dirty();
                drop(sib_latch);
                sib.page_id
            } else {
                self.merge_nodes(&mut cur, &mut sib, &parent, 1)?;
                parent.keys.remove(1);
                parent.children.remove(1);
                let merged_id = sib.page_id;
                drop(sib_latch);
                deleted.push(merged_id);
                cur.save(cur_latch.page_mut())?;
                cur_latch.mark_dirty();
                drop(cur_latch);
                cur.page_id
            };

            if parent_id == root_id && parent.children.len() == 1 {
                // The root lost its last separator; its only child becomes
                // the new root.
                let mut root_guard = root_guard
                    .take()
                    .expect("root latch must be held when the root collapses");
                self.set_parent(survivor_id, INVALID_PAGE_ID)?;
                *root_guard = survivor_id;
                self.persist_root(survivor_id)?;
                drop(root_guard);
                drop(parent_latch);
                deleted.push(parent_id);
                break;
            }

            if parent_id == root_id || parent.size() >= parent.min_size() {
                parent.save(parent_latch.page_mut())?;
                parent_latch.mark_dirty();
                break;
            }

            // Parent underflows in turn; its own parent is still latched.
            cur_latch = parent_latch;
            cur = parent;
        }

        root_guard.take();
        ancestors.clear();
        self.delete_pages(&deleted)?;
        Ok(())
    }

    /// Move the closest entry of the left sibling into `cur`.
    fn borrow_from_left(
        &self,
        cur: &mut BTreeNode<K>,
        left: &mut BTreeNode<K>,
        parent: &mut BTreeNode<K>,
        idx: usize,
    ) -> Result<(), BTreeError> {
        if cur.is_leaf() {
            let key = left.keys.pop().unwrap();
            let value = left.values.pop().unwrap();
            cur.keys.insert(0, key.clone());
            cur.values.insert(0, value);
            parent.keys[idx] = key;
        } else {
            let child = left.children.pop().unwrap();
            let sep_key = left.keys.pop().unwrap();
            let down = std::mem::replace(&mut parent.keys[idx], sep_key);
            cur.children.insert(0, child);
            cur.keys.insert(1, down);
            self.set_parent(child, cur.page_id)?;
        }
        Ok(())
    }

    /// Move the closest entry of the right sibling into `cur`.
    fn borrow_from_right(
        &self,
        cur: &mut BTreeNode<K>,
        right: &mut BTreeNode<K>,
        parent: &mut BTreeNode<K>,
        idx: usize,
    ) -> Result<(), BTreeError> {
        debug_assert_eq!(idx, 0);
        if cur.is_leaf() {
            let key = right.keys.remove(0);
            let value = right.values.remove(0);
            cur.keys.push(key);
            cur.values.push(value);
            parent.keys[1] = right.keys[0].clone();
        } else {
            let child = right.children.remove(0);
            let new_sep = right.keys.remove(1);
            let down = std::mem::replace(&mut parent.keys[1], new_sep);
            cur.keys.push(down);
            cur.children.push(child);
            self.set_parent(child, cur.page_id)?;
        }
        Ok(())
    }

    /// Fold `right` into `left`. `sep_idx` indexes the parent key that
    /// separated the two.
    fn merge_nodes(
        &self,
        left: &mut BTreeNode<K>,
        right: &mut BTreeNode<K>,
        parent: &BTreeNode<K>,
        sep_idx: usize,
    ) -> Result<(), BTreeError> {
        if left.is_leaf() {
            left.keys.append(&mut right.keys);
            left.values.append(&mut right.values);
            left.next_page_id = right.next_page_id;
        } else {
            left.keys.push(parent.keys[sep_idx].clone());
            left.keys.extend(right.keys.drain(1..));
            for &child in &right.children {
                self.set_parent(child, left.page_id)?;
            }
            left.children.append(&mut right.children);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn insert_safe(node: &BTreeNode<K>) -> bool {
        node.size() < node.max_size
    }

    fn remove_safe(node: &BTreeNode<K>, is_root: bool) -> bool {
        if is_root {
            if node.is_leaf() {
                node.size() > 1
            } else {
                node.size() > 2
            }
        } else {
            node.size() > node.min_size()
        }
    }

    /// Cheap page-type probe under a short shared latch.
    fn page_is_leaf(&self, page_id: PageId) -> Result<bool, BTreeError> {
        let latch = ReadLatchedPage::fetch(&self.buffer_pool, page_id)?;
        let header = layout::NodeHeader::read_from(&latch.page().data)
            .ok_or(BTreeError::InvalidPageFormat)?;
        Ok(header.page_type == layout::NodePageType::Leaf)
    }

    /// Point every child of a freshly split internal node at its new home.
    fn adopt_children(&self, node: &BTreeNode<K>) -> Result<(), BTreeError> {
        if node.is_leaf() {
            return Ok(());
        }
        for &child in &node.children {
            self.set_parent(child, node.page_id)?;
        }
        Ok(())
    }

    /// Rewrite one page's parent pointer in place.
    fn set_parent(&self, page_id: PageId, parent_id: PageId) -> Result<(), BTreeError> {
        let mut latch = WriteLatchedPage::fetch(&self.buffer_pool, page_id)?;
        layout::write_parent_page_id(&mut latch.page_mut().data, parent_id);
        latch.mark_dirty();
        Ok(())
    }

    /// Record the current root on the header page.
    fn persist_root(&self, root_id: PageId) -> Result<(), BTreeError> {
        let mut latch = WriteLatchedPage::fetch(&self.buffer_pool, HEADER_PAGE_ID)?;
        let mut roots = header::read_roots(latch.page())?;
        roots.insert(self.index_name.clone(), root_id);
        header::write_roots(latch.page_mut(), &roots)?;
        latch.mark_dirty();
        Ok(())
    }

    /// Retire pages emptied by merges. Runs with no latches held; a page an
    /// iterator raced onto is skipped rather than failing the removal.
    fn delete_pages(&self, pages: &[PageId]) -> Result<(), BTreeError> {
        for &page_id in pages {
            match self.buffer_pool.delete_page(page_id) {
                Ok(()) => {}
                Err(BufferPoolError::Pinned(_)) => {
                    warn!("merged page {} still pinned, leaving it allocated", page_id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read-crab to a leaf and snapshot its qualifying entries plus the
    /// next-leaf link. `None` starts at the leftmost leaf.
    pub(super) fn leaf_snapshot(
        &self,
        key: Option<&K>,
    ) -> Result<Option<(Vec<(K, Rid)>, PageId)>, BTreeError> {
        let root = self.root.read();
        if *root == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut latch = ReadLatchedPage::fetch(&self.buffer_pool, *root)?;
        drop(root);

        loop {
            let node = BTreeNode::<K>::load(latch.page())?;
            if node.is_leaf() {
                let mut entries = Vec::with_capacity(node.keys.len());
                for (k, v) in node.keys.iter().zip(node.values.iter()) {
                    if key.map_or(true, |start| k >= start) {
                        entries.push((k.clone(), *v));
                    }
                }
                return Ok(Some((entries, node.next_page_id)));
            }
            let child_idx = match key {
                Some(k) => node.search(k),
                None => 0,
            };
            latch = ReadLatchedPage::fetch(&self.buffer_pool, node.children[child_idx])?;
        }
    }
}
