//! Whole-tree B+Tree operations: lookup, insertion, removal, iteration.

use crate::iterator::IndexIterator;
use crate::page::{
    self, internal_slot_capacity, leaf_slot_capacity, HeaderPageMut, HeaderPageRef, IndexPageType,
    InternalPageMut, InternalPageRef, LeafPageMut, LeafPageRef,
};
use std::marker::PhantomData;
use std::sync::Arc;
use strata_buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use strata_common::page::{FixedBytes, PageId};
use strata_common::StrataError;

/// Configuration for a B+Tree index.
#[derive(Debug, Clone)]
pub struct BPlusTreeConfig {
    /// Page holding the root pointer; created at startup.
    pub header_page_id: PageId,
    /// Maximum key/value pairs per leaf.
    pub leaf_max_size: u32,
    /// Maximum children per internal node.
    pub internal_max_size: u32,
}

/// A concurrent, disk-backed B+Tree with unique keys.
///
/// Nodes are buffer-pool pages; every access goes through page guards.
/// Readers crab down the tree with shared latches. Writers descend under
/// exclusive latches, stacking ancestor guards and releasing the whole stack
/// as soon as the just-latched child is safe for the pending operation, so a
/// split or merge can always reach every node it needs to restructure.
pub struct BPlusTree<K, V> {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    leaf_max_size: u32,
    internal_max_size: u32,
    _marker: PhantomData<fn() -> (K, V)>,
}

/// Ancestor guards held during a write descent. The header guard is kept
/// until a safe node proves the root cannot change.
struct Context<'a> {
    header: Option<WritePageGuard<'a>>,
    stack: Vec<WritePageGuard<'a>>,
}

impl Context<'_> {
    fn release_ancestors(&mut self) {
        self.header = None;
        self.stack.clear();
    }
}

/// A node can absorb an insert without splitting.
fn insert_safe(data: &[u8]) -> bool {
    page::size(data) < page::max_size(data)
}

/// A node can give up one entry without rebalancing. Root nodes are exempt
/// from minimum occupancy but must not shrink into a root change.
fn remove_safe(data: &[u8], is_root: bool) -> bool {
    let size = page::size(data);
    match page::page_type(data) {
        IndexPageType::Leaf => {
            if is_root {
                size > 1
            } else {
                size > page::min_size(page::max_size(data))
            }
        }
        IndexPageType::Internal => {
            if is_root {
                size > 2
            } else {
                size > page::min_size(page::max_size(data))
            }
        }
        other => panic!("index descent reached a {other:?} page"),
    }
}

impl<K: FixedBytes + Ord, V: FixedBytes> BPlusTree<K, V> {
    /// Creates a B+Tree over `bpm`, initializing the header page with an
    /// empty root pointer.
    pub fn new(bpm: Arc<BufferPoolManager>, config: BPlusTreeConfig) -> Self {
        assert!(
            config.leaf_max_size >= 2 && config.leaf_max_size <= leaf_slot_capacity::<K, V>(),
            "leaf_max_size {} outside [2, {}]",
            config.leaf_max_size,
            leaf_slot_capacity::<K, V>()
        );
        assert!(
            config.internal_max_size >= 3
                && config.internal_max_size <= internal_slot_capacity::<K>(),
            "internal_max_size {} outside [3, {}]",
            config.internal_max_size,
            internal_slot_capacity::<K>()
        );

        let tree = Self {
            bpm,
            header_page_id: config.header_page_id,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            _marker: PhantomData,
        };

        let mut guard = tree.bpm.write_page(tree.header_page_id);
        HeaderPageMut::init(guard.data_mut());
        drop(guard);
        tree
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        !self.root_page_id().is_valid()
    }

    /// Returns the root page ID, `PageId::INVALID` for an empty tree.
    pub fn root_page_id(&self) -> PageId {
        let guard = self.bpm.read_page(self.header_page_id);
        HeaderPageRef::new(guard.data()).root_page_id()
    }

    /// Point lookup. Read-latches crab from the header down to the leaf.
    pub fn get_value(&self, key: &K) -> Option<V> {
        let guard = self.leaf_for(Some(key))?;
        let leaf = LeafPageRef::<K, V>::new(guard.data());
        leaf.search(key).ok().map(|slot| leaf.value_at(slot))
    }

    /// Inserts a key/value pair. Returns false if the key already exists.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut header_guard = self.bpm.write_page(self.header_page_id);
        let root_id = HeaderPageRef::new(header_guard.data()).root_page_id();

        if !root_id.is_valid() {
            // Empty tree: the first leaf becomes the root.
            let leaf_id = self.bpm.new_page();
            let mut leaf_guard = self.bpm.write_page(leaf_id);
            let mut leaf = LeafPageMut::<K, V>::init(leaf_guard.data_mut(), self.leaf_max_size);
            match leaf.insert(key, value) {
                Ok(()) => {}
                Err(e) => unreachable!("insert into a fresh root leaf failed: {e}"),
            }
            HeaderPageMut::new(header_guard.data_mut()).set_root_page_id(leaf_id);
            return true;
        }

        let mut ctx = Context {
            header: Some(header_guard),
            stack: Vec::new(),
        };
        let mut guard = self.bpm.write_page(root_id);
        if insert_safe(guard.data()) {
            ctx.header = None;
        }

        loop {
            if page::page_type(guard.data()) == IndexPageType::Leaf {
                break;
            }
            let child_id = {
                let node = InternalPageRef::<K>::new(guard.data());
                node.child_at(node.search_child_index(&key))
            };
            let child = self.bpm.write_page(child_id);
            ctx.stack.push(guard);
            if insert_safe(child.data()) {
                ctx.release_ancestors();
            }
            guard = child;
        }

        let mut leaf = LeafPageMut::<K, V>::new(guard.data_mut());
        match leaf.insert(key, value) {
            Ok(()) => true,
            Err(StrataError::DuplicateKey) => false,
            Err(StrataError::NodeFull) => {
                self.split_leaf(&mut ctx, &mut guard, key, value);
                true
            }
            Err(e) => unreachable!("unexpected leaf insert failure: {e}"),
        }
    }

    /// Removes a key. Absent keys are a no-op.
    pub fn remove(&self, key: &K) {
        let header_guard = self.bpm.write_page(self.header_page_id);
        let root_id = HeaderPageRef::new(header_guard.data()).root_page_id();
        if !root_id.is_valid() {
            return;
        }

        let mut ctx = Context {
            header: Some(header_guard),
            stack: Vec::new(),
        };
        let mut guard = self.bpm.write_page(root_id);
        if remove_safe(guard.data(), true) {
            ctx.header = None;
        }

        loop {
            if page::page_type(guard.data()) == IndexPageType::Leaf {
                break;
            }
            let child_id = {
                let node = InternalPageRef::<K>::new(guard.data());
                node.child_at(node.search_child_index(key))
            };
            let child = self.bpm.write_page(child_id);
            ctx.stack.push(guard);
            if remove_safe(child.data(), false) {
                ctx.release_ancestors();
            }
            guard = child;
        }

        let leaf_pid = guard.page_id();
        let mut leaf = LeafPageMut::<K, V>::new(guard.data_mut());
        let slot = match leaf.search(key) {
            Ok(slot) => slot,
            Err(_) => return,
        };
        leaf.remove_at(slot);

        let size = leaf.size();
        let min = leaf.min_size();
        if ctx.stack.is_empty() {
            // The leaf is the root (an underfull leaf always retains its
            // ancestors, so an empty stack means there are none).
            if size == 0 {
                let header_guard = ctx
                    .header
                    .as_mut()
                    .expect("emptying the root requires the header latch");
                HeaderPageMut::new(header_guard.data_mut()).set_root_page_id(PageId::INVALID);
                drop(guard);
                // Skipped if a concurrent leaf-chain reader still pins the
                // page; the space is unreclaimed either way.
                let _ = self.bpm.delete_page(leaf_pid);
            }
            return;
        }
        if size >= min {
            return;
        }

        self.rebalance_leaf(&mut ctx, guard, key);
    }

    /// Iterates over all pairs in ascending key order.
    pub fn iter(&self) -> IndexIterator<'_, K, V> {
        match self.leaf_for(None) {
            Some(guard) => IndexIterator::new(self.bpm.as_ref(), guard, 0),
            None => IndexIterator::exhausted(self.bpm.as_ref()),
        }
    }

    /// Iterates over all pairs with keys `>= key` in ascending order.
    pub fn iter_from(&self, key: &K) -> IndexIterator<'_, K, V> {
        match self.leaf_for(Some(key)) {
            Some(guard) => {
                let pos = {
                    let leaf = LeafPageRef::<K, V>::new(guard.data());
                    match leaf.search(key) {
                        Ok(slot) => slot,
                        Err(slot) => slot,
                    }
                };
                IndexIterator::new(self.bpm.as_ref(), guard, pos)
            }
            None => IndexIterator::exhausted(self.bpm.as_ref()),
        }
    }

    /// Read-crabs from the header to the leaf covering `key`, or to the
    /// leftmost leaf when no key is given. None iff the tree is empty.
    fn leaf_for(&self, key: Option<&K>) -> Option<ReadPageGuard<'_>> {
        let header_guard = self.bpm.read_page(self.header_page_id);
        let root_id = HeaderPageRef::new(header_guard.data()).root_page_id();
        if !root_id.is_valid() {
            return None;
        }
        let mut guard = self.bpm.read_page(root_id);
        drop(header_guard);

        loop {
            match page::page_type(guard.data()) {
                IndexPageType::Leaf => return Some(guard),
                IndexPageType::Internal => {
                    let child_id = {
                        let node = InternalPageRef::<K>::new(guard.data());
                        match key {
                            Some(key) => node.child_at(node.search_child_index(key)),
                            None => node.child_at(0),
                        }
                    };
                    // Child first, then release the parent.
                    let child = self.bpm.read_page(child_id);
                    guard = child;
                }
                other => panic!("index descent reached a {other:?} page"),
            }
        }
    }

    /// Splits a full leaf, folding in the pending pair, and propagates the
    /// separator upward.
    fn split_leaf(&self, ctx: &mut Context<'_>, leaf_guard: &mut WritePageGuard<'_>, key: K, value: V) {
        let new_pid = self.bpm.new_page();
        let mut right_guard = self.bpm.write_page(new_pid);

        let mut right = LeafPageMut::<K, V>::init(right_guard.data_mut(), self.leaf_max_size);
        let mut left = LeafPageMut::<K, V>::new(leaf_guard.data_mut());
        let separator = left.split_into(&mut right, key, value);
        right.set_next_page_id(left.next_page_id());
        left.set_next_page_id(new_pid);

        self.insert_into_parent(ctx, separator, new_pid);
    }

    /// Walks the ancestor stack inserting `(separator, right_pid)`, splitting
    /// full internal nodes along the way; grows a new root if the stack runs
    /// out with a separator still pending.
    fn insert_into_parent(&self, ctx: &mut Context<'_>, separator: K, right_pid: PageId) {
        let mut separator = separator;
        let mut right_pid = right_pid;

        loop {
            let Some(mut parent_guard) = ctx.stack.pop() else {
                // The root itself split.
                let header_guard = ctx
                    .header
                    .as_mut()
                    .expect("growing a new root requires the header latch");
                let old_root = HeaderPageRef::new(header_guard.data()).root_page_id();

                let root_pid = self.bpm.new_page();
                let mut root_guard = self.bpm.write_page(root_pid);
                let mut root =
                    InternalPageMut::<K>::init(root_guard.data_mut(), self.internal_max_size);
                root.init_root(old_root, separator, right_pid);
                HeaderPageMut::new(header_guard.data_mut()).set_root_page_id(root_pid);
                return;
            };

            let mut parent = InternalPageMut::<K>::new(parent_guard.data_mut());
            match parent.insert_child(separator, right_pid) {
                Ok(()) => return,
                Err(_) => {
                    let new_pid = self.bpm.new_page();
                    let mut new_guard = self.bpm.write_page(new_pid);
                    let mut new_right =
                        InternalPageMut::<K>::init(new_guard.data_mut(), self.internal_max_size);
                    separator = parent.split_into(&mut new_right, separator, right_pid);
                    right_pid = new_pid;
                }
            }
        }
    }

    /// Fixes an underfull leaf by borrowing from or merging with an
    /// immediate sibling, then propagates any separator removal upward.
    fn rebalance_leaf(&self, ctx: &mut Context<'_>, leaf_guard: WritePageGuard<'_>, key: &K) {
        let mut leaf_guard = leaf_guard;
        let mut parent_guard = ctx
            .stack
            .pop()
            .expect("underfull non-root leaf must have a latched parent");
        let leaf_pid = leaf_guard.page_id();

        let (slot, parent_size) = {
            let parent = InternalPageRef::<K>::new(parent_guard.data());
            let slot = parent.search_child_index(key);
            debug_assert_eq!(parent.child_at(slot), leaf_pid);
            (slot, parent.size())
        };

        if slot + 1 < parent_size {
            // A right sibling exists; borrow from it, else merge it in.
            let right_pid = InternalPageRef::<K>::new(parent_guard.data()).child_at(slot + 1);
            let mut right_guard = self.bpm.write_page(right_pid);

            let can_lend = {
                let right = LeafPageRef::<K, V>::new(right_guard.data());
                right.size() > right.min_size()
            };
            if can_lend {
                let mut leaf = LeafPageMut::<K, V>::new(leaf_guard.data_mut());
                let mut right = LeafPageMut::<K, V>::new(right_guard.data_mut());
                let new_separator = leaf.borrow_from_right(&mut right);
                InternalPageMut::<K>::new(parent_guard.data_mut())
                    .set_key_at(slot + 1, new_separator);
                return;
            }

            {
                let mut leaf = LeafPageMut::<K, V>::new(leaf_guard.data_mut());
                let right = LeafPageRef::<K, V>::new(right_guard.data());
                leaf.merge_from_right(&right);
            }
            drop(right_guard);
            // Skipped if a concurrent leaf-chain reader still pins the page;
            // the space is unreclaimed either way.
            let _ = self.bpm.delete_page(right_pid);
            drop(leaf_guard);
            self.remove_separator(ctx, parent_guard, slot + 1, key);
        } else {
            // Leftmost sibling arrangement. Release the leaf before latching
            // the left sibling so leaf latches are always taken left to
            // right; the exclusively latched parent keeps the pair stable
            // while the leaf is briefly unlatched.
            let left_pid = InternalPageRef::<K>::new(parent_guard.data()).child_at(slot - 1);
            drop(leaf_guard);
            let mut left_guard = self.bpm.write_page(left_pid);
            let mut leaf_guard = self.bpm.write_page(leaf_pid);

            let can_lend = {
                let left = LeafPageRef::<K, V>::new(left_guard.data());
                left.size() > left.min_size()
            };
            if can_lend {
                let mut leaf = LeafPageMut::<K, V>::new(leaf_guard.data_mut());
                let mut left = LeafPageMut::<K, V>::new(left_guard.data_mut());
                let new_separator = leaf.borrow_from_left(&mut left);
                InternalPageMut::<K>::new(parent_guard.data_mut()).set_key_at(slot, new_separator);
                return;
            }

            {
                let mut left = LeafPageMut::<K, V>::new(left_guard.data_mut());
                let leaf = LeafPageRef::<K, V>::new(leaf_guard.data());
                left.merge_from_right(&leaf);
            }
            drop(leaf_guard);
            // See above.
            let _ = self.bpm.delete_page(leaf_pid);
            self.remove_separator(ctx, parent_guard, slot, key);
        }
    }

    /// Removes the separator in `key_slot` of an internal node, then fixes
    /// any resulting underflow: collapse the root, borrow from a sibling, or
    /// merge and recurse into the grandparent.
    fn remove_separator(
        &self,
        ctx: &mut Context<'_>,
        mut node_guard: WritePageGuard<'_>,
        key_slot: u32,
        key: &K,
    ) {
        let node_pid = node_guard.page_id();
        {
            let mut node = InternalPageMut::<K>::new(node_guard.data_mut());
            node.remove_at(key_slot);
        }

        let (size, min) = {
            let node = InternalPageRef::<K>::new(node_guard.data());
            (node.size(), node.min_size())
        };

        if ctx.stack.is_empty() {
            // The node is the root.
            if size == 1 {
                // Single remaining child: the tree loses one level.
                let child = InternalPageRef::<K>::new(node_guard.data()).child_at(0);
                let header_guard = ctx
                    .header
                    .as_mut()
                    .expect("collapsing the root requires the header latch");
                HeaderPageMut::new(header_guard.data_mut()).set_root_page_id(child);
                drop(node_guard);
                let _ = self.bpm.delete_page(node_pid);
            }
            return;
        }
        if size >= min {
            return;
        }

        let mut parent_guard = ctx
            .stack
            .pop()
            .expect("underfull non-root node must have a latched parent");
        let (slot, parent_size) = {
            let parent = InternalPageRef::<K>::new(parent_guard.data());
            let slot = parent.search_child_index(key);
            debug_assert_eq!(parent.child_at(slot), node_pid);
            (slot, parent.size())
        };

        if slot + 1 < parent_size {
            let right_pid = InternalPageRef::<K>::new(parent_guard.data()).child_at(slot + 1);
            let mut right_guard = self.bpm.write_page(right_pid);
            let separator = InternalPageRef::<K>::new(parent_guard.data()).key_at(slot + 1);

            let can_lend = {
                let right = InternalPageRef::<K>::new(right_guard.data());
                right.size() > right.min_size()
            };
            if can_lend {
                let mut node = InternalPageMut::<K>::new(node_guard.data_mut());
                let mut right = InternalPageMut::<K>::new(right_guard.data_mut());
                let new_separator = node.borrow_from_right(&mut right, separator);
                InternalPageMut::<K>::new(parent_guard.data_mut())
                    .set_key_at(slot + 1, new_separator);
                return;
            }

            {
                let mut node = InternalPageMut::<K>::new(node_guard.data_mut());
                let right = InternalPageRef::<K>::new(right_guard.data());
                node.merge_from_right(&right, separator);
            }
            drop(right_guard);
            let _ = self.bpm.delete_page(right_pid);
            drop(node_guard);
            self.remove_separator(ctx, parent_guard, slot + 1, key);
        } else {
            let left_pid = InternalPageRef::<K>::new(parent_guard.data()).child_at(slot - 1);
            let mut left_guard = self.bpm.write_page(left_pid);
            let separator = InternalPageRef::<K>::new(parent_guard.data()).key_at(slot);

            let can_lend = {
                let left = InternalPageRef::<K>::new(left_guard.data());
                left.size() > left.min_size()
            };
            if can_lend {
                let mut node = InternalPageMut::<K>::new(node_guard.data_mut());
                let mut left = InternalPageMut::<K>::new(left_guard.data_mut());
                let new_separator = node.borrow_from_left(&mut left, separator);
                InternalPageMut::<K>::new(parent_guard.data_mut()).set_key_at(slot, new_separator);
                return;
            }

            {
                let mut left = InternalPageMut::<K>::new(left_guard.data_mut());
                let node = InternalPageRef::<K>::new(node_guard.data());
                left.merge_from_right(&node, separator);
            }
            drop(node_guard);
            let _ = self.bpm.delete_page(node_pid);
            self.remove_separator(ctx, parent_guard, slot, key);
        }
    }
}
