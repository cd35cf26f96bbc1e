//! Forward cursor over the leaf chain.

use crate::page::LeafPageRef;
use std::marker::PhantomData;
use strata_buffer::{BufferPoolManager, ReadPageGuard};
use strata_common::page::FixedBytes;

/// Forward-only iterator over the key/value pairs of a B+Tree.
///
/// Holds a read guard on the current leaf and a slot position; advancing past
/// the last slot acquires the next leaf in the chain before the current guard
/// is released, so the walk observes each leaf exactly once. An exhausted
/// iterator holds no guard.
pub struct IndexIterator<'a, K, V> {
    bpm: &'a BufferPoolManager,
    guard: Option<ReadPageGuard<'a>>,
    pos: u32,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'a, K: FixedBytes + Ord, V: FixedBytes> IndexIterator<'a, K, V> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, guard: ReadPageGuard<'a>, pos: u32) -> Self {
        Self {
            bpm,
            guard: Some(guard),
            pos,
            _marker: PhantomData,
        }
    }

    /// An iterator that is already exhausted (empty tree).
    pub(crate) fn exhausted(bpm: &'a BufferPoolManager) -> Self {
        Self {
            bpm,
            guard: None,
            pos: 0,
            _marker: PhantomData,
        }
    }
}

impl<K: FixedBytes + Ord, V: FixedBytes> Iterator for IndexIterator<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let guard = self.guard.as_ref()?;
            let leaf = LeafPageRef::<K, V>::new(guard.data());

            if self.pos < leaf.size() {
                let item = (leaf.key_at(self.pos), leaf.value_at(self.pos));
                self.pos += 1;
                return Some(item);
            }

            let next = leaf.next_page_id();
            if !next.is_valid() {
                self.guard = None;
                return None;
            }
            // Guard handoff: latch the next leaf, then release the current.
            let next_guard = self.bpm.read_page(next);
            self.guard = Some(next_guard);
            self.pos = 0;
        }
    }
}
