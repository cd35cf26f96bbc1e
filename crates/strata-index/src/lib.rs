//! Concurrent disk-backed B+Tree index for StrataDB.
//!
//! Tree nodes are buffer-pool pages accessed through read/write page guards;
//! descent uses latch crabbing, releasing ancestor latches as soon as the
//! child at hand is known safe for the pending operation. Leaves form a
//! singly linked chain for forward range scans.

mod iterator;
pub mod page;
mod tree;

pub use iterator::IndexIterator;
pub use page::{
    internal_slot_capacity, leaf_slot_capacity, HeaderPageMut, HeaderPageRef, IndexPageType,
    InternalPageMut, InternalPageRef, LeafPageMut, LeafPageRef,
};
pub use tree::{BPlusTree, BPlusTreeConfig};
