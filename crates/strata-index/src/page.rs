//! On-page layouts for B+Tree nodes.
//!
//! Every index page starts with the same 16-byte header of little-endian
//! u32 fields:
//!
//! ```text
//! +------------------+ 0
//! | page_type        | 4
//! | size             | 8
//! | max_size         | 12
//! | next_page_id     | 16   (leaf only; unused elsewhere)
//! +------------------+
//! | key_array        |      max_size x K::LEN bytes
//! +------------------+
//! | value_array      |      max_size x V::LEN bytes (internal: child ids)
//! +------------------+
//! ```
//!
//! For an internal page `key_array[0]` is a sentinel that is never
//! consulted: `child[i]` covers keys in `[key[i], key[i + 1])` with
//! `key[size]` read as infinity. The header page stores only the root page
//! ID, at byte 4.
//!
//! The view types below are zero-copy: they borrow the byte slice of a page
//! guard and read or rewrite fields in place.

use std::marker::PhantomData;
use strata_common::page::{FixedBytes, PageId, PAGE_SIZE};
use strata_common::{Result, StrataError};

const TYPE_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 4;
const MAX_SIZE_OFFSET: usize = 8;
const NEXT_PAGE_ID_OFFSET: usize = 12;
const ROOT_PAGE_ID_OFFSET: usize = 4;

/// Byte offset of the key array; all slot arrays start here.
pub const HEADER_SIZE: usize = 16;

/// Discriminant stored in the first four bytes of every index page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IndexPageType {
    /// Freshly allocated page, never initialized.
    Invalid = 0,
    /// Leaf node.
    Leaf = 1,
    /// Internal node.
    Internal = 2,
    /// Index header page holding the root pointer.
    Header = 3,
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Reads the page type discriminant.
pub fn page_type(data: &[u8]) -> IndexPageType {
    match read_u32(data, TYPE_OFFSET) {
        1 => IndexPageType::Leaf,
        2 => IndexPageType::Internal,
        3 => IndexPageType::Header,
        _ => IndexPageType::Invalid,
    }
}

/// Reads the size field of a node page.
pub fn size(data: &[u8]) -> u32 {
    read_u32(data, SIZE_OFFSET)
}

/// Reads the max_size field of a node page.
pub fn max_size(data: &[u8]) -> u32 {
    read_u32(data, MAX_SIZE_OFFSET)
}

/// Minimum occupancy of a non-root node with the given max size.
pub fn min_size(max_size: u32) -> u32 {
    (max_size + 1) / 2
}

/// Largest leaf max_size that fits a page for the given key/value widths.
pub fn leaf_slot_capacity<K: FixedBytes, V: FixedBytes>() -> u32 {
    ((PAGE_SIZE - HEADER_SIZE) / (K::LEN + V::LEN)) as u32
}

/// Largest internal max_size that fits a page for the given key width.
pub fn internal_slot_capacity<K: FixedBytes>() -> u32 {
    ((PAGE_SIZE - HEADER_SIZE) / (K::LEN + PageId::LEN)) as u32
}

fn key_offset<K: FixedBytes>(index: u32) -> usize {
    HEADER_SIZE + index as usize * K::LEN
}

fn value_offset<K: FixedBytes, V: FixedBytes>(max_size: u32, index: u32) -> usize {
    HEADER_SIZE + max_size as usize * K::LEN + index as usize * V::LEN
}

// ---------------------------------------------------------------------------
// Header page
// ---------------------------------------------------------------------------

/// Read-only view of the index header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    /// Wraps the page bytes.
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(page_type(data), IndexPageType::Header);
        Self { data }
    }

    /// Returns the root page ID, `PageId::INVALID` for an empty tree.
    pub fn root_page_id(&self) -> PageId {
        PageId(read_u32(self.data, ROOT_PAGE_ID_OFFSET))
    }
}

/// Mutable view of the index header page.
pub struct HeaderPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPageMut<'a> {
    /// Wraps the page bytes of an initialized header page.
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(page_type(data), IndexPageType::Header);
        Self { data }
    }

    /// Formats the page as an empty index header.
    pub fn init(data: &'a mut [u8]) -> Self {
        write_u32(data, TYPE_OFFSET, IndexPageType::Header as u32);
        write_u32(data, ROOT_PAGE_ID_OFFSET, PageId::INVALID.0);
        Self { data }
    }

    /// Returns the root page ID.
    pub fn root_page_id(&self) -> PageId {
        PageId(read_u32(self.data, ROOT_PAGE_ID_OFFSET))
    }

    /// Updates the root page ID.
    pub fn set_root_page_id(&mut self, root: PageId) {
        write_u32(self.data, ROOT_PAGE_ID_OFFSET, root.0);
    }
}

// ---------------------------------------------------------------------------
// Leaf pages
// ---------------------------------------------------------------------------

/// Read-only view of a leaf node.
pub struct LeafPageRef<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'a, K: FixedBytes + Ord, V: FixedBytes> LeafPageRef<'a, K, V> {
    /// Wraps the page bytes.
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(page_type(data), IndexPageType::Leaf);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Number of key/value pairs stored.
    pub fn size(&self) -> u32 {
        size(self.data)
    }

    /// Maximum number of pairs before a split is forced.
    pub fn max_size(&self) -> u32 {
        max_size(self.data)
    }

    /// Minimum occupancy of a non-root leaf.
    pub fn min_size(&self) -> u32 {
        min_size(self.max_size())
    }

    /// Returns true when the next insert would force a split.
    pub fn is_full(&self) -> bool {
        self.size() == self.max_size()
    }

    /// The next leaf in the chain, `PageId::INVALID` at the rightmost leaf.
    pub fn next_page_id(&self) -> PageId {
        PageId(read_u32(self.data, NEXT_PAGE_ID_OFFSET))
    }

    /// Key stored in slot `index`.
    pub fn key_at(&self, index: u32) -> K {
        debug_assert!(index < self.size());
        K::decode(&self.data[key_offset::<K>(index)..])
    }

    /// Value stored in slot `index`.
    pub fn value_at(&self, index: u32) -> V {
        debug_assert!(index < self.size());
        V::decode(&self.data[value_offset::<K, V>(self.max_size(), index)..])
    }

    /// Binary search. `Ok` holds the slot of an exact match, `Err` the slot
    /// at which the key would be inserted.
    pub fn search(&self, key: &K) -> std::result::Result<u32, u32> {
        let mut low = 0;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.key_at(mid).cmp(key) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(low)
    }
}

/// Mutable view of a leaf node.
pub struct LeafPageMut<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<'a, K: FixedBytes + Ord, V: FixedBytes> LeafPageMut<'a, K, V> {
    /// Wraps the page bytes of an initialized leaf.
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(page_type(data), IndexPageType::Leaf);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Formats the page as an empty leaf.
    pub fn init(data: &'a mut [u8], max_size: u32) -> Self {
        debug_assert!(max_size >= 2);
        debug_assert!(max_size <= leaf_slot_capacity::<K, V>());
        write_u32(data, TYPE_OFFSET, IndexPageType::Leaf as u32);
        write_u32(data, SIZE_OFFSET, 0);
        write_u32(data, MAX_SIZE_OFFSET, max_size);
        write_u32(data, NEXT_PAGE_ID_OFFSET, PageId::INVALID.0);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Read-only view of the same bytes.
    pub fn as_ref(&self) -> LeafPageRef<'_, K, V> {
        LeafPageRef::new(&self.data[..])
    }

    /// Number of key/value pairs stored.
    pub fn size(&self) -> u32 {
        size(self.data)
    }

    /// Maximum number of pairs before a split is forced.
    pub fn max_size(&self) -> u32 {
        max_size(self.data)
    }

    /// Minimum occupancy of a non-root leaf.
    pub fn min_size(&self) -> u32 {
        min_size(self.max_size())
    }

    /// The next leaf in the chain.
    pub fn next_page_id(&self) -> PageId {
        PageId(read_u32(self.data, NEXT_PAGE_ID_OFFSET))
    }

    /// Re-links the leaf chain.
    pub fn set_next_page_id(&mut self, next: PageId) {
        write_u32(self.data, NEXT_PAGE_ID_OFFSET, next.0);
    }

    /// Key stored in slot `index`.
    pub fn key_at(&self, index: u32) -> K {
        self.as_ref().key_at(index)
    }

    /// Value stored in slot `index`.
    pub fn value_at(&self, index: u32) -> V {
        self.as_ref().value_at(index)
    }

    /// See [`LeafPageRef::search`].
    pub fn search(&self, key: &K) -> std::result::Result<u32, u32> {
        self.as_ref().search(key)
    }

    fn set_size(&mut self, new_size: u32) {
        debug_assert!(new_size <= self.max_size());
        write_u32(self.data, SIZE_OFFSET, new_size);
    }

    fn set_key_at(&mut self, index: u32, key: K) {
        debug_assert!(index < self.size());
        let offset = key_offset::<K>(index);
        key.encode(&mut self.data[offset..offset + K::LEN]);
    }

    fn set_value_at(&mut self, index: u32, value: V) {
        debug_assert!(index < self.size());
        let offset = value_offset::<K, V>(self.max_size(), index);
        value.encode(&mut self.data[offset..offset + V::LEN]);
    }

    /// Opens a hole at `pos`, shifting slots `[pos, size)` one to the right.
    fn shift_right(&mut self, pos: u32) {
        let n = self.size() as usize;
        let pos = pos as usize;
        let ks = HEADER_SIZE + pos * K::LEN;
        let ke = HEADER_SIZE + n * K::LEN;
        self.data.copy_within(ks..ke, ks + K::LEN);

        let vbase = HEADER_SIZE + self.max_size() as usize * K::LEN;
        let vs = vbase + pos * V::LEN;
        let ve = vbase + n * V::LEN;
        self.data.copy_within(vs..ve, vs + V::LEN);
    }

    /// Closes the hole at `pos`, shifting slots `(pos, size)` one to the left.
    fn shift_left(&mut self, pos: u32) {
        let n = self.size() as usize;
        let pos = pos as usize;
        let ks = HEADER_SIZE + (pos + 1) * K::LEN;
        let ke = HEADER_SIZE + n * K::LEN;
        self.data.copy_within(ks..ke, ks - K::LEN);

        let vbase = HEADER_SIZE + self.max_size() as usize * K::LEN;
        let vs = vbase + (pos + 1) * V::LEN;
        let ve = vbase + n * V::LEN;
        self.data.copy_within(vs..ve, vs - V::LEN);
    }

    fn insert_at(&mut self, pos: u32, key: K, value: V) {
        let n = self.size();
        self.shift_right(pos);
        self.set_size(n + 1);
        self.set_key_at(pos, key);
        self.set_value_at(pos, value);
    }

    /// Inserts a key/value pair, keeping slots sorted.
    ///
    /// Fails with `DuplicateKey` if the key is present (checked before
    /// capacity: a duplicate insert into a full leaf must not split it) and
    /// with `NodeFull` if the leaf has no room.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let pos = match self.search(&key) {
            Ok(_) => return Err(StrataError::DuplicateKey),
            Err(pos) => pos,
        };
        if self.size() == self.max_size() {
            return Err(StrataError::NodeFull);
        }
        self.insert_at(pos, key, value);
        Ok(())
    }

    /// Removes the pair in slot `index`.
    pub fn remove_at(&mut self, index: u32) {
        let n = self.size();
        debug_assert!(index < n);
        self.shift_left(index);
        self.set_size(n - 1);
    }

    /// Removes a key if present; returns whether it was found.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.search(key) {
            Ok(index) => {
                self.remove_at(index);
                true
            }
            Err(_) => false,
        }
    }

    /// Splits this full leaf, folding the pending pair into the
    /// redistribution: the left (this) page keeps `(max + 1) / 2` pairs, the
    /// right page takes the remaining `(max + 2) / 2`. Returns the separator
    /// key, which is the right page's first key.
    ///
    /// The caller re-links the leaf chain; this function only moves pairs.
    pub fn split_into(&mut self, other: &mut LeafPageMut<'_, K, V>, key: K, value: V) -> K {
        debug_assert!(self.size() == self.max_size());
        debug_assert_eq!(other.size(), 0);

        let pos = match self.search(&key) {
            Err(pos) => pos,
            Ok(_) => unreachable!("split invoked with a duplicate key"),
        };

        let m = self.max_size();
        let mut keys = Vec::with_capacity(m as usize + 1);
        let mut values = Vec::with_capacity(m as usize + 1);
        for i in 0..m {
            keys.push(self.key_at(i));
            values.push(self.value_at(i));
        }
        keys.insert(pos as usize, key);
        values.insert(pos as usize, value);

        let left_n = (m + 1) / 2;
        let right_n = m + 1 - left_n;

        self.set_size(left_n);
        for i in 0..left_n {
            self.set_key_at(i, keys[i as usize]);
            self.set_value_at(i, values[i as usize]);
        }

        other.set_size(right_n);
        for j in 0..right_n {
            let s = (left_n + j) as usize;
            other.set_key_at(j, keys[s]);
            other.set_value_at(j, values[s]);
        }
        other.key_at(0)
    }

    /// Moves the right sibling's first pair to this leaf's end. Returns the
    /// sibling's new first key, the parent's new separator for the sibling.
    pub fn borrow_from_right(&mut self, right: &mut LeafPageMut<'_, K, V>) -> K {
        debug_assert!(right.size() > right.min_size());

        let key = right.key_at(0);
        let value = right.value_at(0);
        right.remove_at(0);

        let n = self.size();
        self.set_size(n + 1);
        self.set_key_at(n, key);
        self.set_value_at(n, value);
        right.key_at(0)
    }

    /// Moves the left sibling's last pair to this leaf's front. Returns this
    /// leaf's new first key, the parent's new separator for this leaf.
    pub fn borrow_from_left(&mut self, left: &mut LeafPageMut<'_, K, V>) -> K {
        debug_assert!(left.size() > left.min_size());

        let last = left.size() - 1;
        let key = left.key_at(last);
        let value = left.value_at(last);
        left.set_size(last);

        self.insert_at(0, key, value);
        key
    }

    /// Appends all pairs of the right sibling and takes over its chain link.
    /// The sibling page is dead afterwards and should be deleted.
    pub fn merge_from_right(&mut self, right: &LeafPageRef<'_, K, V>) {
        let n = self.size();
        let rn = right.size();
        debug_assert!(n + rn <= self.max_size());

        self.set_size(n + rn);
        for j in 0..rn {
            self.set_key_at(n + j, right.key_at(j));
            self.set_value_at(n + j, right.value_at(j));
        }
        self.set_next_page_id(right.next_page_id());
    }
}

// ---------------------------------------------------------------------------
// Internal pages
// ---------------------------------------------------------------------------

/// Read-only view of an internal node.
///
/// `size` counts children; keys occupy slots `[1, size)` with slot 0 a
/// sentinel.
pub struct InternalPageRef<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<fn() -> K>,
}

impl<'a, K: FixedBytes + Ord> InternalPageRef<'a, K> {
    /// Wraps the page bytes.
    pub fn new(data: &'a [u8]) -> Self {
        debug_assert_eq!(page_type(data), IndexPageType::Internal);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Number of children.
    pub fn size(&self) -> u32 {
        size(self.data)
    }

    /// Maximum number of children before a split is forced.
    pub fn max_size(&self) -> u32 {
        max_size(self.data)
    }

    /// Minimum occupancy of a non-root internal node.
    pub fn min_size(&self) -> u32 {
        min_size(self.max_size())
    }

    /// Returns true when the next child insert would force a split.
    pub fn is_full(&self) -> bool {
        self.size() == self.max_size()
    }

    /// Key in slot `index`; slot 0 is the sentinel and must not be read.
    pub fn key_at(&self, index: u32) -> K {
        debug_assert!(index >= 1, "internal key slot 0 is a sentinel");
        debug_assert!(index < self.size());
        K::decode(&self.data[key_offset::<K>(index)..])
    }

    /// Child page ID in slot `index`.
    pub fn child_at(&self, index: u32) -> PageId {
        debug_assert!(index < self.size());
        PageId::decode(&self.data[value_offset::<K, PageId>(self.max_size(), index)..])
    }

    /// Slot of the child whose subtree covers `key`: the index `i`
    /// satisfying `key[i] <= key < key[i + 1]`.
    pub fn search_child_index(&self, key: &K) -> u32 {
        debug_assert!(self.size() >= 1);
        let mut low = 1;
        let mut high = self.size();
        while low < high {
            let mid = low + (high - low) / 2;
            if *key < self.key_at(mid) {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        low - 1
    }
}

/// Mutable view of an internal node.
pub struct InternalPageMut<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<fn() -> K>,
}

impl<'a, K: FixedBytes + Ord> InternalPageMut<'a, K> {
    /// Wraps the page bytes of an initialized internal node.
    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(page_type(data), IndexPageType::Internal);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Formats the page as an empty internal node.
    pub fn init(data: &'a mut [u8], max_size: u32) -> Self {
        debug_assert!(max_size >= 3);
        debug_assert!(max_size <= internal_slot_capacity::<K>());
        write_u32(data, TYPE_OFFSET, IndexPageType::Internal as u32);
        write_u32(data, SIZE_OFFSET, 0);
        write_u32(data, MAX_SIZE_OFFSET, max_size);
        write_u32(data, NEXT_PAGE_ID_OFFSET, PageId::INVALID.0);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Read-only view of the same bytes.
    pub fn as_ref(&self) -> InternalPageRef<'_, K> {
        InternalPageRef::new(&self.data[..])
    }

    /// Number of children.
    pub fn size(&self) -> u32 {
        size(self.data)
    }

    /// Maximum number of children before a split is forced.
    pub fn max_size(&self) -> u32 {
        max_size(self.data)
    }

    /// Minimum occupancy of a non-root internal node.
    pub fn min_size(&self) -> u32 {
        min_size(self.max_size())
    }

    /// See [`InternalPageRef::key_at`].
    pub fn key_at(&self, index: u32) -> K {
        self.as_ref().key_at(index)
    }

    /// See [`InternalPageRef::child_at`].
    pub fn child_at(&self, index: u32) -> PageId {
        self.as_ref().child_at(index)
    }

    /// See [`InternalPageRef::search_child_index`].
    pub fn search_child_index(&self, key: &K) -> u32 {
        self.as_ref().search_child_index(key)
    }

    fn set_size(&mut self, new_size: u32) {
        debug_assert!(new_size <= self.max_size());
        write_u32(self.data, SIZE_OFFSET, new_size);
    }

    /// Writes the key in slot `index`. Writing slot 0 is allowed: splits and
    /// borrows park the promoted key there, but readers never consult it.
    pub fn set_key_at(&mut self, index: u32, key: K) {
        debug_assert!(index < self.size());
        let offset = key_offset::<K>(index);
        key.encode(&mut self.data[offset..offset + K::LEN]);
    }

    /// Writes the child page ID in slot `index`.
    pub fn set_child_at(&mut self, index: u32, child: PageId) {
        debug_assert!(index < self.size());
        let offset = value_offset::<K, PageId>(self.max_size(), index);
        child.encode(&mut self.data[offset..offset + PageId::LEN]);
    }

    /// Populates a brand-new root after a root split: the old root on the
    /// left, the promoted key, and the new right sibling.
    pub fn init_root(&mut self, left: PageId, key: K, right: PageId) {
        debug_assert_eq!(self.size(), 0);
        self.set_size(2);
        self.set_child_at(0, left);
        self.set_key_at(1, key);
        self.set_child_at(1, right);
    }

    fn shift_right(&mut self, pos: u32) {
        let n = self.size() as usize;
        let pos = pos as usize;
        let ks = HEADER_SIZE + pos * K::LEN;
        let ke = HEADER_SIZE + n * K::LEN;
        self.data.copy_within(ks..ke, ks + K::LEN);

        let cbase = HEADER_SIZE + self.max_size() as usize * K::LEN;
        let cs = cbase + pos * PageId::LEN;
        let ce = cbase + n * PageId::LEN;
        self.data.copy_within(cs..ce, cs + PageId::LEN);
    }

    fn shift_left(&mut self, pos: u32) {
        let n = self.size() as usize;
        let pos = pos as usize;
        let ks = HEADER_SIZE + (pos + 1) * K::LEN;
        let ke = HEADER_SIZE + n * K::LEN;
        self.data.copy_within(ks..ke, ks - K::LEN);

        let cbase = HEADER_SIZE + self.max_size() as usize * K::LEN;
        let cs = cbase + (pos + 1) * PageId::LEN;
        let ce = cbase + n * PageId::LEN;
        self.data.copy_within(cs..ce, cs - PageId::LEN);
    }

    /// Inserts a separator key and the child to its right, keeping slots
    /// sorted. Fails with `NodeFull` when the node has no room.
    pub fn insert_child(&mut self, key: K, child: PageId) -> Result<()> {
        if self.size() == self.max_size() {
            return Err(StrataError::NodeFull);
        }
        let pos = self.search_child_index(&key) + 1;
        let n = self.size();
        self.shift_right(pos);
        self.set_size(n + 1);
        self.set_key_at(pos, key);
        self.set_child_at(pos, child);
        Ok(())
    }

    /// Removes the key and child in slot `index`. Slot 0 removal shifts the
    /// whole node left (used when lending the first child to a sibling).
    pub fn remove_at(&mut self, index: u32) {
        let n = self.size();
        debug_assert!(index < n);
        self.shift_left(index);
        self.set_size(n - 1);
    }

    /// Splits this full node, folding the pending entry into the
    /// redistribution: the left (this) page keeps `(max - 1) / 2 + 1`
    /// children, the right page `max / 2 + 1`. The middle key is promoted
    /// and returned; it lives in neither half's consulted key range.
    pub fn split_into(&mut self, other: &mut InternalPageMut<'_, K>, key: K, child: PageId) -> K {
        debug_assert!(self.size() == self.max_size());
        debug_assert_eq!(other.size(), 0);

        let m = self.max_size();
        let pos = self.search_child_index(&key) + 1;

        // Slot 0 of `keys` pairs the leftmost child and is never consulted;
        // the pending key doubles as its placeholder.
        let mut keys = Vec::with_capacity(m as usize + 1);
        let mut children = Vec::with_capacity(m as usize + 1);
        keys.push(key);
        children.push(self.child_at(0));
        for i in 1..m {
            keys.push(self.key_at(i));
            children.push(self.child_at(i));
        }
        keys.insert(pos as usize, key);
        children.insert(pos as usize, child);

        let left_n = (m - 1) / 2 + 1;
        let right_n = m + 1 - left_n;

        self.set_size(left_n);
        for i in 0..left_n {
            self.set_child_at(i, children[i as usize]);
            if i >= 1 {
                self.set_key_at(i, keys[i as usize]);
            }
        }

        let promoted = keys[left_n as usize];
        other.set_size(right_n);
        other.set_child_at(0, children[left_n as usize]);
        other.set_key_at(0, promoted);
        for j in 1..right_n {
            let s = (left_n + j) as usize;
            other.set_key_at(j, keys[s]);
            other.set_child_at(j, children[s]);
        }
        promoted
    }

    /// Pulls the separator down as this node's last key, adopts the right
    /// sibling's first child, and returns the sibling's old `key[1]` as the
    /// parent's new separator.
    pub fn borrow_from_right(
        &mut self,
        right: &mut InternalPageMut<'_, K>,
        separator: K,
    ) -> K {
        debug_assert!(right.size() > right.min_size());

        let n = self.size();
        self.set_size(n + 1);
        self.set_key_at(n, separator);
        self.set_child_at(n, right.child_at(0));

        let new_separator = right.key_at(1);
        right.remove_at(0);
        new_separator
    }

    /// Pulls the separator down as this node's `key[1]`, adopts the left
    /// sibling's last child as the new leftmost child, and returns the left
    /// sibling's old last key as the parent's new separator.
    pub fn borrow_from_left(&mut self, left: &mut InternalPageMut<'_, K>, separator: K) -> K {
        debug_assert!(left.size() > left.min_size());

        let last = left.size() - 1;
        let moved_child = left.child_at(last);
        let new_separator = left.key_at(last);
        left.set_size(last);

        let n = self.size();
        self.shift_right(0);
        self.set_size(n + 1);
        self.set_child_at(0, moved_child);
        self.set_key_at(1, separator);
        new_separator
    }

    /// Appends the separator and every entry of the right sibling. The
    /// sibling page is dead afterwards and should be deleted.
    pub fn merge_from_right(&mut self, right: &InternalPageRef<'_, K>, separator: K) {
        let n = self.size();
        let rn = right.size();
        debug_assert!(n + rn <= self.max_size());

        self.set_size(n + rn);
        self.set_key_at(n, separator);
        self.set_child_at(n, right.child_at(0));
        for j in 1..rn {
            self.set_key_at(n + j, right.key_at(j));
            self.set_child_at(n + j, right.child_at(j));
        }
    }
}
