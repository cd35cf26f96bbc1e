//! RAII page guards owning a pin and the frame latch.

use crate::frame::FrameHeader;
use crate::pool::BufferPoolManager;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use strata_common::page::{PageId, PAGE_SIZE};

/// Shared handle to one resident page.
///
/// While the guard lives, the page's frame holds one pin on its behalf and
/// the frame latch is held in shared mode, so the bytes cannot change and the
/// frame cannot be evicted. Dropping the guard releases the latch, returns
/// the pin, and re-arms eviction once the pin count reaches zero.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a FrameHeader,
    page_id: PageId,
    /// Held latch; taken in `drop` so the latch is released before the pool
    /// mutex is touched.
    data: Option<RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl<'a> ReadPageGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame: &'a FrameHeader,
        page_id: PageId,
        data: RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
    ) -> Self {
        Self {
            bpm,
            frame,
            page_id,
            data: Some(data),
        }
    }

    /// Returns the ID of the guarded page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page bytes.
    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().expect("page guard used after release")[..]
    }

    /// Returns whether the page has been modified but not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        drop(self.data.take());
        self.bpm.release_pin(self.frame);
    }
}

/// Exclusive handle to one resident page.
///
/// Same ownership rules as [`ReadPageGuard`] with the latch held in
/// exclusive mode. The frame is marked dirty the first time the bytes are
/// borrowed mutably.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a FrameHeader,
    page_id: PageId,
    data: Option<RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl<'a> WritePageGuard<'a> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame: &'a FrameHeader,
        page_id: PageId,
        data: RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>,
    ) -> Self {
        Self {
            bpm,
            frame,
            page_id,
            data: Some(data),
        }
    }

    /// Returns the ID of the guarded page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page bytes.
    pub fn data(&self) -> &[u8] {
        &self.data.as_ref().expect("page guard used after release")[..]
    }

    /// Returns the page bytes mutably, marking the frame dirty.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.set_dirty(true);
        &mut self.data.as_mut().expect("page guard used after release")[..]
    }

    /// Returns whether the page has been modified but not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        drop(self.data.take());
        self.bpm.release_pin(self.frame);
    }
}
