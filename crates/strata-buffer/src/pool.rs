//! Buffer pool manager.

use crate::frame::{FrameHeader, FrameId};
use crate::guard::{ReadPageGuard, WritePageGuard};
use crate::replacer::{LruKReplacer, Replacer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use strata_common::page::{PageId, PAGE_SIZE};
use strata_storage::{io_promise, DiskManager, DiskRequest, DiskScheduler};
use sysinfo::System;

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
    /// K for the LRU-K replacement policy (must be at least 2).
    pub lru_k: usize,
    /// Number of background I/O worker threads.
    pub io_workers: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            num_frames: 1024,
            lru_k: 2,
            io_workers: 1,
        }
    }
}

/// Buffer pool manager.
///
/// Maps page IDs to a fixed set of in-memory frames and hands out latched
/// page guards. The page table and free list live under one coarse mutex;
/// page *data* is protected by per-frame latches which are only acquired
/// after that mutex has been released. Dirty pages are written back through
/// the disk scheduler before their frame is reused.
pub struct BufferPoolManager {
    /// Number of frames in the pool.
    num_frames: usize,
    /// The frames themselves, created once and never reallocated.
    frames: Vec<FrameHeader>,
    /// Page table and free list.
    inner: Mutex<PoolInner>,
    /// Eviction policy.
    replacer: LruKReplacer,
    /// Monotonic page ID counter.
    next_page_id: AtomicU32,
    /// Background I/O.
    scheduler: DiskScheduler,
}

struct PoolInner {
    /// Maps resident page IDs to their frames.
    page_table: HashMap<PageId, FrameId>,
    /// Frames not holding any page.
    free_list: Vec<FrameId>,
}

impl BufferPoolManager {
    /// Creates a new buffer pool over the given disk manager.
    ///
    /// Page ID allocation continues from the end of the existing file, so a
    /// pool reopened over a populated file never hands out a live page ID.
    pub fn new(config: BufferPoolConfig, disk: Arc<DiskManager>) -> Self {
        assert!(config.num_frames > 0, "buffer pool needs at least one frame");

        let num_frames = config.num_frames;
        let frames: Vec<_> = (0..num_frames)
            .map(|i| FrameHeader::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();
        let next_page_id = AtomicU32::new(disk.num_pages());

        Self {
            num_frames,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(num_frames),
                free_list,
            }),
            replacer: LruKReplacer::new(num_frames, config.lru_k),
            next_page_id,
            scheduler: DiskScheduler::new(disk, config.io_workers),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so caching stays useful on low-memory systems.
    pub fn auto_sized(disk: Arc<DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let num_frames = (available_bytes / 4 / PAGE_SIZE).max(1_000);

        Self::new(
            BufferPoolConfig {
                num_frames,
                ..Default::default()
            },
            disk,
        )
    }

    /// Returns the number of frames in the pool.
    pub fn size(&self) -> usize {
        self.num_frames
    }

    /// Allocates a new page on disk and returns its ID.
    ///
    /// The counter is monotonic and the backing file is grown to cover the
    /// page, so this cannot fail. The page is not brought into memory.
    pub fn new_page(&self) -> PageId {
        let id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        let page_id = PageId(id);
        if let Err(e) = self.scheduler.increase_disk_space(id + 1) {
            panic!("failed to grow the backing file for {page_id}: {e}");
        }
        page_id
    }

    /// Removes a page from memory and disk.
    ///
    /// Returns false iff the page is resident and pinned. Deleting a page
    /// that was never resident succeeds trivially.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                return false;
            }
            self.replacer.remove(frame_id);
            inner.page_table.remove(&page_id);
            frame.reset();
            inner.free_list.push(frame_id);
        }

        self.scheduler.deallocate_page(page_id);
        true
    }

    /// Brings a page into memory and returns a shared guard over it.
    ///
    /// Returns None iff every frame is pinned.
    pub fn checked_read_page(&self, page_id: PageId) -> Option<ReadPageGuard<'_>> {
        let frame_id = self.allocate_frame(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        let data = frame.read_data();
        Some(ReadPageGuard::new(self, frame, page_id, data))
    }

    /// Brings a page into memory and returns an exclusive guard over it.
    ///
    /// Returns None iff every frame is pinned.
    pub fn checked_write_page(&self, page_id: PageId) -> Option<WritePageGuard<'_>> {
        let frame_id = self.allocate_frame(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        let data = frame.write_data();
        Some(WritePageGuard::new(self, frame, page_id, data))
    }

    /// Like [`checked_read_page`](Self::checked_read_page) but aborts the
    /// process when the pool is out of frames.
    pub fn read_page(&self, page_id: PageId) -> ReadPageGuard<'_> {
        match self.checked_read_page(page_id) {
            Some(guard) => guard,
            None => panic!("failed to bring in {page_id} for reading: all frames are pinned"),
        }
    }

    /// Like [`checked_write_page`](Self::checked_write_page) but aborts the
    /// process when the pool is out of frames.
    pub fn write_page(&self, page_id: PageId) -> WritePageGuard<'_> {
        match self.checked_write_page(page_id) {
            Some(guard) => guard,
            None => panic!("failed to bring in {page_id} for writing: all frames are pinned"),
        }
    }

    /// Synchronously writes a resident page to disk and clears its dirty
    /// bit. Returns false if the page is not in memory.
    ///
    /// The pool mutex is released before the frame latch is taken: a client
    /// may hold that latch while waiting on the pool mutex itself (a tree
    /// descent does exactly this), so taking them in the reverse order here
    /// would deadlock.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let frame_id = match self.inner.lock().page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        self.flush_frame(page_id, &self.frames[frame_id.0 as usize]);
        true
    }

    /// Synchronously writes every resident page to disk.
    pub fn flush_all_pages(&self) {
        let entries: Vec<(PageId, FrameId)> = {
            let inner = self.inner.lock();
            inner
                .page_table
                .iter()
                .map(|(&page_id, &frame_id)| (page_id, frame_id))
                .collect()
        };
        for (page_id, frame_id) in entries {
            self.flush_frame(page_id, &self.frames[frame_id.0 as usize]);
        }
    }

    /// Returns the pin count of a resident page, None otherwise.
    ///
    /// Diagnostic; the value can be stale the moment it is returned.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frames[frame_id.0 as usize].pin_count())
    }

    /// Finds or allocates the frame for `page_id`, pins it, and records the
    /// access. Returns None iff no frame can be freed.
    ///
    /// Runs entirely under the pool mutex, including the synchronous I/O for
    /// eviction write-back and page load; see the module docs for the
    /// trade-off.
    fn allocate_frame(&self, page_id: PageId) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        // 1. Cache hit.
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            self.frames[frame_id.0 as usize].pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Some(frame_id);
        }

        // 2. Free frame, else 3. evict a victim.
        let frame_id = match inner.free_list.pop() {
            Some(frame_id) => frame_id,
            None => {
                let victim_id = self.replacer.evict()?;
                let victim = &self.frames[victim_id.0 as usize];
                let old_page_id = victim
                    .page_id()
                    .expect("evicted a frame with no resident page");

                // 4. Dirty victims are written back before reuse.
                if victim.is_dirty() {
                    self.write_back(old_page_id, victim);
                }

                inner.page_table.remove(&old_page_id);
                victim_id
            }
        };

        // 5. Install the new mapping and load the page.
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        self.load_page(page_id, frame);
        frame.set_page_id(Some(page_id));
        inner.page_table.insert(page_id, frame_id);

        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        Some(frame_id)
    }

    /// Schedules a read for `page_id` and blocks until the bytes are in the
    /// frame. A page that was allocated but never written reads as zeroes.
    fn load_page(&self, page_id: PageId, frame: &FrameHeader) {
        let (promise, future) = io_promise();
        self.scheduler.schedule(DiskRequest::Read {
            page_id,
            completion: promise,
        });
        match future.wait() {
            Ok(data) => frame.copy_from(&data[..]),
            Err(e) => panic!("disk read of {page_id} failed: {e}"),
        }
    }

    /// Eviction write-back: schedules a write of the victim's bytes and
    /// blocks until it lands, then clears the dirty bit. Called under the
    /// pool mutex; the victim is unpinned, so its latch is uncontended.
    fn write_back(&self, page_id: PageId, frame: &FrameHeader) {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        frame.copy_to(&mut data[..]);
        self.write_to_disk(page_id, data);
        frame.set_dirty(false);
    }

    /// Flush path, called without the pool mutex. The mapping is
    /// re-validated under the frame latch: if the frame was remapped since
    /// the lookup, the page went through eviction write-back and is already
    /// durable.
    fn flush_frame(&self, page_id: PageId, frame: &FrameHeader) {
        // The write is scheduled while the latch is held: a later
        // modification can only happen after the latch is released, so its
        // write-back lands behind this one in the same per-page queue. Only
        // the wait happens unlatched.
        let future = {
            let latched = frame.read_data();
            if frame.page_id() != Some(page_id) {
                return;
            }
            let mut data = Box::new([0u8; PAGE_SIZE]);
            data.copy_from_slice(&latched[..]);
            frame.set_dirty(false);

            let (promise, future) = io_promise();
            self.scheduler.schedule(DiskRequest::Write {
                page_id,
                data,
                completion: promise,
            });
            future
        };
        if let Err(e) = future.wait() {
            panic!("disk write of {page_id} failed: {e}");
        }
    }

    fn write_to_disk(&self, page_id: PageId, data: Box<[u8; PAGE_SIZE]>) {
        let (promise, future) = io_promise();
        self.scheduler.schedule(DiskRequest::Write {
            page_id,
            data,
            completion: promise,
        });
        if let Err(e) = future.wait() {
            panic!("disk write of {page_id} failed: {e}");
        }
    }

    /// Returns a guard's pin and re-arms eviction at pin count zero.
    pub(crate) fn release_pin(&self, frame: &FrameHeader) {
        let _inner = self.inner.lock();
        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame.frame_id(), true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::DiskManagerConfig;
    use tempfile::tempdir;

    fn create_test_pool(num_frames: usize) -> (BufferPoolManager, Arc<DiskManager>, tempfile::TempDir)
    {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            path: dir.path().join("pool.db"),
            fsync_enabled: false,
        };
        let disk = Arc::new(DiskManager::new(config).unwrap());
        let pool = BufferPoolManager::new(
            BufferPoolConfig {
                num_frames,
                lru_k: 2,
                io_workers: 1,
            },
            Arc::clone(&disk),
        );
        (pool, disk, dir)
    }

    fn fill_page(pool: &BufferPoolManager, page_id: PageId, byte: u8) {
        let mut guard = pool.write_page(page_id);
        guard.data_mut().fill(byte);
    }

    fn first_byte(pool: &BufferPoolManager, page_id: PageId) -> u8 {
        let guard = pool.read_page(page_id);
        guard.data()[0]
    }

    #[test]
    fn test_pool_new() {
        let (pool, _disk, _dir) = create_test_pool(10);
        assert_eq!(pool.size(), 10);
        assert_eq!(pool.pin_count(PageId(0)), None);
    }

    #[test]
    fn test_new_page_ids_are_monotonic() {
        let (pool, disk, _dir) = create_test_pool(4);

        assert_eq!(pool.new_page(), PageId(0));
        assert_eq!(pool.new_page(), PageId(1));
        assert_eq!(pool.new_page(), PageId(2));
        // Disk space is grown eagerly.
        assert_eq!(disk.num_pages(), 3);
    }

    #[test]
    fn test_new_page_continues_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");

        {
            let disk = Arc::new(
                DiskManager::new(DiskManagerConfig {
                    path: path.clone(),
                    fsync_enabled: false,
                })
                .unwrap(),
            );
            let pool = BufferPoolManager::new(BufferPoolConfig::default(), disk);
            pool.new_page();
            pool.new_page();
        }

        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                path,
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = BufferPoolManager::new(BufferPoolConfig::default(), disk);
        assert_eq!(pool.new_page(), PageId(2));
    }

    #[test]
    fn test_read_your_writes() {
        let (pool, _disk, _dir) = create_test_pool(4);

        let page_id = pool.new_page();
        fill_page(&pool, page_id, 0xAB);
        assert_eq!(first_byte(&pool, page_id), 0xAB);
    }

    #[test]
    fn test_pin_counts_follow_guards() {
        let (pool, _disk, _dir) = create_test_pool(4);
        let page_id = pool.new_page();

        {
            let _g1 = pool.read_page(page_id);
            assert_eq!(pool.pin_count(page_id), Some(1));
            {
                let _g2 = pool.read_page(page_id);
                assert_eq!(pool.pin_count(page_id), Some(2));
            }
            assert_eq!(pool.pin_count(page_id), Some(1));
        }
        assert_eq!(pool.pin_count(page_id), Some(0));
    }

    #[test]
    fn test_eviction_and_refetch() {
        // Scenario: pool of 3 frames, K = 2. Write distinct bytes into four
        // pages (forcing one eviction), guard a fifth, then verify the first
        // page still reads back its original bytes.
        let (pool, _disk, _dir) = create_test_pool(3);

        let pages: Vec<_> = (0..5).map(|_| pool.new_page()).collect();
        for (i, &page_id) in pages.iter().take(4).enumerate() {
            fill_page(&pool, page_id, 0x10 + i as u8);
        }

        let guard = pool.checked_write_page(pages[4]);
        assert!(guard.is_some());
        drop(guard);

        assert_eq!(first_byte(&pool, pages[0]), 0x10);
        assert_eq!(first_byte(&pool, pages[1]), 0x11);
        assert_eq!(first_byte(&pool, pages[2]), 0x12);
        assert_eq!(first_byte(&pool, pages[3]), 0x13);
    }

    #[test]
    fn test_out_of_memory_and_recovery() {
        // Scenario: pool of 2 frames, both pinned. A third page cannot come
        // in until one guard drops.
        let (pool, _disk, _dir) = create_test_pool(2);

        let p0 = pool.new_page();
        let p1 = pool.new_page();
        let p2 = pool.new_page();

        let g0 = pool.checked_write_page(p0).unwrap();
        let g1 = pool.checked_write_page(p1).unwrap();

        assert!(pool.checked_read_page(p2).is_none());

        drop(g0);
        let g2 = pool.checked_read_page(p2);
        assert!(g2.is_some());

        drop(g1);
        drop(g2);
    }

    #[test]
    fn test_dirty_page_written_back_on_eviction() {
        let (pool, disk, _dir) = create_test_pool(1);

        let p0 = pool.new_page();
        let p1 = pool.new_page();

        fill_page(&pool, p0, 0xEE);
        // Bringing in p1 evicts dirty p0, which must hit the disk first.
        fill_page(&pool, p1, 0x11);

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(p0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xEE);
    }

    #[test]
    fn test_flush_page_persists_and_clears_dirty() {
        let (pool, disk, _dir) = create_test_pool(4);

        let page_id = pool.new_page();
        fill_page(&pool, page_id, 0x5A);

        {
            let guard = pool.read_page(page_id);
            assert!(guard.is_dirty());
        }

        assert!(pool.flush_page(page_id));

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut buf).unwrap();
        assert_eq!(buf[0], 0x5A);

        let guard = pool.read_page(page_id);
        assert!(!guard.is_dirty());
    }

    #[test]
    fn test_flush_page_not_resident() {
        let (pool, _disk, _dir) = create_test_pool(4);
        let page_id = pool.new_page();
        // Never brought into memory.
        assert!(!pool.flush_page(page_id));
    }

    #[test]
    fn test_write_persists_across_eviction_and_flush() {
        let (pool, _disk, _dir) = create_test_pool(2);

        let target = pool.new_page();
        fill_page(&pool, target, 0x77);
        assert!(pool.flush_page(target));

        // Churn the pool until the target is certainly evicted.
        for _ in 0..4 {
            let page_id = pool.new_page();
            fill_page(&pool, page_id, 0x00);
        }

        assert_eq!(first_byte(&pool, target), 0x77);
    }

    #[test]
    fn test_flush_all_pages() {
        let (pool, disk, _dir) = create_test_pool(8);

        let pages: Vec<_> = (0..5).map(|_| pool.new_page()).collect();
        for (i, &page_id) in pages.iter().enumerate() {
            fill_page(&pool, page_id, 0xA0 + i as u8);
        }

        pool.flush_all_pages();

        for (i, &page_id) in pages.iter().enumerate() {
            let mut buf = [0u8; PAGE_SIZE];
            disk.read_page(page_id, &mut buf).unwrap();
            assert_eq!(buf[0], 0xA0 + i as u8);
        }
    }

    #[test]
    fn test_delete_page() {
        let (pool, _disk, _dir) = create_test_pool(4);
        let page_id = pool.new_page();

        fill_page(&pool, page_id, 0x42);
        assert!(pool.delete_page(page_id));
        assert_eq!(pool.pin_count(page_id), None);
    }

    #[test]
    fn test_delete_pinned_page_fails() {
        let (pool, _disk, _dir) = create_test_pool(4);
        let page_id = pool.new_page();

        let guard = pool.read_page(page_id);
        assert!(!pool.delete_page(page_id));
        drop(guard);
        assert!(pool.delete_page(page_id));
    }

    #[test]
    fn test_delete_page_never_resident() {
        let (pool, _disk, _dir) = create_test_pool(4);
        let page_id = pool.new_page();
        assert!(pool.delete_page(page_id));
    }

    #[test]
    fn test_deleted_frame_is_reusable() {
        let (pool, _disk, _dir) = create_test_pool(1);

        let p0 = pool.new_page();
        fill_page(&pool, p0, 0x01);
        assert!(pool.delete_page(p0));

        // The freed frame serves the next page without eviction.
        let p1 = pool.new_page();
        let guard = pool.checked_read_page(p1);
        assert!(guard.is_some());
    }

    #[test]
    #[should_panic(expected = "all frames are pinned")]
    fn test_unchecked_read_aborts_when_full() {
        let (pool, _disk, _dir) = create_test_pool(1);
        let p0 = pool.new_page();
        let p1 = pool.new_page();

        let _g = pool.write_page(p0);
        let _ = pool.read_page(p1);
    }

    #[test]
    fn test_shared_readers_coexist() {
        let (pool, _disk, _dir) = create_test_pool(4);
        let page_id = pool.new_page();
        fill_page(&pool, page_id, 0x33);

        let g1 = pool.read_page(page_id);
        let g2 = pool.read_page(page_id);
        assert_eq!(g1.data()[0], 0x33);
        assert_eq!(g2.data()[0], 0x33);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let (pool, _disk, _dir) = create_test_pool(16);
        let pool = Arc::new(pool);

        let pages: Vec<_> = (0..8).map(|_| pool.new_page()).collect();
        for &page_id in &pages {
            fill_page(&pool, page_id, 0);
        }

        std::thread::scope(|s| {
            for _ in 0..4 {
                let pool = Arc::clone(&pool);
                let pages = pages.clone();
                s.spawn(move || {
                    for round in 0..50u8 {
                        for &page_id in &pages {
                            let mut guard = pool.write_page(page_id);
                            guard.data_mut()[0] = round;
                            drop(guard);

                            let guard = pool.read_page(page_id);
                            assert!(guard.data()[0] < 50);
                        }
                    }
                });
            }
        });

        for &page_id in &pages {
            assert_eq!(pool.pin_count(page_id), Some(0));
        }
    }

}
