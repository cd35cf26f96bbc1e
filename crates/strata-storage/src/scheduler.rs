//! Asynchronous disk scheduler with per-page request ordering.

use crate::disk::DiskManager;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use strata_common::page::{PageId, PAGE_SIZE};
use strata_common::{Result, StrataError};

/// Completion side of a scheduled request. Fulfilled exactly once by the
/// worker thread that executed the request, on success and on failure alike.
pub struct IoPromise<T> {
    tx: SyncSender<Result<T>>,
}

impl<T> IoPromise<T> {
    /// Fulfils the promise. The result is dropped if the waiter is gone.
    pub fn fulfil(self, result: Result<T>) {
        let _ = self.tx.send(result);
    }
}

/// Waiting side of a scheduled request.
pub struct IoFuture<T> {
    rx: Receiver<Result<T>>,
}

impl<T> IoFuture<T> {
    /// Blocks the calling thread until the request completes.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().unwrap_or_else(|_| {
            Err(StrataError::Internal(
                "disk request dropped without completion".to_string(),
            ))
        })
    }
}

/// Creates a connected promise/future pair for one disk request.
pub fn io_promise<T>() -> (IoPromise<T>, IoFuture<T>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (IoPromise { tx }, IoFuture { rx })
}

/// A request to perform one page of disk I/O.
pub enum DiskRequest {
    /// Read a page; the completion receives the page bytes.
    Read {
        /// Page to read.
        page_id: PageId,
        /// Fulfilled with the page contents.
        completion: IoPromise<Box<[u8; PAGE_SIZE]>>,
    },
    /// Write a page; the completion fires once the bytes are on disk.
    Write {
        /// Page to write.
        page_id: PageId,
        /// Bytes to persist.
        data: Box<[u8; PAGE_SIZE]>,
        /// Fulfilled when the write has been applied.
        completion: IoPromise<()>,
    },
}

impl DiskRequest {
    fn page_id(&self) -> PageId {
        match self {
            DiskRequest::Read { page_id, .. } => *page_id,
            DiskRequest::Write { page_id, .. } => *page_id,
        }
    }
}

/// Schedules disk requests onto background worker threads.
///
/// Requests are sharded across `T` queues by `page_id % T`, each drained by
/// one dedicated worker. All I/O for a single page therefore executes in
/// FIFO order relative to its scheduling order, which rules out
/// read-before-write reorderings for that page.
pub struct DiskScheduler {
    disk: Arc<DiskManager>,
    /// One queue per worker. Taken on drop so the hang-up acts as the
    /// shutdown sentinel.
    queues: Option<Vec<Sender<DiskRequest>>>,
    workers: Vec<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns `workers` background threads, each owning one request queue.
    pub fn new(disk: Arc<DiskManager>, workers: usize) -> Self {
        assert!(workers >= 1, "disk scheduler needs at least one worker");

        let mut queues = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel::<DiskRequest>();
            let disk = Arc::clone(&disk);
            let handle = std::thread::Builder::new()
                .name(format!("strata-io-{worker_id}"))
                .spawn(move || Self::worker_loop(disk, rx))
                .expect("failed to spawn disk worker thread");
            queues.push(tx);
            handles.push(handle);
        }

        Self {
            disk,
            queues: Some(queues),
            workers: handles,
        }
    }

    /// Enqueues a request onto the queue owned by `page_id % T`.
    pub fn schedule(&self, request: DiskRequest) {
        let page_id = request.page_id();
        assert!(page_id.is_valid(), "scheduled I/O for an invalid page id");

        let queues = self
            .queues
            .as_ref()
            .expect("disk scheduler already shut down");
        let queue = &queues[page_id.0 as usize % queues.len()];
        queue
            .send(request)
            .expect("disk worker exited while the scheduler was live");
    }

    /// Ensures the backing file can hold at least `num_pages` pages.
    ///
    /// Runs synchronously on the calling thread; allocation must be visible
    /// before any I/O for the new page is scheduled.
    pub fn increase_disk_space(&self, num_pages: u32) -> Result<()> {
        self.disk.increase_disk_space(num_pages)
    }

    /// Releases a page's disk space (currently a no-op, see `DiskManager`).
    pub fn deallocate_page(&self, page_id: PageId) {
        self.disk.deallocate_page(page_id);
    }

    fn worker_loop(disk: Arc<DiskManager>, rx: Receiver<DiskRequest>) {
        // A hang-up on the queue is the shutdown signal.
        while let Ok(request) = rx.recv() {
            match request {
                DiskRequest::Read {
                    page_id,
                    completion,
                } => {
                    let mut buf = Box::new([0u8; PAGE_SIZE]);
                    let result = disk.read_page(page_id, &mut buf).map(|_| buf);
                    completion.fulfil(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    completion,
                } => {
                    completion.fulfil(disk.write_page(page_id, &data));
                }
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing every queue wakes its worker out of recv(); then join.
        self.queues.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use tempfile::tempdir;

    fn create_test_scheduler(workers: usize) -> (DiskScheduler, Arc<DiskManager>, tempfile::TempDir)
    {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            path: dir.path().join("sched.db"),
            fsync_enabled: false,
        };
        let disk = Arc::new(DiskManager::new(config).unwrap());
        let scheduler = DiskScheduler::new(Arc::clone(&disk), workers);
        (scheduler, disk, dir)
    }

    fn page_filled(byte: u8) -> Box<[u8; PAGE_SIZE]> {
        Box::new([byte; PAGE_SIZE])
    }

    #[test]
    fn test_scheduler_write_then_read() {
        let (scheduler, _disk, _dir) = create_test_scheduler(1);

        let (promise, future) = io_promise();
        scheduler.schedule(DiskRequest::Write {
            page_id: PageId(0),
            data: page_filled(0xAB),
            completion: promise,
        });
        future.wait().unwrap();

        let (promise, future) = io_promise();
        scheduler.schedule(DiskRequest::Read {
            page_id: PageId(0),
            completion: promise,
        });
        let data = future.wait().unwrap();
        assert_eq!(data[0], 0xAB);
        assert_eq!(data[PAGE_SIZE - 1], 0xAB);
    }

    #[test]
    fn test_scheduler_read_unwritten_page_is_zeroed() {
        let (scheduler, _disk, _dir) = create_test_scheduler(1);

        scheduler.increase_disk_space(4).unwrap();
        let (promise, future) = io_promise();
        scheduler.schedule(DiskRequest::Read {
            page_id: PageId(3),
            completion: promise,
        });
        let data = future.wait().unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_scheduler_same_page_fifo() {
        // Back-to-back writes to one page: the last scheduled write must be
        // the one the disk observes.
        let (scheduler, disk, _dir) = create_test_scheduler(4);

        let mut futures = Vec::new();
        for i in 0..50u8 {
            let (promise, future) = io_promise();
            scheduler.schedule(DiskRequest::Write {
                page_id: PageId(7),
                data: page_filled(i),
                completion: promise,
            });
            futures.push(future);
        }
        for future in futures {
            future.wait().unwrap();
        }

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(PageId(7), &mut buf).unwrap();
        assert_eq!(buf[0], 49);
    }

    #[test]
    fn test_scheduler_write_read_interleaved_same_page() {
        // A read scheduled after a write on the same page must observe it.
        let (scheduler, _disk, _dir) = create_test_scheduler(3);

        for round in 0..20u8 {
            let (wp, wf) = io_promise();
            scheduler.schedule(DiskRequest::Write {
                page_id: PageId(5),
                data: page_filled(round),
                completion: wp,
            });
            let (rp, rf) = io_promise();
            scheduler.schedule(DiskRequest::Read {
                page_id: PageId(5),
                completion: rp,
            });
            wf.wait().unwrap();
            let data = rf.wait().unwrap();
            assert_eq!(data[0], round);
        }
    }

    #[test]
    fn test_scheduler_multiple_pages_multiple_workers() {
        let (scheduler, disk, _dir) = create_test_scheduler(4);

        let mut futures = Vec::new();
        for page in 0..16u32 {
            let (promise, future) = io_promise();
            scheduler.schedule(DiskRequest::Write {
                page_id: PageId(page),
                data: page_filled(page as u8),
                completion: promise,
            });
            futures.push(future);
        }
        for future in futures {
            future.wait().unwrap();
        }

        for page in 0..16u32 {
            let mut buf = [0u8; PAGE_SIZE];
            disk.read_page(PageId(page), &mut buf).unwrap();
            assert_eq!(buf[0], page as u8);
        }
    }

    #[test]
    fn test_scheduler_concurrent_producers() {
        let (scheduler, disk, _dir) = create_test_scheduler(2);
        let scheduler = Arc::new(scheduler);

        std::thread::scope(|s| {
            for t in 0..4u32 {
                let scheduler = Arc::clone(&scheduler);
                s.spawn(move || {
                    for i in 0..25u32 {
                        let page = PageId(t * 25 + i);
                        let (promise, future) = io_promise();
                        scheduler.schedule(DiskRequest::Write {
                            page_id: page,
                            data: page_filled(page.0 as u8),
                            completion: promise,
                        });
                        future.wait().unwrap();
                    }
                });
            }
        });

        for page in 0..100u32 {
            let mut buf = [0u8; PAGE_SIZE];
            disk.read_page(PageId(page), &mut buf).unwrap();
            assert_eq!(buf[0], page as u8);
        }
    }

    #[test]
    fn test_scheduler_shutdown_joins_workers() {
        let (scheduler, disk, _dir) = create_test_scheduler(3);

        let (promise, future) = io_promise();
        scheduler.schedule(DiskRequest::Write {
            page_id: PageId(0),
            data: page_filled(0x77),
            completion: promise,
        });
        future.wait().unwrap();

        drop(scheduler);

        // Work scheduled before shutdown is durable.
        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(PageId(0), &mut buf).unwrap();
        assert_eq!(buf[0], 0x77);
    }

    #[test]
    #[should_panic(expected = "invalid page id")]
    fn test_scheduler_rejects_invalid_page_id() {
        let (scheduler, _disk, _dir) = create_test_scheduler(1);
        let (promise, _future) = io_promise();
        scheduler.schedule(DiskRequest::Read {
            page_id: PageId::INVALID,
            completion: promise,
        });
    }
}
