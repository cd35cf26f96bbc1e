//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use strata_common::page::{PageId, PAGE_SIZE};
use strata_common::Result;

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Path to the backing data file.
    pub path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./strata.db"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages against a single flat file image.
///
/// Page `p` occupies bytes `[p * PAGE_SIZE, (p + 1) * PAGE_SIZE)`. The file
/// grows on demand; reads past the current end of file observe zero-filled
/// data, so a freshly allocated page reads as all zeroes whether or not it
/// has ever been written.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open file handle and page count.
    inner: Mutex<DiskFile>,
}

struct DiskFile {
    /// The backing file.
    file: File,
    /// Number of pages the file currently holds.
    num_pages: u32,
}

impl DiskManager {
    /// Opens (or creates) the backing file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            inner: Mutex::new(DiskFile { file, num_pages }),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Reads one page into `buf`.
    ///
    /// A read past the current end of file succeeds and zero-fills `buf`
    /// without touching the disk.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        if page_id.0 >= inner.num_pages {
            buf.fill(0);
            return Ok(());
        }

        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes one page, extending the file if the offset is past its end.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(data)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        if page_id.0 >= inner.num_pages {
            inner.num_pages = page_id.0 + 1;
        }

        Ok(())
    }

    /// Ensures the file can hold at least `num_pages` pages. Never shrinks.
    pub fn increase_disk_space(&self, num_pages: u32) -> Result<()> {
        let mut inner = self.inner.lock();

        if num_pages <= inner.num_pages {
            return Ok(());
        }

        inner.file.set_len(num_pages as u64 * PAGE_SIZE as u64)?;
        inner.num_pages = num_pages;
        Ok(())
    }

    /// Releases a page's disk space.
    ///
    /// Disk space is never reclaimed; page IDs grow monotonically and the
    /// freed region simply stays in the file. Kept as an explicit call so a
    /// space-reclaiming allocator can slot in later.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Returns the number of pages the file currently holds.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.inner.lock().file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            path: dir.path().join("test.db"),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.path().exists());
        assert_eq!(dm.num_pages(), 0);
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(PageId(0), &data).unwrap();

        let mut read_buf = [0u8; PAGE_SIZE];
        dm.read_page(PageId(0), &mut read_buf).unwrap();
        assert_eq!(read_buf[0], 0xAB);
        assert_eq!(read_buf[100], 0xCD);
        assert_eq!(read_buf[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_read_past_eof_zero_fills() {
        let (dm, _dir) = create_test_disk_manager();

        let mut buf = [0xFFu8; PAGE_SIZE];
        dm.read_page(PageId(99), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_write_extends_file() {
        let (dm, _dir) = create_test_disk_manager();

        let data = [0x11u8; PAGE_SIZE];
        dm.write_page(PageId(4), &data).unwrap();
        assert_eq!(dm.num_pages(), 5);

        // The skipped pages read as zeroes.
        let mut buf = [0xFFu8; PAGE_SIZE];
        dm.read_page(PageId(2), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_increase_disk_space() {
        let (dm, _dir) = create_test_disk_manager();

        dm.increase_disk_space(8).unwrap();
        assert_eq!(dm.num_pages(), 8);

        // Never shrinks.
        dm.increase_disk_space(3).unwrap();
        assert_eq!(dm.num_pages(), 8);

        let mut buf = [0xFFu8; PAGE_SIZE];
        dm.read_page(PageId(7), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_overwrite_page() {
        let (dm, _dir) = create_test_disk_manager();

        let data1 = [0xAAu8; PAGE_SIZE];
        dm.write_page(PageId(0), &data1).unwrap();

        let data2 = [0xBBu8; PAGE_SIZE];
        dm.write_page(PageId(0), &data2).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        dm.read_page(PageId(0), &mut buf).unwrap();
        assert_eq!(buf[0], 0xBB);
        assert_eq!(dm.num_pages(), 1);
    }

    #[test]
    fn test_disk_manager_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.db");

        {
            let config = DiskManagerConfig {
                path: path.clone(),
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(PageId(3), &data).unwrap();
        }

        {
            let config = DiskManagerConfig {
                path,
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            assert_eq!(dm.num_pages(), 4);

            let mut buf = [0u8; PAGE_SIZE];
            dm.read_page(PageId(3), &mut buf).unwrap();
            assert_eq!(buf[0], 0xFF);
        }
    }

    #[test]
    fn test_disk_manager_deallocate_is_noop() {
        let (dm, _dir) = create_test_disk_manager();

        let data = [0x42u8; PAGE_SIZE];
        dm.write_page(PageId(0), &data).unwrap();
        dm.deallocate_page(PageId(0));

        let mut buf = [0u8; PAGE_SIZE];
        dm.read_page(PageId(0), &mut buf).unwrap();
        assert_eq!(buf[0], 0x42);
        assert_eq!(dm.num_pages(), 1);
    }

    #[test]
    fn test_disk_manager_flush() {
        let (dm, _dir) = create_test_disk_manager();
        dm.write_page(PageId(0), &[1u8; PAGE_SIZE]).unwrap();
        dm.flush().unwrap();
    }
}
