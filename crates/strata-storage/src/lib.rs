//! Storage layer for StrataDB.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O against a single flat file image
//! - Disk scheduler for asynchronous reads and writes with per-page ordering

mod disk;
mod scheduler;

pub use disk::{DiskManager, DiskManagerConfig};
pub use scheduler::{io_promise, DiskRequest, DiskScheduler, IoFuture, IoPromise};
