//! Buffer pool management for StrataDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU-K eviction policy
//! - Pin counting for concurrent access
//! - Read/write page guards owning both the pin and the frame latch
//! - Dirty page tracking with write-back through the disk scheduler

mod frame;
mod guard;
mod pool;
mod replacer;

pub use frame::{FrameHeader, FrameId};
pub use guard::{ReadPageGuard, WritePageGuard};
pub use pool::{BufferPoolConfig, BufferPoolManager};
pub use replacer::{LruKReplacer, Replacer};
