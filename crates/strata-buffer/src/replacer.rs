//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable (unpinned) or pinned.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Selects a victim frame for eviction and forgets its access history.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Removes a frame from the replacer, along with its access history.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// LRU-K replacement policy.
///
/// Evicts the evictable frame with the maximum backward K-distance. Frames
/// with fewer than K recorded accesses have infinite distance and are
/// victimized first, in FIFO order of their first access; among frames with
/// at least K accesses the one with the oldest last access loses.
pub struct LruKReplacer {
    /// Total frame capacity; frame IDs must be below this.
    num_frames: usize,
    /// The K in LRU-K.
    k: usize,
    /// Internal state protected by a mutex.
    inner: Mutex<LruKInner>,
}

struct LruKInner {
    /// Access metadata per tracked frame.
    entries: HashMap<FrameId, LruKEntry>,
    /// Frames with fewer than K accesses, FIFO by first access.
    history: VecDeque<FrameId>,
    /// Monotonic logical clock, bumped on every recorded access.
    current_ts: u64,
    /// Number of tracked frames currently marked evictable.
    evictable_count: usize,
}

struct LruKEntry {
    /// Number of recorded accesses since the frame was last evicted.
    access_count: usize,
    /// Timestamp of the most recent access.
    last_access_ts: u64,
    /// Whether this frame may be chosen as a victim.
    evictable: bool,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer for `num_frames` frames.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 2, "LRU-K requires k >= 2");

        Self {
            num_frames,
            k,
            inner: Mutex::new(LruKInner {
                entries: HashMap::new(),
                history: VecDeque::new(),
                current_ts: 0,
                evictable_count: 0,
            }),
        }
    }

    /// Returns the total frame capacity.
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    fn check_frame_id(&self, frame_id: FrameId) {
        assert!(
            (frame_id.0 as usize) < self.num_frames,
            "{frame_id} is out of range for a replacer of {} frames",
            self.num_frames
        );
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);

        let mut inner = self.inner.lock();
        inner.current_ts += 1;
        let ts = inner.current_ts;
        let k = self.k;

        match inner.entries.get_mut(&frame_id) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_access_ts = ts;
                if entry.access_count == k {
                    // Promotion out of the history queue; from here on the
                    // frame competes on its last access timestamp.
                    inner.history.retain(|&fid| fid != frame_id);
                }
            }
            None => {
                inner.entries.insert(
                    frame_id,
                    LruKEntry {
                        access_count: 1,
                        last_access_ts: ts,
                        evictable: false,
                    },
                );
                inner.history.push_back(frame_id);
            }
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.check_frame_id(frame_id);

        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(&frame_id) else {
            return;
        };
        if entry.evictable != evictable {
            entry.evictable = evictable;
            if evictable {
                inner.evictable_count += 1;
            } else {
                inner.evictable_count -= 1;
            }
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.evictable_count == 0 {
            return None;
        }

        // Frames with fewer than K accesses have infinite backward
        // K-distance; the oldest first access among them wins.
        let mut victim = inner
            .history
            .iter()
            .copied()
            .find(|fid| inner.entries[fid].evictable);

        // Otherwise the frame with the oldest last access loses.
        if victim.is_none() {
            victim = inner
                .entries
                .iter()
                .filter(|(_, e)| e.evictable && e.access_count >= self.k)
                .min_by_key(|(_, e)| e.last_access_ts)
                .map(|(&fid, _)| fid);
        }

        let victim = victim?;
        inner.entries.remove(&victim);
        inner.history.retain(|&fid| fid != victim);
        inner.evictable_count -= 1;
        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get(&frame_id) else {
            return;
        };
        assert!(
            entry.evictable,
            "cannot remove non-evictable {frame_id} from the replacer"
        );

        inner.entries.remove(&frame_id);
        inner.history.retain(|&fid| fid != frame_id);
        inner.evictable_count -= 1;
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}
