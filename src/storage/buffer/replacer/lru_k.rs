use std::collections::{BTreeSet, HashMap, VecDeque};
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// Per-frame access bookkeeping. `history` holds the K most recent logical
/// timestamps, newest first, so `history.back()` is the ranking key: the
/// first-access time while the frame is cold, the K-th most recent access
/// once it is warm.
struct FrameRecord {
    history: VecDeque<u64>,
    evictable: bool,
}

#[derive(Default)]
struct ReplacerState {
    records: HashMap<FrameId, FrameRecord>,
    /// Evictable frames with fewer than K recorded accesses, ordered by
    /// first-access time. Preferred victims.
    young: BTreeSet<(u64, FrameId)>,
    /// Evictable frames with at least K recorded accesses, ordered by the
    /// K-th most recent access time.
    mature: BTreeSet<(u64, FrameId)>,
    clock: u64,
    evictable_count: usize,
}

/// LRU-K replacement policy over buffer pool frames.
///
/// Frames partition into a `young` set (fewer than K accesses, infinite
/// backward K-distance) and a `mature` set (K or more). `young` is strictly
/// preferred for eviction; within a set the smallest ranking timestamp goes
/// first. Timestamps come from an internal monotonic counter.
pub struct LruKReplacer {
    capacity: usize,
    k: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(capacity: usize, k: usize) -> Self {
        assert!(k >= 1, "history length K must be at least 1");
        Self {
            capacity,
            k,
            state: Mutex::new(ReplacerState::default()),
        }
    }

    /// Record an access to `frame_id` at the next logical timestamp.
    ///
    /// An access to an unknown frame while the tracked-frame budget is
    /// exhausted is ignored.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if !state.records.contains_key(&frame_id) && state.records.len() >= self.capacity {
            return;
        }
        let ts = state.clock;
        state.clock += 1;

        if !state.records.contains_key(&frame_id) {
            let mut history = VecDeque::with_capacity(self.k);
            history.push_front(ts);
            state.records.insert(
                frame_id,
                FrameRecord {
                    history,
                    evictable: false,
                },
            );
            return;
        }

        let record = state.records.get_mut(&frame_id).unwrap();
        let was_evictable = record.evictable;
        let old_key = (*record.history.back().unwrap(), frame_id);
        let was_mature = record.history.len() >= self.k;

        record.history.push_front(ts);
        if record.history.len() > self.k {
            record.history.pop_back();
        }
        let new_key = (*record.history.back().unwrap(), frame_id);
        let is_mature = record.history.len() >= self.k;

        if was_evictable {
            if was_mature {
                state.mature.remove(&old_key);
            } else {
                state.young.remove(&old_key);
            }
            if is_mature {
                state.mature.insert(new_key);
            } else {
                state.young.insert(new_key);
            }
        }
    }

    /// Toggle whether `frame_id` participates in eviction. Idempotent;
    /// unknown frames are ignored.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut state = self.state.lock();
        let (key, mature) = match state.records.get_mut(&frame_id) {
            Some(record) if record.evictable != evictable => {
                record.evictable = evictable;
                (
                    (*record.history.back().unwrap(), frame_id),
                    record.history.len() >= self.k,
                )
            }
            _ => return,
        };

        if evictable {
            if mature {
                state.mature.insert(key);
            } else {
                state.young.insert(key);
            }
            state.evictable_count += 1;
        } else {
            if mature {
                state.mature.remove(&key);
            } else {
                state.young.remove(&key);
            }
            state.evictable_count -= 1;
        }
    }

    /// Choose and remove a victim: the oldest `young` frame if any, else
    /// the `mature` frame with the smallest K-th-back timestamp. All history
    /// for the victim is discarded.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        let victim = state
            .young
            .iter()
            .next()
            .or_else(|| state.mature.iter().next())
            .map(|&(ts, id)| (ts, id))?;

        let (ts, frame_id) = victim;
        state.young.remove(&(ts, frame_id));
        state.mature.remove(&(ts, frame_id));
        state.records.remove(&frame_id);
        state.evictable_count -= 1;
        Some(frame_id)
    }

    /// Forcibly discard a frame's history. Removing a frame that is tracked
    /// but not evictable is a programming error.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let (key, mature) = match state.records.get(&frame_id) {
            None => return,
            Some(record) => {
                assert!(
                    record.evictable,
                    "removing unevictable frame {} from replacer",
                    frame_id
                );
                (
                    (*record.history.back().unwrap(), frame_id),
                    record.history.len() >= self.k,
                )
            }
        };
        if mature {
            state.mature.remove(&key);
        } else {
            state.young.remove(&key);
        }
        state.records.remove(&frame_id);
        state.evictable_count -= 1;
    }

    /// Number of frames currently eligible for eviction.
    pub fn size(&self) -> usize {
        self.state.lock().evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_young_evicts_by_first_access() {
        let replacer = LruKReplacer::new(7, 3);
        for frame in [1, 2, 3] {
            replacer.record_access(frame);
            replacer.set_evictable(frame, true);
        }
        // A second access leaves frame 1 below K = 3, so it stays ranked by
        // its first access and remains the oldest.
        replacer.record_access(1);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_young_preferred_over_mature() {
        let replacer = LruKReplacer::new(7, 2);
        // Frame 1 reaches K accesses, frame 2 stays cold.
        replacer.record_access(1);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        // 2 was accessed after 1 but has infinite backward K-distance.
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_mature_orders_by_kth_access() {
        let replacer = LruKReplacer::new(7, 2);
        // ts: 1->0, 2->1, 1->2, 2->3. K-th back: frame 1 at 0, frame 2 at 1.
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
    }

    #[test]
    fn test_pinned_frames_not_evicted() {
        let replacer = LruKReplacer::new(7, 2);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.set_evictable(2, true);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_set_evictable_idempotent() {
        let replacer = LruKReplacer::new(7, 2);
        replacer.record_access(1);
        replacer.set_evictable(1, true);
        replacer.set_evictable(1, true);
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(1, false);
        replacer.set_evictable(1, false);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_unknown_frame_ignored_at_capacity() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.record_access(3); // over budget, dropped
        replacer.set_evictable(3, true);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_evict_discards_history() {
        let replacer = LruKReplacer::new(7, 2);
        replacer.record_access(1);
        replacer.record_access(1);
        replacer.set_evictable(1, true);
        assert_eq!(replacer.evict(), Some(1));
        // Re-registered frame starts cold again.
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.record_access(2);
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    #[should_panic(expected = "unevictable")]
    fn test_remove_unevictable_panics() {
        let replacer = LruKReplacer::new(7, 2);
        replacer.record_access(1);
        replacer.remove(1);
    }
}
