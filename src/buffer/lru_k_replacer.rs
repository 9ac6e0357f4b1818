use crate::common::config::FrameId;
use log::warn;
use std::collections::{HashMap, VecDeque};

struct FrameEntry {
    history: VecDeque<u64>,
    is_evictable: bool,
}

/// LRU-K eviction policy. Tracks the last `k` access timestamps of each
/// frame and evicts the evictable frame with the largest backward k-distance.
/// Frames with fewer than `k` recorded accesses have infinite distance and
/// are preferred victims, tie-broken by earliest first access.
pub struct LRUKReplacer {
    frames: HashMap<FrameId, FrameEntry>,
    current_timestamp: u64,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        Self {
            frames: HashMap::with_capacity(num_frames),
            current_timestamp: 0,
            replacer_size: num_frames,
            k,
        }
    }

    /// Evicts the frame with the largest backward k-distance among the
    /// evictable frames, removing its access history. Returns `None` when
    /// nothing is evictable.
    pub fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, bool, u64)> = None;

        for (&frame_id, entry) in &self.frames {
            if !entry.is_evictable {
                continue;
            }
            let infinite = entry.history.len() < self.k;
            let reference = if infinite {
                // Tie-break +inf frames by their earliest access.
                *entry.history.front().unwrap_or(&0)
            } else {
                entry.history[entry.history.len() - self.k]
            };

            let better = match victim {
                None => true,
                Some((_, vic_infinite, vic_reference)) => {
                    if infinite != vic_infinite {
                        infinite
                    } else {
                        reference < vic_reference
                    }
                }
            };
            if better {
                victim = Some((frame_id, infinite, reference));
            }
        }

        victim.map(|(frame_id, _, _)| {
            self.frames.remove(&frame_id);
            frame_id
        })
    }

    /// Records an access to `frame_id` at the current logical timestamp.
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.current_timestamp += 1;
        let now = self.current_timestamp;
        let k = self.k;
        let entry = self.frames.entry(frame_id).or_insert_with(|| FrameEntry {
            history: VecDeque::with_capacity(k),
            is_evictable: false,
        });
        if entry.history.len() == k {
            entry.history.pop_front();
        }
        entry.history.push_back(now);
    }

    /// Toggles whether `frame_id` may be evicted.
    pub fn set_evictable(&mut self, frame_id: FrameId, is_evictable: bool) {
        if let Some(entry) = self.frames.get_mut(&frame_id) {
            entry.is_evictable = is_evictable;
        }
    }

    /// Drops all state for `frame_id`, evictable or not.
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(entry) = self.frames.get(&frame_id) {
            if !entry.is_evictable {
                warn!("removing non-evictable frame {} from replacer", frame_id);
            }
            self.frames.remove(&frame_id);
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.frames.values().filter(|entry| entry.is_evictable).count()
    }

    pub fn capacity(&self) -> usize {
        self.replacer_size
    }
}
