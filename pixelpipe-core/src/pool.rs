//! Bounded pool of reusable bitmap buffers
//!
//! Buffers are bucketed by allocation size. A request for `S` bytes is served
//! from the smallest non-empty bucket whose size class is at least `S` and at
//! most `MAX_SIZE_MULTIPLE * S`; the pooled buffer is reconfigured to the
//! requested dimensions. Buckets are kept in recency order so trimming drops
//! buffers from the least recently used bucket first.

use crate::bitmap::{allocation_size, Bitmap, PixelConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

/// Largest ratio between a pooled buffer and the requested size that still
/// counts as a match
pub const MAX_SIZE_MULTIPLE: usize = 8;

/// Counters for pool effectiveness
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub rejected: u64,
    pub evictions: u64,
}

/// All pooled buffers of one allocation size, most recently returned first
#[derive(Debug)]
pub struct PoolBucket {
    pub size_class: usize,
    pub entries: VecDeque<Bitmap>,
}

#[derive(Debug, Default)]
struct PoolState {
    /// Buckets in recency order, most recently used first
    buckets: VecDeque<PoolBucket>,
    /// size class -> number of pooled buffers
    sizes: BTreeMap<usize, usize>,
    current_size: usize,
    stats: PoolStats,
}

impl PoolState {
    fn bucket_position(&self, size_class: usize) -> Option<usize> {
        self.buckets.iter().position(|b| b.size_class == size_class)
    }

    /// Move the bucket for `size_class` to the front, creating it if needed
    fn promote_bucket(&mut self, size_class: usize) -> &mut PoolBucket {
        let bucket = match self.bucket_position(size_class) {
            Some(idx) => self.buckets.remove(idx).unwrap_or(PoolBucket {
                size_class,
                entries: VecDeque::new(),
            }),
            None => PoolBucket {
                size_class,
                entries: VecDeque::new(),
            },
        };
        self.buckets.push_front(bucket);
        &mut self.buckets[0]
    }

    fn decrement(&mut self, size_class: usize) {
        if let Some(count) = self.sizes.get_mut(&size_class) {
            *count -= 1;
            if *count == 0 {
                self.sizes.remove(&size_class);
            }
        }
    }

    fn take(&mut self, size_class: usize) -> Option<Bitmap> {
        let bitmap = self.promote_bucket(size_class).entries.pop_front()?;
        if self.buckets[0].entries.is_empty() {
            self.buckets.pop_front();
        }
        self.decrement(size_class);
        self.current_size -= size_class;
        Some(bitmap)
    }

    fn evict_oldest(&mut self) -> Option<Bitmap> {
        let bucket = self.buckets.back_mut()?;
        let size_class = bucket.size_class;
        let bitmap = bucket.entries.pop_back();
        if bucket.entries.is_empty() {
            self.buckets.pop_back();
        }
        let bitmap = bitmap?;
        self.decrement(size_class);
        self.current_size -= size_class;
        Some(bitmap)
    }
}

/// A size-bounded pool of mutable bitmaps
///
/// `put` and `get` are mutually exclusive; a bitmap handed out is removed
/// from the pool's accounting before the lock is released.
#[derive(Debug)]
pub struct BitmapPool {
    max_size: usize,
    state: Mutex<PoolState>,
}

impl BitmapPool {
    /// Create a pool holding at most `max_size` bytes of buffers
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Bytes currently held by the pool
    pub fn size(&self) -> usize {
        self.state.lock().current_size
    }

    /// Number of pooled buffers
    pub fn len(&self) -> usize {
        self.state.lock().sizes.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats.clone()
    }

    /// Return a bitmap to the pool
    ///
    /// Hardware, immutable and oversized bitmaps are dropped instead.
    /// Returns whether the bitmap was pooled.
    pub fn put(&self, bitmap: Bitmap) -> bool {
        let size_class = bitmap.allocation_byte_count();
        let mut state = self.state.lock();

        if bitmap.is_hardware() || !bitmap.is_mutable() || size_class == 0 || size_class > self.max_size {
            trace!(
                "Rejected bitmap from pool: {:?} (max pool size {})",
                bitmap,
                self.max_size
            );
            state.stats.rejected += 1;
            return false;
        }

        state.promote_bucket(size_class).entries.push_front(bitmap);
        *state.sizes.entry(size_class).or_insert(0) += 1;
        state.current_size += size_class;
        state.stats.puts += 1;

        Self::trim_locked(&mut state, self.max_size);
        true
    }

    /// A pooled bitmap with unspecified pixel contents, if one fits
    pub fn get_dirty_or_none(&self, width: u32, height: u32, config: PixelConfig) -> Option<Bitmap> {
        if config.is_hardware() {
            return None;
        }
        let size = allocation_size(width, height, config);
        let mut state = self.state.lock();

        let best = state
            .sizes
            .range(size..)
            .next()
            .map(|(size_class, _)| *size_class)
            .filter(|size_class| *size_class <= size.saturating_mul(MAX_SIZE_MULTIPLE));

        let Some(size_class) = best else {
            state.stats.misses += 1;
            return None;
        };

        let mut bitmap = state.take(size_class)?;
        state.stats.hits += 1;
        drop(state);

        if !bitmap.reconfigure(width, height, config) {
            debug!("Pooled bitmap could not be reconfigured, dropping it");
            return None;
        }
        Some(bitmap)
    }

    /// A pooled, zeroed bitmap, if one fits
    pub fn get_or_none(&self, width: u32, height: u32, config: PixelConfig) -> Option<Bitmap> {
        let mut bitmap = self.get_dirty_or_none(width, height, config)?;
        bitmap.erase();
        Some(bitmap)
    }

    /// A zeroed bitmap, from the pool when possible
    pub fn get(&self, width: u32, height: u32, config: PixelConfig) -> Bitmap {
        self.get_or_none(width, height, config)
            .unwrap_or_else(|| Bitmap::new(width, height, config))
    }

    /// A bitmap with unspecified contents, from the pool when possible
    pub fn get_dirty(&self, width: u32, height: u32, config: PixelConfig) -> Bitmap {
        self.get_dirty_or_none(width, height, config)
            .unwrap_or_else(|| Bitmap::new(width, height, config))
    }

    /// Evict least recently used buffers until at most `size` bytes remain
    pub fn trim_to_size(&self, size: usize) {
        let mut state = self.state.lock();
        Self::trim_locked(&mut state, size);
    }

    pub fn clear(&self) {
        self.trim_to_size(0);
    }

    fn trim_locked(state: &mut PoolState, size: usize) {
        while state.current_size > size {
            match state.evict_oldest() {
                Some(evicted) => {
                    trace!("Evicted pooled bitmap: {:?}", evicted);
                    state.stats.evictions += 1;
                }
                None => {
                    state.current_size = 0;
                    break;
                }
            }
        }
    }
}
