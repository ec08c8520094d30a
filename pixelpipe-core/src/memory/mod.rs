//! In-process cache of decoded images

pub mod store;
pub mod validity;

pub use store::{MemoryCache, MemoryCacheEntry, MemoryCacheStats, EXTRA_DISK_CACHE_KEY};
pub use validity::{is_cache_entry_valid, size_multiplier};
