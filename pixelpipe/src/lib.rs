//! # pixelpipe
//!
//! Maintenance tooling for pixelpipe on-disk image caches: inspect totals
//! and entries, seed entries from local files, and trim or clear a cache
//! directory.

pub mod inspect;

pub use inspect::{CacheSummary, EntryDetails, EntrySummary};
