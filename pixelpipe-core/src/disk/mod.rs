//! On-disk cache of fetched bytes and their HTTP response metadata

pub(crate) mod journal;
pub mod metadata;
pub mod store;
pub mod strategy;

pub use metadata::CachedResponseMetadata;
pub use store::{hash_key, DiskCache, DiskEntryInfo, Editor, Snapshot};
pub use strategy::{combine_headers, CacheControl, CacheStrategy};
