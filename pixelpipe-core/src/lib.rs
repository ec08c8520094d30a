//! # pixelpipe-core
//!
//! Request execution and caching core for image loading pipelines.
//!
//! ## Features
//!
//! - Structural cache keys derived from request data, transformations and size
//! - Size-bounded LRU memory cache with size/precision-aware validity checks
//! - Journaled on-disk cache with HTTP cache-control validation
//! - Bucketed bitmap pool for buffer reuse
//! - Deduplication of identical in-flight requests with leader re-election
//! - Interceptor chain around an engine of pluggable mappers, keyers,
//!   fetchers, decoders and transformations
//!
//! ## Loading an image
//!
//! ```no_run
//! use pixelpipe_core::{ImageLoader, ImageRequest, LoaderConfig, Size};
//!
//! #[tokio::main]
//! async fn main() -> pixelpipe_core::Result<()> {
//!     let loader = ImageLoader::builder()
//!         .config(LoaderConfig::builder().disk_cache_dir("/tmp/pixelpipe").build())
//!         .build()?;
//!
//!     let request = ImageRequest::builder("file:///tmp/photo.png")
//!         .size(Size::new(256, 256))
//!         .build();
//!     let result = loader.execute(request).await;
//!     println!("loaded: {}", result.is_success());
//!
//!     loader.shutdown().await
//! }
//! ```
//!
//! ## Disk cache layout
//!
//! Each entry is stored as two files named after the SHA-256 of its key:
//! `<hash>.0` holds response metadata and `<hash>.1` the encoded image. A
//! `journal` file records every edit so the index can be rebuilt on open.

pub mod bitmap;
pub mod clock;
pub mod component;
pub mod config;
pub mod coordination;
pub mod disk;
pub mod error;
pub mod event;
pub mod fetch;
pub mod headers;
pub mod intercept;
pub mod key;
pub mod loader;
pub mod memory;
pub mod pool;
pub mod request;
pub mod result;

// Re-export main types for convenience
pub use bitmap::{Bitmap, PixelConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use component::{
    ComponentRegistry, DecodeResult, Decoder, DecoderFactory, FetchResult, Fetcher,
    FetcherFactory, ImageSource, Keyer, Mapper, Transformation,
};
pub use config::{LoaderConfig, LoaderConfigBuilder};
pub use coordination::{CoordinationPolicy, RequestCoordinator};
pub use disk::{CacheStrategy, CachedResponseMetadata, DiskCache, Editor, Snapshot};
pub use error::{PipelineError, Result};
pub use event::{EventListener, NoopEventListener};
pub use fetch::{NetworkClient, NetworkRequest, NetworkResponse};
pub use headers::Headers;
pub use intercept::{Chain, Interceptor};
pub use key::{compute_key, CacheKey};
pub use loader::{Disposable, ImageLoader, ImageLoaderBuilder};
pub use memory::{MemoryCache, MemoryCacheEntry, MemoryCacheStats};
pub use pool::{BitmapPool, PoolStats};
pub use request::{
    CachePolicy, DefaultRequestOptions, Dimension, ImageRequest, ImageRequestBuilder, Options,
    Precision, RequestData, RequestScope, Scale, Size, SizeResolver, Target,
};
pub use result::{DataSource, ErrorResult, ImageResult, SuccessResult};
