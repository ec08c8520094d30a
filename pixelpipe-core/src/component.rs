//! Pluggable pipeline components
//!
//! Every capability (mapping request data, deriving a base cache key,
//! fetching, decoding) is an ordered list of trait objects. The engine asks
//! each in registration order and uses the first that accepts the input.

use crate::bitmap::Bitmap;
use crate::disk::Snapshot;
use crate::error::{PipelineError, Result};
use crate::pool::BitmapPool;
use crate::request::{Options, RequestData, Size};
use crate::result::DataSource;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Raw encoded image bytes, wherever they live
pub enum ImageSource {
    Bytes(Arc<[u8]>),
    File(PathBuf),
    /// Data file of an open disk cache snapshot; the snapshot stays open
    /// until the source is consumed
    DiskCache(Snapshot),
}

impl ImageSource {
    /// Path of the backing file, if the source is file-backed
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            ImageSource::Bytes(_) => None,
            ImageSource::File(path) => Some(path),
            ImageSource::DiskCache(snapshot) => Some(snapshot.data_path()),
        }
    }

    /// Read the whole source into memory
    pub async fn read_bytes(self) -> Result<Vec<u8>> {
        match self {
            ImageSource::Bytes(bytes) => Ok(bytes.to_vec()),
            ImageSource::File(path) => Ok(tokio::fs::read(&path).await?),
            ImageSource::DiskCache(snapshot) => {
                tokio::task::spawn_blocking(move || snapshot.read_data()).await?
            }
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Bytes(bytes) => write!(f, "ImageSource::Bytes({} bytes)", bytes.len()),
            ImageSource::File(path) => write!(f, "ImageSource::File({})", path.display()),
            ImageSource::DiskCache(snapshot) => {
                write!(f, "ImageSource::DiskCache({})", snapshot.key())
            }
        }
    }
}

/// What a fetcher produced
#[derive(Debug)]
pub enum FetchResult {
    /// Encoded bytes that still need decoding
    Source {
        source: ImageSource,
        mime_type: Option<String>,
        data_source: DataSource,
    },
    /// An already decoded image
    Image {
        image: Bitmap,
        is_sampled: bool,
        data_source: DataSource,
    },
}

/// What a decoder produced
#[derive(Debug)]
pub struct DecodeResult {
    pub image: Bitmap,
    /// Whether the image was decoded below the source's full resolution
    pub is_sampled: bool,
}

/// Rewrites request data before keying and fetching
pub trait Mapper: Send + Sync {
    /// Return the mapped data, or `None` to leave it unchanged
    fn map(&self, data: &RequestData, options: &Options) -> Option<RequestData>;
}

/// Derives the base identity used for memory caching
#[async_trait]
pub trait Keyer: Send + Sync {
    async fn key(&self, data: &RequestData, options: &Options) -> Option<String>;
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<FetchResult>;
}

pub trait FetcherFactory: Send + Sync {
    /// A fetcher for `data`, or `None` if this factory does not handle it
    fn create(&self, data: &RequestData, options: &Options) -> Option<Box<dyn Fetcher>>;
}

#[async_trait]
pub trait Decoder: Send + Sync {
    async fn decode(&self, source: ImageSource, options: &Options) -> Result<DecodeResult>;
}

pub trait DecoderFactory: Send + Sync {
    /// A decoder for this source, or `None` if the format is not handled
    fn create(
        &self,
        source: &ImageSource,
        mime_type: Option<&str>,
        options: &Options,
    ) -> Option<Box<dyn Decoder>>;
}

/// A bitmap-to-bitmap transformation
///
/// The input is moved in; a transformation may reuse its buffer in place or
/// draw a new one from `pool` (and may return the input to the pool).
pub trait Transformation: Send + Sync {
    /// Stable identity of this transformation and its parameters
    fn cache_key(&self) -> String;

    fn transform(&self, input: Bitmap, size: Size, pool: &BitmapPool) -> Result<Bitmap>;
}

/// Ordered component lists consulted by the engine
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    mappers: Vec<Arc<dyn Mapper>>,
    keyers: Vec<Arc<dyn Keyer>>,
    fetchers: Vec<Arc<dyn FetcherFactory>>,
    decoders: Vec<Arc<dyn DecoderFactory>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in mappers, keyers and fetchers
    pub fn with_defaults() -> Self {
        use crate::fetch::{
            BitmapFetcherFactory, BytesFetcherFactory, FileFetcherFactory, FileUrlMapper,
            PathKeyer, UrlKeyer,
        };

        Self::new()
            .add_mapper(Arc::new(FileUrlMapper))
            .add_keyer(Arc::new(UrlKeyer))
            .add_keyer(Arc::new(PathKeyer::default()))
            .add_fetcher(Arc::new(BitmapFetcherFactory))
            .add_fetcher(Arc::new(BytesFetcherFactory))
            .add_fetcher(Arc::new(FileFetcherFactory))
    }

    pub fn add_mapper(mut self, mapper: Arc<dyn Mapper>) -> Self {
        self.mappers.push(mapper);
        self
    }

    pub fn add_keyer(mut self, keyer: Arc<dyn Keyer>) -> Self {
        self.keyers.push(keyer);
        self
    }

    pub fn add_fetcher(mut self, factory: Arc<dyn FetcherFactory>) -> Self {
        self.fetchers.push(factory);
        self
    }

    pub fn add_decoder(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoders.push(factory);
        self
    }

    /// Append `other`'s components after this registry's own
    pub fn extend(mut self, other: ComponentRegistry) -> Self {
        self.mappers.extend(other.mappers);
        self.keyers.extend(other.keyers);
        self.fetchers.extend(other.fetchers);
        self.decoders.extend(other.decoders);
        self
    }

    /// Apply every mapper in order
    pub fn map(&self, data: &RequestData, options: &Options) -> RequestData {
        let mut mapped = data.clone();
        for mapper in &self.mappers {
            if let Some(next) = mapper.map(&mapped, options) {
                mapped = next;
            }
        }
        mapped
    }

    /// Base key from the first keyer that recognizes the data
    pub async fn key(&self, data: &RequestData, options: &Options) -> Option<String> {
        for keyer in &self.keyers {
            if let Some(key) = keyer.key(data, options).await {
                return Some(key);
            }
        }
        None
    }

    pub fn new_fetcher(&self, data: &RequestData, options: &Options) -> Result<Box<dyn Fetcher>> {
        self.fetchers
            .iter()
            .find_map(|factory| factory.create(data, options))
            .ok_or_else(|| PipelineError::NoFetcher(data.to_string()))
    }

    pub fn new_decoder(
        &self,
        source: &ImageSource,
        mime_type: Option<&str>,
        options: &Options,
    ) -> Result<Box<dyn Decoder>> {
        self.decoders
            .iter()
            .find_map(|factory| factory.create(source, mime_type, options))
            .ok_or_else(|| PipelineError::NoDecoder {
                mime_type: mime_type.unwrap_or("unknown").to_string(),
            })
    }
}
