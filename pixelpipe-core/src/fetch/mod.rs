//! Built-in mappers, keyers and fetchers for local data

pub mod network;

use crate::component::{FetchResult, Fetcher, FetcherFactory, ImageSource, Keyer, Mapper};
use crate::error::{PipelineError, Result};
use crate::request::{Options, RequestData};
use crate::result::DataSource;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

pub use network::{
    NetworkClient, NetworkFetcher, NetworkFetcherFactory, NetworkRequest, NetworkResponse,
};

/// Guess a mime type from a file extension
pub fn mime_type_from_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "heic" | "heif" => "image/heif",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        _ => return None,
    };
    Some(mime)
}

/// Maps `file://` URLs to paths
#[derive(Debug, Clone, Copy, Default)]
pub struct FileUrlMapper;

impl Mapper for FileUrlMapper {
    fn map(&self, data: &RequestData, _options: &Options) -> Option<RequestData> {
        match data {
            RequestData::Url(url) => url
                .strip_prefix("file://")
                .map(|path| RequestData::Path(PathBuf::from(path))),
            _ => None,
        }
    }
}

/// Keys URLs by the URL itself
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlKeyer;

#[async_trait]
impl Keyer for UrlKeyer {
    async fn key(&self, data: &RequestData, _options: &Options) -> Option<String> {
        match data {
            RequestData::Url(url) => Some(url.clone()),
            _ => None,
        }
    }
}

/// Keys paths by path, optionally with the modification time so an
/// overwritten file does not hit the old decoded image
#[derive(Debug, Clone, Copy)]
pub struct PathKeyer {
    pub add_last_modified: bool,
}

impl Default for PathKeyer {
    fn default() -> Self {
        Self {
            add_last_modified: true,
        }
    }
}

#[async_trait]
impl Keyer for PathKeyer {
    async fn key(&self, data: &RequestData, _options: &Options) -> Option<String> {
        let RequestData::Path(path) = data else {
            return None;
        };
        if !self.add_last_modified {
            return Some(path.display().to_string());
        }
        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Some(format!("{}:{}", path.display(), modified))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcherFactory;

impl FetcherFactory for FileFetcherFactory {
    fn create(&self, data: &RequestData, _options: &Options) -> Option<Box<dyn Fetcher>> {
        match data {
            RequestData::Path(path) => Some(Box::new(FileFetcher { path: path.clone() })),
            _ => None,
        }
    }
}

pub struct FileFetcher {
    path: PathBuf,
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self) -> Result<FetchResult> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| PipelineError::Fetch {
                data: self.path.display().to_string(),
                message: e.to_string(),
            })?;
        if !metadata.is_file() {
            return Err(PipelineError::Fetch {
                data: self.path.display().to_string(),
                message: "not a regular file".to_string(),
            });
        }

        Ok(FetchResult::Source {
            source: ImageSource::File(self.path.clone()),
            mime_type: mime_type_from_path(&self.path).map(str::to_string),
            data_source: DataSource::Disk,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesFetcherFactory;

impl FetcherFactory for BytesFetcherFactory {
    fn create(&self, data: &RequestData, _options: &Options) -> Option<Box<dyn Fetcher>> {
        match data {
            RequestData::Bytes(bytes) => Some(Box::new(BytesFetcher {
                bytes: Arc::clone(bytes),
            })),
            _ => None,
        }
    }
}

pub struct BytesFetcher {
    bytes: Arc<[u8]>,
}

#[async_trait]
impl Fetcher for BytesFetcher {
    async fn fetch(&self) -> Result<FetchResult> {
        Ok(FetchResult::Source {
            source: ImageSource::Bytes(Arc::clone(&self.bytes)),
            mime_type: None,
            data_source: DataSource::Memory,
        })
    }
}

/// Passes an already decoded bitmap through the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct BitmapFetcherFactory;

impl FetcherFactory for BitmapFetcherFactory {
    fn create(&self, data: &RequestData, _options: &Options) -> Option<Box<dyn Fetcher>> {
        match data {
            RequestData::Bitmap(bitmap) => Some(Box::new(BitmapFetcher {
                bitmap: Arc::clone(bitmap),
            })),
            _ => None,
        }
    }
}

pub struct BitmapFetcher {
    bitmap: Arc<crate::bitmap::Bitmap>,
}

#[async_trait]
impl Fetcher for BitmapFetcher {
    async fn fetch(&self) -> Result<FetchResult> {
        // Transformations consume their input, so hand out a private copy
        Ok(FetchResult::Image {
            image: (*self.bitmap).clone(),
            is_sampled: false,
            data_source: DataSource::Memory,
        })
    }
}
