//! HTTP fetching through the disk cache
//!
//! The transport itself is a [`NetworkClient`] supplied by the embedding
//! application. [`NetworkFetcher`] wraps it with the disk cache: cached
//! entries are validated with [`CacheStrategy`], fresh ones are served without
//! touching the network, stale ones are revalidated or replaced, and every
//! cacheable response is written back before decoding reads it.

use crate::clock::{Clock, SystemClock};
use crate::component::{FetchResult, Fetcher, FetcherFactory, ImageSource};
use crate::disk::{combine_headers, CacheStrategy, CachedResponseMetadata, DiskCache, Snapshot};
use crate::error::{PipelineError, Result};
use crate::headers::Headers;
use crate::request::{Options, RequestData};
use crate::result::DataSource;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

const HTTP_NOT_MODIFIED: u16 = 304;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub url: String,
    pub method: String,
    pub headers: Headers,
}

impl NetworkRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub code: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl NetworkResponse {
    pub fn new(code: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            code,
            headers,
            body,
        }
    }

    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// `Content-Type` without parameters
    pub fn mime_type(&self) -> Option<String> {
        self.headers
            .get("Content-Type")
            .and_then(|value| value.split(';').next())
            .map(|mime| mime.trim().to_string())
            .filter(|mime| !mime.is_empty())
    }
}

/// HTTP transport
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn execute(&self, request: NetworkRequest) -> Result<NetworkResponse>;
}

/// Creates [`NetworkFetcher`]s for `http://` and `https://` URLs
pub struct NetworkFetcherFactory {
    client: Arc<dyn NetworkClient>,
    disk_cache: Option<DiskCache>,
    clock: Arc<dyn Clock>,
    respect_cache_headers: bool,
}

impl NetworkFetcherFactory {
    pub fn new(client: Arc<dyn NetworkClient>, disk_cache: Option<DiskCache>) -> Self {
        Self {
            client,
            disk_cache,
            clock: Arc::new(SystemClock),
            respect_cache_headers: true,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// When `false`, any cached entry is served regardless of its headers
    pub fn respect_cache_headers(mut self, respect: bool) -> Self {
        self.respect_cache_headers = respect;
        self
    }
}

impl FetcherFactory for NetworkFetcherFactory {
    fn create(&self, data: &RequestData, options: &Options) -> Option<Box<dyn Fetcher>> {
        let RequestData::Url(url) = data else {
            return None;
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return None;
        }
        Some(Box::new(NetworkFetcher {
            url: url.clone(),
            options: options.clone(),
            client: Arc::clone(&self.client),
            disk_cache: self.disk_cache.clone(),
            clock: Arc::clone(&self.clock),
            respect_cache_headers: self.respect_cache_headers,
        }))
    }
}

pub struct NetworkFetcher {
    url: String,
    options: Options,
    client: Arc<dyn NetworkClient>,
    disk_cache: Option<DiskCache>,
    clock: Arc<dyn Clock>,
    respect_cache_headers: bool,
}

impl NetworkFetcher {
    fn disk_cache_key(&self) -> String {
        self.options
            .disk_cache_key
            .clone()
            .unwrap_or_else(|| self.url.clone())
    }

    async fn open_snapshot(&self, key: &str) -> Option<Snapshot> {
        let cache = self.disk_cache.clone()?;
        let key = key.to_string();
        match blocking(move || cache.open_snapshot(&key)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Disk cache read failed for {}: {}", self.url, e);
                None
            }
        }
    }

    /// Open the cached entry with its parsed metadata (`None` when empty)
    async fn read_cached(
        &self,
        key: &str,
    ) -> Option<(Snapshot, Option<CachedResponseMetadata>)> {
        if !self.options.disk_cache_policy.read_enabled() {
            return None;
        }
        let snapshot = self.open_snapshot(key).await?;

        let read = blocking(move || {
            let bytes = snapshot.read_metadata();
            Ok((snapshot, bytes))
        })
        .await;

        match read {
            Ok((snapshot, Ok(bytes))) if bytes.is_empty() => Some((snapshot, None)),
            Ok((snapshot, Ok(bytes))) => match CachedResponseMetadata::from_bytes(&bytes) {
                Ok(metadata) => Some((snapshot, Some(metadata))),
                Err(e) => {
                    warn!("Ignoring unreadable cached metadata for {}: {}", self.url, e);
                    None
                }
            },
            Ok((_, Err(e))) | Err(e) => {
                warn!("Disk cache read failed for {}: {}", self.url, e);
                None
            }
        }
    }

    fn from_disk(snapshot: Snapshot, mime_type: Option<&str>) -> FetchResult {
        FetchResult::Source {
            source: ImageSource::DiskCache(snapshot),
            mime_type: mime_type.map(str::to_string),
            data_source: DataSource::Disk,
        }
    }
}

#[async_trait]
impl Fetcher for NetworkFetcher {
    async fn fetch(&self) -> Result<FetchResult> {
        let key = self.disk_cache_key();
        let request = NetworkRequest::get(&self.url).with_headers(self.options.headers.clone());

        let cached = self.read_cached(&key).await;
        let (snapshot, cached_metadata) = match cached {
            // Imported without metadata, or headers are not consulted
            Some((snapshot, None)) => {
                debug!("Serving {} from disk cache (no metadata)", self.url);
                return Ok(Self::from_disk(snapshot, None));
            }
            Some((snapshot, Some(metadata))) if !self.respect_cache_headers => {
                debug!("Serving {} from disk cache", self.url);
                return Ok(Self::from_disk(snapshot, metadata.mime_type()));
            }
            Some((snapshot, Some(metadata))) => (Some(snapshot), Some(metadata)),
            None => (None, None),
        };

        if !self.options.network_cache_policy.read_enabled() {
            return match snapshot {
                Some(snapshot) => {
                    debug!("Network disabled, serving possibly stale {} from disk", self.url);
                    let mime_type = cached_metadata.as_ref().and_then(|m| m.mime_type());
                    Ok(Self::from_disk(snapshot, mime_type))
                }
                None => Err(PipelineError::NetworkDisabled(self.url.clone())),
            };
        }

        let strategy =
            CacheStrategy::compute(&request, cached_metadata.as_ref(), self.clock.now_millis());

        let (network_request, snapshot) = match (strategy.network_request, snapshot) {
            (None, Some(snapshot)) => {
                debug!("Disk cache hit for {}", self.url);
                let mime_type = cached_metadata.as_ref().and_then(|m| m.mime_type());
                return Ok(Self::from_disk(snapshot, mime_type));
            }
            (Some(network_request), snapshot) => {
                // Keep the snapshot only if a 304 could still use its body
                let snapshot = snapshot.filter(|_| strategy.cache_response.is_some());
                (network_request, snapshot)
            }
            (None, None) => {
                return Err(PipelineError::Other(format!(
                    "no cached response to serve for {}",
                    self.url
                )))
            }
        };

        debug!(
            "Fetching {} ({})",
            self.url,
            if snapshot.is_some() { "conditional" } else { "full" }
        );
        let sent_at = self.clock.now_millis();
        let response = self.client.execute(network_request).await?;
        let received_at = self.clock.now_millis();

        let not_modified = response.code == HTTP_NOT_MODIFIED && snapshot.is_some();
        if !response.is_successful() && !not_modified {
            return Err(PipelineError::HttpStatus {
                code: response.code,
                url: self.url.clone(),
            });
        }

        let mime_type = response
            .mime_type()
            .or_else(|| cached_metadata.as_ref().and_then(|m| m.mime_type().map(str::to_string)));

        let Some(cache) = self.disk_cache.clone() else {
            return Ok(FetchResult::Source {
                source: ImageSource::Bytes(Arc::from(response.body)),
                mime_type,
                data_source: DataSource::Network,
            });
        };

        let write = DiskWrite {
            cache,
            key: key.clone(),
            request,
            cached: strategy.cache_response,
            sent_at,
            received_at,
            write_enabled: self.options.disk_cache_policy.write_enabled(),
            respect_cache_headers: self.respect_cache_headers,
        };
        let (written, response) = blocking(move || {
            let written = write.apply(snapshot, &response);
            Ok((written, response))
        })
        .await?;

        let written = written.unwrap_or_else(|e| {
            warn!("Failed to write {} to disk cache: {}", self.url, e);
            None
        });

        match written {
            Some(snapshot) => Ok(FetchResult::Source {
                source: ImageSource::DiskCache(snapshot),
                mime_type,
                data_source: DataSource::Network,
            }),
            None if response.code == HTTP_NOT_MODIFIED => match self.open_snapshot(&key).await {
                Some(snapshot) => Ok(FetchResult::Source {
                    source: ImageSource::DiskCache(snapshot),
                    mime_type,
                    data_source: DataSource::Network,
                }),
                None => Err(PipelineError::Fetch {
                    data: self.url.clone(),
                    message: "cached body disappeared after 304".to_string(),
                }),
            },
            None => Ok(FetchResult::Source {
                source: ImageSource::Bytes(Arc::from(response.body)),
                mime_type,
                data_source: DataSource::Network,
            }),
        }
    }
}

/// Everything needed to store one network response
struct DiskWrite {
    cache: DiskCache,
    key: String,
    request: NetworkRequest,
    cached: Option<CachedResponseMetadata>,
    sent_at: i64,
    received_at: i64,
    write_enabled: bool,
    respect_cache_headers: bool,
}

impl DiskWrite {
    /// Store `response`, returning a snapshot of the stored entry
    ///
    /// A 304 only rewrites the metadata so the cached body is kept. A
    /// response that forbids storage also evicts any older entry.
    fn apply(self, snapshot: Option<Snapshot>, response: &NetworkResponse) -> Result<Option<Snapshot>> {
        if !self.write_enabled {
            return Ok(None);
        }

        let not_modified = response.code == HTTP_NOT_MODIFIED;
        if self.respect_cache_headers {
            let storable = if not_modified {
                CacheStrategy::allows_storage(&self.request, &response.headers)
            } else {
                CacheStrategy::is_cacheable(&self.request, response)
            };
            if !storable {
                drop(snapshot);
                if self.cache.remove(&self.key)? {
                    debug!("Evicted uncacheable disk cache entry for {}", self.key);
                }
                return Ok(None);
            }
        }

        let editor = match snapshot {
            Some(snapshot) => snapshot.close_and_edit()?,
            None => self.cache.open_editor(&self.key)?,
        };
        let Some(mut editor) = editor else {
            debug!("Disk cache entry for {} is busy, not writing", self.key);
            return Ok(None);
        };

        let written = match (&self.cached, not_modified) {
            (Some(cached), true) => {
                let headers = combine_headers(&cached.headers, &response.headers);
                let metadata = CachedResponseMetadata::new(self.sent_at, self.received_at, headers);
                editor.write_metadata(&metadata.to_bytes())
            }
            _ => {
                let metadata = CachedResponseMetadata::new(
                    self.sent_at,
                    self.received_at,
                    response.headers.clone(),
                );
                editor
                    .write_metadata(&metadata.to_bytes())
                    .and_then(|_| editor.write_data(&response.body))
            }
        };

        match written {
            Ok(()) => editor.commit_and_get(),
            Err(e) => {
                if let Err(abort_error) = editor.abort() {
                    warn!("Failed to abort disk cache edit: {}", abort_error);
                }
                Err(e)
            }
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
