//! The terminal interceptor: cache lookup, fetch, decode, transform

use super::{Chain, Interceptor};
use crate::bitmap::Bitmap;
use crate::component::{ComponentRegistry, FetchResult};
use crate::coordination::RequestCoordinator;
use crate::error::{PipelineError, Result};
use crate::event::EventListener;
use crate::key::{compute_key, CacheKey};
use crate::memory::{is_cache_entry_valid, MemoryCache, EXTRA_DISK_CACHE_KEY};
use crate::pool::BitmapPool;
use crate::request::{ImageRequest, Options, RequestData};
use crate::result::{DataSource, ImageResult, SuccessResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Outcome of one execution, shared with deduplicated callers
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub image: Arc<Bitmap>,
    pub is_sampled: bool,
    pub data_source: DataSource,
    pub disk_cache_key: Option<String>,
    /// Whether the memory cache accepted the image
    pub memory_cached: bool,
}

pub struct EngineInterceptor {
    components: ComponentRegistry,
    memory_cache: Option<Arc<MemoryCache>>,
    pool: Arc<BitmapPool>,
    coordinator: Arc<RequestCoordinator<ExecuteResult>>,
}

impl EngineInterceptor {
    pub fn new(
        components: ComponentRegistry,
        memory_cache: Option<Arc<MemoryCache>>,
        pool: Arc<BitmapPool>,
        coordinator: Arc<RequestCoordinator<ExecuteResult>>,
    ) -> Self {
        Self {
            components,
            memory_cache,
            pool,
            coordinator,
        }
    }

    async fn memory_cache_key(
        &self,
        request: &ImageRequest,
        data: &RequestData,
        options: &Options,
    ) -> Option<CacheKey> {
        if let Some(base) = &request.memory_cache_key {
            let key = request
                .memory_cache_key_extras
                .iter()
                .fold(CacheKey::new(base.clone()), |key, (name, value)| {
                    key.with_extra(name.clone(), value.clone())
                });
            return Some(key);
        }

        let base = self.components.key(data, options).await;
        compute_key(
            base.as_deref(),
            &request.transformations,
            options.size,
            &request.memory_cache_key_extras,
        )
    }

    fn cached(&self, key: &CacheKey, request: &ImageRequest, options: &Options) -> Option<SuccessResult> {
        if !options.memory_cache_policy.read_enabled() {
            return None;
        }
        let entry = self.memory_cache.as_ref()?.get(key)?;
        if !is_cache_entry_valid(
            key,
            &entry,
            options.size,
            options.scale,
            options.precision,
            options.allow_hardware,
        ) {
            debug!("Memory cache entry {} does not satisfy size {}", key, options.size);
            return None;
        }

        Some(SuccessResult {
            disk_cache_key: entry.disk_cache_key().map(str::to_string),
            image: entry.image,
            request: request.clone(),
            data_source: DataSource::MemoryCache,
            memory_cache_key: Some(key.clone()),
            is_sampled: entry.is_sampled,
        })
    }

    async fn execute(
        &self,
        request: &ImageRequest,
        data: RequestData,
        options: &Options,
        key: Option<&CacheKey>,
        events: &dyn EventListener,
    ) -> Result<ExecuteResult> {
        let disk_cache_key = match &data {
            RequestData::Url(url) => Some(options.disk_cache_key.clone().unwrap_or_else(|| url.clone())),
            _ => options.disk_cache_key.clone(),
        };

        events.fetch_start(request);
        let fetcher = self.components.new_fetcher(&data, options)?;
        let (mut image, is_sampled, data_source) = match fetcher.fetch().await? {
            FetchResult::Image {
                image,
                is_sampled,
                data_source,
            } => {
                events.fetch_end(request, data_source);
                (image, is_sampled, data_source)
            }
            FetchResult::Source {
                source,
                mime_type,
                data_source,
            } => {
                events.fetch_end(request, data_source);
                events.decode_start(request);
                let decoder = self
                    .components
                    .new_decoder(&source, mime_type.as_deref(), options)?;
                let decoded = decoder.decode(source, options).await?;
                events.decode_end(request, decoded.is_sampled);
                (decoded.image, decoded.is_sampled, data_source)
            }
        };

        for transformation in &request.transformations {
            let name = transformation.cache_key();
            events.transform_start(request, &name);
            let transformation = Arc::clone(transformation);
            let pool = Arc::clone(&options.pool);
            let size = options.size;
            image = tokio::task::spawn_blocking(move || transformation.transform(image, size, &pool))
                .await?
                .map_err(|e| match e {
                    PipelineError::Transform { .. } => e,
                    other => PipelineError::Transform {
                        name: name.clone(),
                        message: other.to_string(),
                    },
                })?;
            events.transform_end(request, &name);
        }

        let image = Arc::new(image);
        let memory_cached = match (&self.memory_cache, key) {
            (Some(cache), Some(key)) if options.memory_cache_policy.write_enabled() => {
                let mut extras = HashMap::new();
                if let Some(disk_key) = &disk_cache_key {
                    extras.insert(
                        EXTRA_DISK_CACHE_KEY.to_string(),
                        serde_json::Value::String(disk_key.clone()),
                    );
                }
                cache.set(key.clone(), Arc::clone(&image), is_sampled, extras)
            }
            _ => false,
        };

        Ok(ExecuteResult {
            image,
            is_sampled,
            data_source,
            disk_cache_key,
            memory_cached,
        })
    }
}

#[async_trait]
impl Interceptor for EngineInterceptor {
    async fn intercept(&self, chain: Chain) -> Result<ImageResult> {
        let request = chain.request().clone();
        let events = Arc::clone(chain.events());
        let options = Options::resolve(&request, chain.size(), chain.scale(), Arc::clone(&self.pool));

        let data = self.components.map(&request.data, &options);
        events.map_end(&request, &data);

        let key = self.memory_cache_key(&request, &data, &options).await;
        events.key_end(&request, key.as_ref());

        if let Some(key) = &key {
            if let Some(hit) = self.cached(key, &request, &options) {
                debug!("Memory cache hit: {}", key);
                events.memory_cache_hit(&request, key);
                return Ok(ImageResult::Success(hit));
            }
        }

        // Only requests that would produce the same image share work
        let coordination_key = key.as_ref().map(|key| {
            format!(
                "{}|{}|{:?}|{:?}|{}",
                key, options.size, options.scale, options.precision, options.config
            )
        });

        let executed = self
            .coordinator
            .run(coordination_key.as_deref(), || {
                self.execute(&request, data, &options, key.as_ref(), events.as_ref())
            })
            .await?;

        Ok(ImageResult::Success(SuccessResult {
            image: executed.image,
            memory_cache_key: if executed.memory_cached { key } else { None },
            disk_cache_key: executed.disk_cache_key,
            data_source: executed.data_source,
            is_sampled: executed.is_sampled,
            request,
        }))
    }
}
