//! The image loader: wires caches, components and interceptors together

use crate::clock::{Clock, SystemClock};
use crate::component::{ComponentRegistry, DecoderFactory, FetcherFactory, Keyer, Mapper};
use crate::config::LoaderConfig;
use crate::coordination::RequestCoordinator;
use crate::disk::DiskCache;
use crate::error::{PipelineError, Result};
use crate::event::{EventListener, NoopEventListener};
use crate::fetch::{NetworkClient, NetworkFetcherFactory};
use crate::intercept::{Chain, DefaultsInterceptor, EngineInterceptor, Interceptor};
use crate::memory::MemoryCache;
use crate::pool::BitmapPool;
use crate::request::ImageRequest;
use crate::result::{ErrorResult, ImageResult};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

struct LoaderInner {
    config: LoaderConfig,
    memory_cache: Option<Arc<MemoryCache>>,
    disk_cache: Option<DiskCache>,
    pool: Arc<BitmapPool>,
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    events: Arc<dyn EventListener>,
}

/// Executes [`ImageRequest`]s
///
/// Cheap to clone; clones share caches, pool and in-flight coordination.
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<LoaderInner>,
}

impl ImageLoader {
    pub fn builder() -> ImageLoaderBuilder {
        ImageLoaderBuilder::default()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn memory_cache(&self) -> Option<&Arc<MemoryCache>> {
        self.inner.memory_cache.as_ref()
    }

    pub fn disk_cache(&self) -> Option<&DiskCache> {
        self.inner.disk_cache.as_ref()
    }

    pub fn pool(&self) -> &Arc<BitmapPool> {
        &self.inner.pool
    }

    /// Run a request to completion
    ///
    /// Failures, including cancellation of the request's scope, are
    /// returned as [`ImageResult::Error`].
    pub async fn execute(&self, request: ImageRequest) -> ImageResult {
        let token = request
            .scope
            .as_ref()
            .map(|scope| scope.token().clone())
            .unwrap_or_else(CancellationToken::new);
        self.execute_with_token(request, token).await
    }

    /// Run a request on a background task
    pub fn enqueue(&self, request: ImageRequest) -> Disposable {
        let token = match &request.scope {
            Some(scope) => scope.token().child_token(),
            None => CancellationToken::new(),
        };

        let loader = self.clone();
        let task_request = request.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move { loader.execute_with_token(task_request, task_token).await });

        Disposable {
            handle,
            token,
            request,
        }
    }

    /// Flush the disk cache journal
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(disk_cache) = self.inner.disk_cache.clone() {
            tokio::task::spawn_blocking(move || disk_cache.flush()).await??;
        }
        info!("Image loader shut down");
        Ok(())
    }

    async fn execute_with_token(&self, request: ImageRequest, token: CancellationToken) -> ImageResult {
        let events = Arc::clone(&self.inner.events);
        events.on_start(&request);
        if let Some(target) = &request.target {
            target.on_start();
        }

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(PipelineError::Cancelled),
            result = self.run_chain(request.clone()) => result,
        };

        match outcome {
            Ok(ImageResult::Success(success)) => {
                debug!(
                    "Loaded {} from {} ({}x{})",
                    success.request.data,
                    success.data_source,
                    success.image.width(),
                    success.image.height()
                );
                events.on_success(&success.request, &success);
                if let Some(target) = &success.request.target {
                    target.on_success(&success);
                }
                ImageResult::Success(success)
            }
            Ok(ImageResult::Error(failure)) => self.fail(failure),
            Err(error) => self.fail(ErrorResult::new(request, error)),
        }
    }

    async fn run_chain(&self, request: ImageRequest) -> Result<ImageResult> {
        let size = request.size_resolver.size().await;
        self.inner.events.resolve_size_end(&request, size);
        let scale = request.scale.unwrap_or(self.inner.config.defaults.scale);

        let chain = Chain::new(
            request.clone(),
            Arc::clone(&self.inner.interceptors),
            size,
            scale,
            Arc::clone(&self.inner.events),
        );
        chain.proceed(request).await
    }

    fn fail(&self, failure: ErrorResult) -> ImageResult {
        if failure.error.is_cancelled() {
            debug!("Request for {} cancelled", failure.request.data);
            self.inner.events.on_cancel(&failure.request);
        } else {
            error!("Failed to load {}: {}", failure.request.data, failure.error);
            self.inner.events.on_error(&failure.request, &failure.error);
            if let Some(target) = &failure.request.target {
                target.on_error(&failure);
            }
        }
        ImageResult::Error(failure)
    }
}

impl fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageLoader")
            .field("config", &self.inner.config)
            .field("interceptors", &self.inner.interceptors.len())
            .finish()
    }
}

/// Handle to an enqueued request
pub struct Disposable {
    handle: JoinHandle<ImageResult>,
    token: CancellationToken,
    request: ImageRequest,
}

impl Disposable {
    /// Cancel the request; the result becomes a cancellation error
    pub fn dispose(&self) {
        self.token.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the request's result
    pub async fn join(self) -> ImageResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => ImageResult::Error(ErrorResult::new(self.request, e.into())),
        }
    }
}

/// Builder for [`ImageLoader`]
pub struct ImageLoaderBuilder {
    config: LoaderConfig,
    components: ComponentRegistry,
    default_components: bool,
    interceptors: Vec<Arc<dyn Interceptor>>,
    network_client: Option<Arc<dyn NetworkClient>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventListener>,
    memory_cache: Option<Arc<MemoryCache>>,
    disk_cache: Option<DiskCache>,
}

impl Default for ImageLoaderBuilder {
    fn default() -> Self {
        Self {
            config: LoaderConfig::default(),
            components: ComponentRegistry::new(),
            default_components: true,
            interceptors: Vec::new(),
            network_client: None,
            clock: Arc::new(SystemClock),
            events: Arc::new(NoopEventListener),
            memory_cache: None,
            disk_cache: None,
        }
    }
}

impl ImageLoaderBuilder {
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Components consulted before the built-in ones
    pub fn components(mut self, components: ComponentRegistry) -> Self {
        self.components = components;
        self
    }

    /// Whether the built-in mappers, keyers and fetchers are registered
    pub fn default_components(mut self, enabled: bool) -> Self {
        self.default_components = enabled;
        self
    }

    pub fn add_mapper(mut self, mapper: Arc<dyn Mapper>) -> Self {
        self.components = self.components.add_mapper(mapper);
        self
    }

    pub fn add_keyer(mut self, keyer: Arc<dyn Keyer>) -> Self {
        self.components = self.components.add_keyer(keyer);
        self
    }

    pub fn add_fetcher(mut self, factory: Arc<dyn FetcherFactory>) -> Self {
        self.components = self.components.add_fetcher(factory);
        self
    }

    pub fn add_decoder(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.components = self.components.add_decoder(factory);
        self
    }

    /// Run between the defaults and the engine, in insertion order
    pub fn add_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Enables `http(s)` loading through the disk cache
    pub fn network_client(mut self, client: Arc<dyn NetworkClient>) -> Self {
        self.network_client = Some(client);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.events = listener;
        self
    }

    /// Use an existing memory cache instead of creating one from the config
    pub fn memory_cache(mut self, cache: Arc<MemoryCache>) -> Self {
        self.memory_cache = Some(cache);
        self
    }

    /// Use an open disk cache instead of opening `disk_cache_dir`
    pub fn disk_cache(mut self, cache: DiskCache) -> Self {
        self.disk_cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<ImageLoader> {
        let config = self.config;
        config.validate()?;

        let pool = Arc::new(BitmapPool::new(config.bitmap_pool_max_bytes));

        let memory_cache = match self.memory_cache {
            Some(cache) => Some(cache),
            None if config.memory_cache_max_bytes > 0 => Some(Arc::new(MemoryCache::with_pool(
                config.memory_cache_max_bytes,
                Arc::clone(&pool),
            ))),
            None => None,
        };

        let disk_cache = match (self.disk_cache, &config.disk_cache_dir) {
            (Some(cache), _) => Some(cache),
            (None, Some(dir)) => Some(DiskCache::open(dir, config.disk_cache_max_bytes)?),
            (None, None) => None,
        };

        let mut components = self.components;
        if let Some(client) = self.network_client {
            components = components.add_fetcher(Arc::new(
                NetworkFetcherFactory::new(client, disk_cache.clone())
                    .with_clock(self.clock)
                    .respect_cache_headers(config.respect_cache_headers),
            ));
        }
        if self.default_components {
            components = components.extend(ComponentRegistry::with_defaults());
        }

        let coordinator = Arc::new(RequestCoordinator::new(config.coordination));

        let mut interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(DefaultsInterceptor::new(config.defaults.clone()))];
        interceptors.extend(self.interceptors);
        interceptors.push(Arc::new(EngineInterceptor::new(
            components,
            memory_cache.clone(),
            Arc::clone(&pool),
            coordinator,
        )));

        info!(
            "Image loader ready (memory cache: {} bytes, disk cache: {}, coordination: {:?})",
            config.memory_cache_max_bytes,
            disk_cache
                .as_ref()
                .map(|cache| cache.directory().display().to_string())
                .unwrap_or_else(|| "disabled".to_string()),
            config.coordination
        );

        Ok(ImageLoader {
            inner: Arc::new(LoaderInner {
                config,
                memory_cache,
                disk_cache,
                pool,
                interceptors: interceptors.into(),
                events: self.events,
            }),
        })
    }
}
