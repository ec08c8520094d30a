//! Image requests, sizing policy and resolved per-request options

use crate::bitmap::{Bitmap, PixelConfig};
use crate::component::Transformation;
use crate::headers::Headers;
use crate::pool::BitmapPool;
use crate::result::{ErrorResult, SuccessResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One axis of a requested size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Pixels(u32),
    /// No constraint on this axis
    Undefined,
}

impl Dimension {
    /// The pixel value, or `default` when undefined
    pub fn px_or(self, default: u32) -> u32 {
        match self {
            Dimension::Pixels(px) => px,
            Dimension::Undefined => default,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, Dimension::Undefined)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Pixels(px) => write!(f, "{}", px),
            Dimension::Undefined => f.write_str("auto"),
        }
    }
}

/// Target size of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: Dimension,
    pub height: Dimension,
}

impl Size {
    /// Sentinel for "decode at the source's full resolution"
    pub const ORIGINAL: Size = Size {
        width: Dimension::Undefined,
        height: Dimension::Undefined,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: Dimension::Pixels(width),
            height: Dimension::Pixels(height),
        }
    }

    pub fn is_original(&self) -> bool {
        *self == Size::ORIGINAL
    }
}

impl Default for Size {
    fn default() -> Self {
        Size::ORIGINAL
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_original() {
            f.write_str("original")
        } else {
            write!(f, "{}x{}", self.width, self.height)
        }
    }
}

/// How source dimensions are fitted into the requested size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    /// Aspect-fit: the whole image fits inside the bounds
    #[default]
    Fit,
    /// Aspect-fill: the image covers the bounds
    Fill,
}

/// Whether the output must match the requested size exactly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Exact,
    /// Any output at least as large as needed is acceptable
    Inexact,
}

/// Read/write permissions for one cache layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    #[default]
    Enabled,
    ReadOnly,
    WriteOnly,
    Disabled,
}

impl CachePolicy {
    pub fn read_enabled(self) -> bool {
        matches!(self, CachePolicy::Enabled | CachePolicy::ReadOnly)
    }

    pub fn write_enabled(self) -> bool {
        matches!(self, CachePolicy::Enabled | CachePolicy::WriteOnly)
    }
}

/// What a request loads
#[derive(Clone)]
pub enum RequestData {
    /// `http(s)://`, `file://` or other URL
    Url(String),
    /// Local file
    Path(PathBuf),
    /// Encoded bytes already in memory
    Bytes(Arc<[u8]>),
    /// An already decoded bitmap
    Bitmap(Arc<Bitmap>),
    Null,
}

impl RequestData {
    pub fn is_null(&self) -> bool {
        matches!(self, RequestData::Null)
    }
}

impl fmt::Display for RequestData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestData::Url(url) => f.write_str(url),
            RequestData::Path(path) => write!(f, "{}", path.display()),
            RequestData::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            RequestData::Bitmap(bitmap) => {
                write!(f, "<bitmap {}x{}>", bitmap.width(), bitmap.height())
            }
            RequestData::Null => f.write_str("null"),
        }
    }
}

impl fmt::Debug for RequestData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestData({})", self)
    }
}

impl From<&str> for RequestData {
    fn from(url: &str) -> Self {
        RequestData::Url(url.to_string())
    }
}

impl From<String> for RequestData {
    fn from(url: String) -> Self {
        RequestData::Url(url)
    }
}

impl From<PathBuf> for RequestData {
    fn from(path: PathBuf) -> Self {
        RequestData::Path(path)
    }
}

/// Receives the outcome of a request (a view, a composable slot, ...)
pub trait Target: Send + Sync {
    fn on_start(&self) {}

    fn on_success(&self, _result: &SuccessResult) {}

    fn on_error(&self, _result: &ErrorResult) {}
}

/// Resolves the size an image should be loaded at
#[async_trait]
pub trait SizeResolver: Send + Sync {
    async fn size(&self) -> Size;
}

/// A resolver that always answers the same size
#[derive(Debug, Clone, Copy)]
pub struct FixedSizeResolver(pub Size);

#[async_trait]
impl SizeResolver for FixedSizeResolver {
    async fn size(&self) -> Size {
        self.0
    }
}

/// Lifecycle a request is bound to; cancelling the scope cancels its requests
#[derive(Debug)]
pub struct RequestScope {
    name: String,
    token: CancellationToken,
}

impl RequestScope {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            token: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Request-level defaults applied by the first interceptor in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultRequestOptions {
    pub scale: Scale,
    pub precision: Precision,
    pub bitmap_config: PixelConfig,
    pub allow_hardware: bool,
    pub memory_cache_policy: CachePolicy,
    pub disk_cache_policy: CachePolicy,
    pub network_cache_policy: CachePolicy,
}

impl Default for DefaultRequestOptions {
    fn default() -> Self {
        Self {
            scale: Scale::Fit,
            precision: Precision::Exact,
            bitmap_config: PixelConfig::Argb8888,
            allow_hardware: true,
            memory_cache_policy: CachePolicy::Enabled,
            disk_cache_policy: CachePolicy::Enabled,
            network_cache_policy: CachePolicy::Enabled,
        }
    }
}

/// A request to load one image
///
/// `target`, `scope` and `size_resolver` define the request's identity;
/// interceptors may replace any other field but must keep those three.
#[derive(Clone)]
pub struct ImageRequest {
    pub id: Uuid,
    pub data: RequestData,
    pub target: Option<Arc<dyn Target>>,
    pub scope: Option<Arc<RequestScope>>,
    pub size_resolver: Arc<dyn SizeResolver>,
    pub scale: Option<Scale>,
    pub precision: Option<Precision>,
    pub bitmap_config: Option<PixelConfig>,
    pub allow_hardware: Option<bool>,
    pub memory_cache_policy: Option<CachePolicy>,
    pub disk_cache_policy: Option<CachePolicy>,
    pub network_cache_policy: Option<CachePolicy>,
    /// Overrides the computed memory cache key
    pub memory_cache_key: Option<String>,
    pub memory_cache_key_extras: Vec<(String, String)>,
    /// Overrides the disk cache key (defaults to the URL)
    pub disk_cache_key: Option<String>,
    pub transformations: Vec<Arc<dyn Transformation>>,
    /// Extra network request headers
    pub headers: Headers,
}

impl ImageRequest {
    pub fn builder(data: impl Into<RequestData>) -> ImageRequestBuilder {
        ImageRequestBuilder::new(data.into())
    }

    pub fn new(data: impl Into<RequestData>) -> Self {
        Self::builder(data).build()
    }

    /// Fill every unset option from `defaults`
    pub fn with_defaults(mut self, defaults: &DefaultRequestOptions) -> Self {
        self.scale.get_or_insert(defaults.scale);
        self.precision.get_or_insert(defaults.precision);
        self.bitmap_config.get_or_insert(defaults.bitmap_config);
        self.allow_hardware.get_or_insert(defaults.allow_hardware);
        self.memory_cache_policy.get_or_insert(defaults.memory_cache_policy);
        self.disk_cache_policy.get_or_insert(defaults.disk_cache_policy);
        self.network_cache_policy.get_or_insert(defaults.network_cache_policy);
        self
    }
}

impl fmt::Debug for ImageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRequest")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("has_target", &self.target.is_some())
            .field("scope", &self.scope.as_ref().map(|s| s.name().to_string()))
            .field("scale", &self.scale)
            .field("precision", &self.precision)
            .field("memory_cache_policy", &self.memory_cache_policy)
            .field("disk_cache_policy", &self.disk_cache_policy)
            .field("transformations", &self.transformations.len())
            .finish()
    }
}

/// Builder for [`ImageRequest`]
pub struct ImageRequestBuilder {
    request: ImageRequest,
}

impl ImageRequestBuilder {
    fn new(data: RequestData) -> Self {
        Self {
            request: ImageRequest {
                id: Uuid::new_v4(),
                data,
                target: None,
                scope: None,
                size_resolver: Arc::new(FixedSizeResolver(Size::ORIGINAL)),
                scale: None,
                precision: None,
                bitmap_config: None,
                allow_hardware: None,
                memory_cache_policy: None,
                disk_cache_policy: None,
                network_cache_policy: None,
                memory_cache_key: None,
                memory_cache_key_extras: Vec::new(),
                disk_cache_key: None,
                transformations: Vec::new(),
                headers: Headers::new(),
            },
        }
    }

    pub fn target(mut self, target: Arc<dyn Target>) -> Self {
        self.request.target = Some(target);
        self
    }

    pub fn scope(mut self, scope: Arc<RequestScope>) -> Self {
        self.request.scope = Some(scope);
        self
    }

    /// Load at a fixed size
    pub fn size(mut self, size: Size) -> Self {
        self.request.size_resolver = Arc::new(FixedSizeResolver(size));
        self
    }

    pub fn size_resolver(mut self, resolver: Arc<dyn SizeResolver>) -> Self {
        self.request.size_resolver = resolver;
        self
    }

    pub fn scale(mut self, scale: Scale) -> Self {
        self.request.scale = Some(scale);
        self
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.request.precision = Some(precision);
        self
    }

    pub fn bitmap_config(mut self, config: PixelConfig) -> Self {
        self.request.bitmap_config = Some(config);
        self
    }

    pub fn allow_hardware(mut self, allow: bool) -> Self {
        self.request.allow_hardware = Some(allow);
        self
    }

    pub fn memory_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.request.memory_cache_policy = Some(policy);
        self
    }

    pub fn disk_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.request.disk_cache_policy = Some(policy);
        self
    }

    pub fn network_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.request.network_cache_policy = Some(policy);
        self
    }

    pub fn memory_cache_key(mut self, key: impl Into<String>) -> Self {
        self.request.memory_cache_key = Some(key.into());
        self
    }

    pub fn memory_cache_key_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request
            .memory_cache_key_extras
            .push((key.into(), value.into()));
        self
    }

    pub fn disk_cache_key(mut self, key: impl Into<String>) -> Self {
        self.request.disk_cache_key = Some(key.into());
        self
    }

    pub fn transformation(mut self, transformation: Arc<dyn Transformation>) -> Self {
        self.request.transformations.push(transformation);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.add(name, value);
        self
    }

    pub fn build(self) -> ImageRequest {
        self.request
    }
}

/// Options resolved for one pass through the engine
#[derive(Clone)]
pub struct Options {
    pub size: Size,
    pub scale: Scale,
    pub precision: Precision,
    pub config: PixelConfig,
    pub allow_hardware: bool,
    pub memory_cache_policy: CachePolicy,
    pub disk_cache_policy: CachePolicy,
    pub network_cache_policy: CachePolicy,
    pub disk_cache_key: Option<String>,
    pub headers: Headers,
    /// Buffers decoders and transformations should draw from
    pub pool: Arc<BitmapPool>,
}

impl Options {
    /// Resolve options from a request whose defaults have been applied
    pub fn resolve(request: &ImageRequest, size: Size, scale: Scale, pool: Arc<BitmapPool>) -> Self {
        let defaults = DefaultRequestOptions::default();
        let mut config = request.bitmap_config.unwrap_or(defaults.bitmap_config);
        let allow_hardware = request.allow_hardware.unwrap_or(defaults.allow_hardware)
            && request.transformations.is_empty();
        if config.is_hardware() && !allow_hardware {
            config = PixelConfig::Argb8888;
        }
        Self {
            size,
            scale,
            precision: request.precision.unwrap_or(defaults.precision),
            config,
            allow_hardware,
            memory_cache_policy: request.memory_cache_policy.unwrap_or_default(),
            disk_cache_policy: request.disk_cache_policy.unwrap_or_default(),
            network_cache_policy: request.network_cache_policy.unwrap_or_default(),
            disk_cache_key: request.disk_cache_key.clone(),
            headers: request.headers.clone(),
            pool,
        }
    }

    pub fn allow_inexact_size(&self) -> bool {
        self.precision == Precision::Inexact
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("size", &self.size)
            .field("scale", &self.scale)
            .field("precision", &self.precision)
            .field("config", &self.config)
            .field("allow_hardware", &self.allow_hardware)
            .finish()
    }
}
