//! Hooks for observing requests as they move through the pipeline
//!
//! Every method has an empty default, so listeners implement only what they
//! care about. Listeners run inline on the request's task and must not block.

use crate::error::PipelineError;
use crate::key::CacheKey;
use crate::request::{ImageRequest, RequestData, Size};
use crate::result::{DataSource, SuccessResult};

pub trait EventListener: Send + Sync {
    fn on_start(&self, _request: &ImageRequest) {}

    fn resolve_size_end(&self, _request: &ImageRequest, _size: Size) {}

    fn map_end(&self, _request: &ImageRequest, _output: &RequestData) {}

    fn key_end(&self, _request: &ImageRequest, _key: Option<&CacheKey>) {}

    fn memory_cache_hit(&self, _request: &ImageRequest, _key: &CacheKey) {}

    fn fetch_start(&self, _request: &ImageRequest) {}

    fn fetch_end(&self, _request: &ImageRequest, _data_source: DataSource) {}

    fn decode_start(&self, _request: &ImageRequest) {}

    fn decode_end(&self, _request: &ImageRequest, _is_sampled: bool) {}

    fn transform_start(&self, _request: &ImageRequest, _name: &str) {}

    fn transform_end(&self, _request: &ImageRequest, _name: &str) {}

    fn on_cancel(&self, _request: &ImageRequest) {}

    fn on_error(&self, _request: &ImageRequest, _error: &PipelineError) {}

    fn on_success(&self, _request: &ImageRequest, _result: &SuccessResult) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventListener;

impl EventListener for NoopEventListener {}
