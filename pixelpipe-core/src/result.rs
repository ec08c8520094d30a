//! Outcomes of executing an [`ImageRequest`]

use crate::bitmap::Bitmap;
use crate::error::PipelineError;
use crate::key::CacheKey;
use crate::request::ImageRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where a result's image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// The request data was already in memory (bytes or a bitmap)
    Memory,
    /// Served from the decoded-image memory cache
    MemoryCache,
    /// Read from local storage or the disk cache
    Disk,
    /// Fetched over the network
    Network,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Memory => write!(f, "memory"),
            DataSource::MemoryCache => write!(f, "memory_cache"),
            DataSource::Disk => write!(f, "disk"),
            DataSource::Network => write!(f, "network"),
        }
    }
}

/// A successfully loaded image
#[derive(Debug, Clone)]
pub struct SuccessResult {
    pub image: Arc<Bitmap>,
    pub request: ImageRequest,
    pub data_source: DataSource,
    /// Set when the image is (now) held by the memory cache
    pub memory_cache_key: Option<CacheKey>,
    pub disk_cache_key: Option<String>,
    pub is_sampled: bool,
}

/// A failed request, carrying the cause
#[derive(Debug, Clone)]
pub struct ErrorResult {
    pub request: ImageRequest,
    pub error: Arc<PipelineError>,
}

impl ErrorResult {
    pub fn new(request: ImageRequest, error: PipelineError) -> Self {
        Self {
            request,
            error: Arc::new(error),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ImageResult {
    Success(SuccessResult),
    Error(ErrorResult),
}

impl ImageResult {
    pub fn request(&self) -> &ImageRequest {
        match self {
            ImageResult::Success(result) => &result.request,
            ImageResult::Error(result) => &result.request,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ImageResult::Success(_))
    }

    pub fn image(&self) -> Option<&Arc<Bitmap>> {
        match self {
            ImageResult::Success(result) => Some(&result.image),
            ImageResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            ImageResult::Success(_) => None,
            ImageResult::Error(result) => Some(&result.error),
        }
    }

    pub fn into_success(self) -> Option<SuccessResult> {
        match self {
            ImageResult::Success(result) => Some(result),
            ImageResult::Error(_) => None,
        }
    }

    pub fn into_error(self) -> Option<ErrorResult> {
        match self {
            ImageResult::Success(_) => None,
            ImageResult::Error(result) => Some(result),
        }
    }
}
