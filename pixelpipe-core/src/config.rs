//! Configuration for an image loader

use crate::coordination::CoordinationPolicy;
use crate::error::{PipelineError, Result};
use crate::request::DefaultRequestOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for [`ImageLoader`](crate::loader::ImageLoader)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Byte budget of the decoded-image cache; 0 disables it
    pub memory_cache_max_bytes: usize,

    /// Directory of the disk cache; `None` disables it
    pub disk_cache_dir: Option<PathBuf>,

    /// Byte budget of cached data files
    pub disk_cache_max_bytes: u64,

    /// Byte budget of reusable bitmap buffers; 0 disables pooling
    pub bitmap_pool_max_bytes: usize,

    /// Whether cache-control headers decide if a disk entry is served.
    /// When false, any cached entry is used as is.
    pub respect_cache_headers: bool,

    /// Whether identical concurrent requests share one execution
    pub coordination: CoordinationPolicy,

    /// Applied to every request field left unset
    pub defaults: DefaultRequestOptions,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            // 64 MB of decoded images
            memory_cache_max_bytes: 64 * 1024 * 1024,
            disk_cache_dir: None,
            // 250 MB on disk
            disk_cache_max_bytes: 250 * 1024 * 1024,
            bitmap_pool_max_bytes: 32 * 1024 * 1024,
            respect_cache_headers: true,
            coordination: CoordinationPolicy::Deduplicate,
            defaults: DefaultRequestOptions::default(),
        }
    }
}

impl LoaderConfig {
    /// Create a new builder for loader configuration
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.disk_cache_dir.is_some() && self.disk_cache_max_bytes == 0 {
            return Err(PipelineError::Config(
                "disk_cache_max_bytes must be greater than 0 when a disk cache is configured"
                    .to_string(),
            ));
        }

        if let Some(dir) = &self.disk_cache_dir {
            if dir.as_os_str().is_empty() {
                return Err(PipelineError::Config(
                    "disk_cache_dir must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Builder for loader configuration
#[derive(Debug, Default)]
pub struct LoaderConfigBuilder {
    memory_cache_max_bytes: Option<usize>,
    disk_cache_dir: Option<PathBuf>,
    disk_cache_max_bytes: Option<u64>,
    bitmap_pool_max_bytes: Option<usize>,
    respect_cache_headers: Option<bool>,
    coordination: Option<CoordinationPolicy>,
    defaults: Option<DefaultRequestOptions>,
}

impl LoaderConfigBuilder {
    pub fn memory_cache_max_bytes(mut self, bytes: usize) -> Self {
        self.memory_cache_max_bytes = Some(bytes);
        self
    }

    pub fn disk_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_cache_dir = Some(dir.into());
        self
    }

    pub fn disk_cache_max_bytes(mut self, bytes: u64) -> Self {
        self.disk_cache_max_bytes = Some(bytes);
        self
    }

    pub fn bitmap_pool_max_bytes(mut self, bytes: usize) -> Self {
        self.bitmap_pool_max_bytes = Some(bytes);
        self
    }

    pub fn respect_cache_headers(mut self, respect: bool) -> Self {
        self.respect_cache_headers = Some(respect);
        self
    }

    pub fn coordination(mut self, policy: CoordinationPolicy) -> Self {
        self.coordination = Some(policy);
        self
    }

    pub fn defaults(mut self, defaults: DefaultRequestOptions) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Build the loader configuration
    pub fn build(self) -> LoaderConfig {
        let defaults = LoaderConfig::default();

        LoaderConfig {
            memory_cache_max_bytes: self
                .memory_cache_max_bytes
                .unwrap_or(defaults.memory_cache_max_bytes),
            disk_cache_dir: self.disk_cache_dir.or(defaults.disk_cache_dir),
            disk_cache_max_bytes: self
                .disk_cache_max_bytes
                .unwrap_or(defaults.disk_cache_max_bytes),
            bitmap_pool_max_bytes: self
                .bitmap_pool_max_bytes
                .unwrap_or(defaults.bitmap_pool_max_bytes),
            respect_cache_headers: self
                .respect_cache_headers
                .unwrap_or(defaults.respect_cache_headers),
            coordination: self.coordination.unwrap_or(defaults.coordination),
            defaults: self.defaults.unwrap_or(defaults.defaults),
        }
    }
}

/// Preset configurations
impl LoaderConfig {
    /// Memory-constrained devices
    pub fn small() -> Self {
        Self {
            memory_cache_max_bytes: 16 * 1024 * 1024,
            disk_cache_max_bytes: 50 * 1024 * 1024,
            bitmap_pool_max_bytes: 4 * 1024 * 1024,
            ..Default::default()
        }
    }

    /// Image-heavy applications
    pub fn large() -> Self {
        Self {
            memory_cache_max_bytes: 256 * 1024 * 1024,
            disk_cache_max_bytes: 1024 * 1024 * 1024,
            bitmap_pool_max_bytes: 128 * 1024 * 1024,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Precision;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.memory_cache_max_bytes, 64 * 1024 * 1024);
        assert!(config.disk_cache_dir.is_none());
        assert!(config.respect_cache_headers);
        assert_eq!(config.coordination, CoordinationPolicy::Deduplicate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut invalid = LoaderConfig::default();
        invalid.disk_cache_dir = Some(PathBuf::from("/tmp/images"));
        invalid.disk_cache_max_bytes = 0;
        assert!(matches!(invalid.validate(), Err(PipelineError::Config(_))));

        let mut empty_dir = LoaderConfig::default();
        empty_dir.disk_cache_dir = Some(PathBuf::new());
        assert!(empty_dir.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = LoaderConfig::builder()
            .memory_cache_max_bytes(1024)
            .disk_cache_dir("/var/cache/images")
            .coordination(CoordinationPolicy::Uncoordinated)
            .defaults(DefaultRequestOptions {
                precision: Precision::Inexact,
                ..Default::default()
            })
            .build();

        assert_eq!(config.memory_cache_max_bytes, 1024);
        assert_eq!(config.disk_cache_dir, Some(PathBuf::from("/var/cache/images")));
        assert_eq!(config.disk_cache_max_bytes, 250 * 1024 * 1024);
        assert_eq!(config.coordination, CoordinationPolicy::Uncoordinated);
        assert_eq!(config.defaults.precision, Precision::Inexact);
    }

    #[test]
    fn test_preset_configs() {
        assert!(LoaderConfig::small().memory_cache_max_bytes < LoaderConfig::large().memory_cache_max_bytes);
        assert!(LoaderConfig::small().validate().is_ok());
        assert!(LoaderConfig::large().validate().is_ok());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = LoaderConfig::builder().disk_cache_dir("/tmp/x").build();
        let json = serde_json::to_string(&config).unwrap();
        let back: LoaderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.disk_cache_dir, config.disk_cache_dir);
        assert_eq!(back.defaults, config.defaults);
    }
}
