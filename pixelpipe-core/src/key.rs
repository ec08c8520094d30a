//! Memory cache keys
//!
//! A [`CacheKey`] is a base identity plus ordered string extras. Equality and
//! hashing are structural over the extras set, so two keys built from the
//! same inputs are always equal regardless of how the extras were collected.

use crate::component::Transformation;
use crate::request::Size;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Prefix of the per-transformation extras; the list index is appended
pub const EXTRA_TRANSFORMATION_PREFIX: &str = "pixelpipe#transformation_";

/// Serialized target size, present whenever transformations are
pub const EXTRA_TRANSFORMATION_SIZE: &str = "pixelpipe#transformation_size";

/// Structural identity of a cached decoded image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKey {
    pub base: String,
    pub extras: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            extras: Vec::new(),
        }
    }

    /// Add an extra, replacing an existing value with the same name
    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_extra(name.into(), value.into());
        self
    }

    fn insert_extra(&mut self, name: String, value: String) {
        match self.extras.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.extras.push((name, value)),
        }
    }

    pub fn extra(&self, name: &str) -> Option<&str> {
        self.extras
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The target size baked into this key by transformations, if any
    pub fn transformation_size(&self) -> Option<&str> {
        self.extra(EXTRA_TRANSFORMATION_SIZE)
    }

    fn sorted_extras(&self) -> Vec<&(String, String)> {
        let mut extras: Vec<&(String, String)> = self.extras.iter().collect();
        extras.sort();
        extras
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
            && self.extras.len() == other.extras.len()
            && self.sorted_extras() == other.sorted_extras()
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.base.hash(state);
        for extra in self.sorted_extras() {
            extra.hash(state);
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        if !self.extras.is_empty() {
            let extras: Vec<String> = self
                .sorted_extras()
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "#{{{}}}", extras.join(","))?;
        }
        Ok(())
    }
}

/// Derive the memory cache key for a request
///
/// Returns `None` when there is no base identity (the data is not
/// cacheable). With no transformations the key depends only on `base` and
/// `extras`; otherwise every transformation's own key is added in list order
/// together with the serialized `size`, since transformations may depend on
/// the target dimensions.
pub fn compute_key(
    base: Option<&str>,
    transformations: &[Arc<dyn Transformation>],
    size: Size,
    extras: &[(String, String)],
) -> Option<CacheKey> {
    let base = base?;
    let mut key = CacheKey::new(base);

    for (name, value) in extras {
        key.insert_extra(name.clone(), value.clone());
    }

    if !transformations.is_empty() {
        for (index, transformation) in transformations.iter().enumerate() {
            key.insert_extra(
                format!("{}{}", EXTRA_TRANSFORMATION_PREFIX, index),
                transformation.cache_key(),
            );
        }
        key.insert_extra(EXTRA_TRANSFORMATION_SIZE.to_string(), size.to_string());
    }

    Some(key)
}
