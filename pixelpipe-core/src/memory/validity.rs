//! Whether a cached decoded image can satisfy a request

use super::store::MemoryCacheEntry;
use crate::key::CacheKey;
use crate::request::{Precision, Scale, Size};

/// Scale factor that maps a source size onto a destination size
pub fn size_multiplier(src_width: u32, src_height: u32, dst_width: i64, dst_height: i64, scale: Scale) -> f64 {
    let width_percent = dst_width as f64 / src_width as f64;
    let height_percent = dst_height as f64 / src_height as f64;
    match scale {
        Scale::Fit => width_percent.min(height_percent),
        Scale::Fill => width_percent.max(height_percent),
    }
}

/// Decide whether `entry` is good enough for a request at `size`
///
/// Checked in order: original-size requests need an unsampled image;
/// transformed entries must have been produced for exactly this size;
/// otherwise the cached dimensions are compared with the request under
/// `scale` and `precision`, allowing a 1px rounding tolerance. Hardware
/// bitmaps are rejected when the request does not allow them.
pub fn is_cache_entry_valid(
    key: &CacheKey,
    entry: &MemoryCacheEntry,
    size: Size,
    scale: Scale,
    precision: Precision,
    allow_hardware: bool,
) -> bool {
    if !allow_hardware && entry.image.is_hardware() {
        return false;
    }
    is_size_valid(key, entry, size, scale, precision)
}

fn is_size_valid(
    key: &CacheKey,
    entry: &MemoryCacheEntry,
    size: Size,
    scale: Scale,
    precision: Precision,
) -> bool {
    if size.is_original() {
        return !entry.is_sampled;
    }

    if let Some(transformation_size) = key.transformation_size() {
        return transformation_size == size.to_string();
    }

    let src_width = entry.image.width();
    let src_height = entry.image.height();
    if src_width == 0 || src_height == 0 {
        return false;
    }

    let dst_width = size.width.px_or(i32::MAX as u32) as i64;
    let dst_height = size.height.px_or(i32::MAX as u32) as i64;
    let multiplier = size_multiplier(src_width, src_height, dst_width, dst_height, scale);
    let allow_inexact = precision == Precision::Inexact;

    if allow_inexact {
        let downsample = multiplier.min(1.0);
        if (dst_width as f64 - downsample * src_width as f64).abs() <= 1.0
            || (dst_height as f64 - downsample * src_height as f64).abs() <= 1.0
        {
            return true;
        }
    } else if (size.width.is_undefined() || (dst_width - src_width as i64).abs() <= 1)
        && (size.height.is_undefined() || (dst_height - src_height as i64).abs() <= 1)
    {
        return true;
    }

    if multiplier != 1.0 && !allow_inexact {
        return false;
    }

    // A sampled image smaller than needed would have to be upscaled
    if multiplier > 1.0 && entry.is_sampled {
        return false;
    }

    true
}
