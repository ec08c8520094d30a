//! Decoded raster handle
//!
//! A [`Bitmap`] is what decoders produce, what transformations consume and
//! what the memory cache and [`BitmapPool`](crate::pool::BitmapPool) hold.
//! Software bitmaps own their pixel buffer; hardware bitmaps only carry
//! dimensions because their storage lives outside the process heap.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel storage format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelConfig {
    /// 8-bit alpha only
    Alpha8,
    /// 16-bit packed RGB
    Rgb565,
    /// 32-bit ARGB, the default decode format
    Argb8888,
    /// 64-bit half-float RGBA
    RgbaF16,
    /// GPU-resident buffer; pixels are not addressable from the CPU
    Hardware,
}

impl PixelConfig {
    /// Bytes used by a single pixel in this format
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelConfig::Alpha8 => 1,
            PixelConfig::Rgb565 => 2,
            PixelConfig::Argb8888 | PixelConfig::Hardware => 4,
            PixelConfig::RgbaF16 => 8,
        }
    }

    pub fn is_hardware(self) -> bool {
        matches!(self, PixelConfig::Hardware)
    }
}

impl Default for PixelConfig {
    fn default() -> Self {
        PixelConfig::Argb8888
    }
}

impl fmt::Display for PixelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelConfig::Alpha8 => "alpha_8",
            PixelConfig::Rgb565 => "rgb_565",
            PixelConfig::Argb8888 => "argb_8888",
            PixelConfig::RgbaF16 => "rgba_f16",
            PixelConfig::Hardware => "hardware",
        };
        f.write_str(name)
    }
}

/// Number of bytes a `width` x `height` bitmap needs in `config`
pub fn allocation_size(width: u32, height: u32, config: PixelConfig) -> usize {
    width as usize * height as usize * config.bytes_per_pixel()
}

/// A decoded image surface
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    config: PixelConfig,
    pixels: Vec<u8>,
    mutable: bool,
}

impl Bitmap {
    /// Allocate a zeroed, mutable software bitmap
    ///
    /// `Hardware` is not a software format; asking for it yields a hardware
    /// handle with no addressable pixels.
    pub fn new(width: u32, height: u32, config: PixelConfig) -> Self {
        if config.is_hardware() {
            return Self::hardware(width, height);
        }
        Self {
            width,
            height,
            config,
            pixels: vec![0; allocation_size(width, height, config)],
            mutable: true,
        }
    }

    /// Wrap an existing pixel buffer
    ///
    /// Returns `None` when the buffer is smaller than the dimensions require.
    pub fn from_pixels(width: u32, height: u32, config: PixelConfig, pixels: Vec<u8>) -> Option<Self> {
        if config.is_hardware() || pixels.len() < allocation_size(width, height, config) {
            return None;
        }
        Some(Self {
            width,
            height,
            config,
            pixels,
            mutable: true,
        })
    }

    /// A hardware-backed handle
    pub fn hardware(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            config: PixelConfig::Hardware,
            pixels: Vec::new(),
            mutable: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn config(&self) -> PixelConfig {
        self.config
    }

    pub fn is_hardware(&self) -> bool {
        self.config.is_hardware()
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Freeze the bitmap; immutable bitmaps are never pooled
    pub fn set_immutable(&mut self) {
        self.mutable = false;
    }

    /// Bytes needed for the current dimensions
    pub fn byte_count(&self) -> usize {
        allocation_size(self.width, self.height, self.config)
    }

    /// Bytes owned by the underlying buffer, which may exceed
    /// [`byte_count`](Self::byte_count) after a reconfigure
    pub fn allocation_byte_count(&self) -> usize {
        if self.is_hardware() {
            self.byte_count()
        } else {
            self.pixels.len()
        }
    }

    /// Pixel bytes for the current dimensions
    pub fn pixels(&self) -> &[u8] {
        let len = self.byte_count().min(self.pixels.len());
        &self.pixels[..len]
    }

    /// Mutable pixel bytes; `None` for immutable or hardware bitmaps
    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        if !self.mutable || self.is_hardware() {
            return None;
        }
        let len = self.byte_count();
        Some(&mut self.pixels[..len])
    }

    /// Reuse this buffer for new dimensions
    ///
    /// Fails (returning `false`, leaving the bitmap untouched) when the
    /// existing allocation is too small or the bitmap cannot be written.
    pub fn reconfigure(&mut self, width: u32, height: u32, config: PixelConfig) -> bool {
        if !self.mutable || self.is_hardware() || config.is_hardware() {
            return false;
        }
        if allocation_size(width, height, config) > self.pixels.len() {
            return false;
        }
        self.width = width;
        self.height = height;
        self.config = config;
        true
    }

    /// Zero every pixel
    pub fn erase(&mut self) {
        if let Some(pixels) = self.pixels_mut() {
            pixels.fill(0);
        }
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("config", &self.config)
            .field("allocation", &self.allocation_byte_count())
            .field("mutable", &self.mutable)
            .finish()
    }
}
