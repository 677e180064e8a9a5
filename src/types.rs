//! Core data types shared by the pipeline engine and detection orchestrator

use image::{DynamicImage, GenericImageView, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pixel layout of an [`ImageArtifact`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGB, fully opaque
    Rgb,
    /// 8-bit RGBA with an alpha/mask channel
    Rgba,
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rgb => write!(f, "rgb"),
            Self::Rgba => write!(f, "rgba"),
        }
    }
}

/// Immutable in-memory raster passed between pipeline stages.
///
/// The pixel buffer is shared behind an `Arc`, so cloning an artifact never
/// copies pixels. Every transform builds a new artifact.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    image: Arc<DynamicImage>,
}

impl ImageArtifact {
    /// Wrap a decoded image, normalizing it to 8-bit RGB or RGBA
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        let image = match image {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
            other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        Self {
            image: Arc::new(image),
        }
    }

    #[must_use]
    pub fn from_rgb(image: RgbImage) -> Self {
        Self::new(DynamicImage::ImageRgb8(image))
    }

    #[must_use]
    pub fn from_rgba(image: RgbaImage) -> Self {
        Self::new(DynamicImage::ImageRgba8(image))
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn pixel_format(&self) -> PixelFormat {
        if self.image.color().has_alpha() {
            PixelFormat::Rgba
        } else {
            PixelFormat::Rgb
        }
    }

    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.pixel_format() == PixelFormat::Rgba
    }

    /// Borrow the underlying image
    #[must_use]
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    /// Copy out as RGBA; opaque inputs get a fully opaque alpha channel
    #[must_use]
    pub fn to_rgba8(&self) -> RgbaImage {
        self.image.to_rgba8()
    }

    /// Copy out as RGB, dropping any alpha channel
    #[must_use]
    pub fn to_rgb8(&self) -> RgbImage {
        self.image.to_rgb8()
    }

    /// Extract the alpha channel as a grayscale mask, if present
    #[must_use]
    pub fn alpha_channel(&self) -> Option<GrayImage> {
        if !self.has_alpha() {
            return None;
        }
        let rgba = self.image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Some(GrayImage::from_fn(width, height, |x, y| {
            image::Luma([rgba.get_pixel(x, y)[3]])
        }))
    }

    /// Raw pixel bytes in the artifact's own pixel format
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_bytes()
    }

    /// Crop to `rect`, which must already lie within the image
    #[must_use]
    pub fn crop(&self, rect: CropRect) -> Self {
        Self::new(
            self.image
                .crop_imm(rect.x, rect.y, rect.width, rect.height),
        )
    }
}

impl PartialEq for ImageArtifact {
    fn eq(&self, other: &Self) -> bool {
        self.pixel_format() == other.pixel_format()
            && self.dimensions() == other.dimensions()
            && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ImageArtifact {}

impl From<DynamicImage> for ImageArtifact {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Axis-aligned box in pixel coordinates, `(x0, y0)` inclusive, `(x1, y1)` exclusive.
///
/// Providers may report boxes that extend past the image; use
/// [`BoundingBox::clamp_to`] before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i64; 4]", into = "[i64; 4]")]
pub struct BoundingBox {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Build from a top-left corner and a size
    #[must_use]
    pub fn from_xywh(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    #[must_use]
    pub fn width(&self) -> i64 {
        self.x1 - self.x0
    }

    #[must_use]
    pub fn height(&self) -> i64 {
        self.y1 - self.y0
    }

    /// `x0 < x1` and `y0 < y1`
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.x0 < self.x1 && self.y0 < self.y1
    }

    /// Grow the box by `padding` pixels on every side
    #[must_use]
    pub fn expand(&self, padding: u32) -> Self {
        let p = i64::from(padding);
        Self::new(self.x0 - p, self.y0 - p, self.x1 + p, self.y1 + p)
    }

    /// Clamp to `[0, width] x [0, height]`; `None` when nothing is left
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (i64::from(width), i64::from(height));
        let clamped = Self::new(
            self.x0.clamp(0, w),
            self.y0.clamp(0, h),
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
        );
        clamped.is_valid().then_some(clamped)
    }

    /// Convert a box that already lies within the image into a crop rectangle
    #[must_use]
    pub fn to_crop_rect(&self) -> CropRect {
        CropRect {
            x: self.x0.max(0) as u32,
            y: self.y0.max(0) as u32,
            width: self.width().max(0) as u32,
            height: self.height().max(0) as u32,
        }
    }
}

impl From<[i64; 4]> for BoundingBox {
    fn from(v: [i64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

/// Crop rectangle suggested by a smart-crop heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    #[must_use]
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamp to the image; `None` when the rectangle has no area inside it
    #[must_use]
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let bbox = BoundingBox::from_xywh(
            i64::from(self.x),
            i64::from(self.y),
            i64::from(self.width),
            i64::from(self.height),
        );
        bbox.clamp_to(width, height).map(|b| b.to_crop_rect())
    }
}

/// A single detector hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    #[serde(rename = "class")]
    pub label: String,
}

impl Detection {
    #[must_use]
    pub fn new<S: Into<String>>(bbox: BoundingBox, confidence: f32, label: S) -> Self {
        Self {
            bbox,
            confidence,
            label: label.into(),
        }
    }
}

/// Ordered detections as ranked by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub count: usize,
}

impl DetectionResult {
    #[must_use]
    pub fn new(detections: Vec<Detection>) -> Self {
        let count = detections.len();
        Self { detections, count }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
