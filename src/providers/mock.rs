//! Deterministic mock providers for testing and debugging
//!
//! None of these load a model. Each keeps a shared [`CallCounter`] so tests can
//! verify whether a provider was reached, and each can be built to fail.

use super::{BackgroundRemover, FaceLocator, GenerativeModel, ObjectDetector, ProviderKind, SmartCropper};
use crate::{
    error::{AutoRenderError, Result},
    types::{BoundingBox, CropRect, Detection, ImageArtifact},
};
use image::{GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Number of inference calls made on a mock, shared across clones
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
struct Behavior {
    calls: CallCounter,
    delay: Option<Duration>,
    failure: Option<String>,
}

impl Behavior {
    fn enter(&self, provider: ProviderKind) -> Result<()> {
        self.calls.record();
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match &self.failure {
            Some(message) => Err(AutoRenderError::provider_failure(provider, message.clone())),
            None => Ok(()),
        }
    }
}

/// Segmentation mask shapes produced by [`MockBackgroundRemover`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskShape {
    /// Opaque centered rectangle covering the middle half of each axis
    CenterRect,
    /// Everything is foreground
    Full,
    /// Everything is background
    Empty,
}

/// Background remover that applies a fixed geometric mask
#[derive(Debug, Clone)]
pub struct MockBackgroundRemover {
    shape: MaskShape,
    behavior: Behavior,
}

impl Default for MockBackgroundRemover {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackgroundRemover {
    #[must_use]
    pub fn new() -> Self {
        Self::with_shape(MaskShape::CenterRect)
    }

    #[must_use]
    pub fn with_shape(shape: MaskShape) -> Self {
        Self {
            shape,
            behavior: Behavior::default(),
        }
    }

    /// A remover whose every call fails with `message`
    #[must_use]
    pub fn failing<S: Into<String>>(message: S) -> Self {
        let mut remover = Self::new();
        remover.behavior.failure = Some(message.into());
        remover
    }

    /// Sleep for `delay` inside every call
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.behavior.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn calls(&self) -> CallCounter {
        self.behavior.calls.clone()
    }

    /// The mask this remover would apply to an image of the given size
    #[must_use]
    pub fn mask(&self, width: u32, height: u32) -> GrayImage {
        let (x0, x1) = (width / 4, width - width / 4);
        let (y0, y1) = (height / 4, height - height / 4);
        GrayImage::from_fn(width, height, |x, y| {
            let inside = match self.shape {
                MaskShape::CenterRect => x >= x0 && x < x1 && y >= y0 && y < y1,
                MaskShape::Full => true,
                MaskShape::Empty => false,
            };
            Luma([if inside { 255 } else { 0 }])
        })
    }
}

impl BackgroundRemover for MockBackgroundRemover {
    fn remove(&mut self, image: &ImageArtifact) -> Result<ImageArtifact> {
        self.behavior.enter(ProviderKind::BackgroundRemover)?;
        let rgb = image.to_rgb8();
        let mask = self.mask(rgb.width(), rgb.height());
        let rgba = RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
            image::Rgba([r, g, b, mask.get_pixel(x, y)[0]])
        });
        Ok(ImageArtifact::from_rgba(rgba))
    }
}

/// Generative model that paints a vertical gradient seeded by the prompt
#[derive(Debug, Clone, Default)]
pub struct MockGenerativeModel {
    native_size: Option<(u32, u32)>,
    behavior: Behavior,
}

impl MockGenerativeModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always generate at this size, ignoring the requested dimensions
    #[must_use]
    pub fn with_native_size(mut self, width: u32, height: u32) -> Self {
        self.native_size = Some((width, height));
        self
    }

    #[must_use]
    pub fn failing<S: Into<String>>(message: S) -> Self {
        let mut model = Self::new();
        model.behavior.failure = Some(message.into());
        model
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.behavior.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn calls(&self) -> CallCounter {
        self.behavior.calls.clone()
    }

    /// Base color derived from the prompt bytes
    #[must_use]
    pub fn prompt_color(prompt: &str) -> [u8; 3] {
        let mut color = [0x40u8, 0x80, 0xC0];
        for (i, byte) in prompt.bytes().enumerate() {
            let slot = &mut color[i % 3];
            *slot = slot.wrapping_mul(31).wrapping_add(byte);
        }
        color
    }
}

impl GenerativeModel for MockGenerativeModel {
    fn generate(&mut self, prompt: &str, width: u32, height: u32) -> Result<ImageArtifact> {
        self.behavior.enter(ProviderKind::GenerativeModel)?;
        let (width, height) = self.native_size.unwrap_or((width, height));
        let [r, g, b] = Self::prompt_color(prompt);
        let image = RgbImage::from_fn(width, height, |_, y| {
            let shade = u8::try_from(y * 64 / height.max(1)).unwrap_or(0);
            Rgb([r.saturating_add(shade), g, b.saturating_sub(shade)])
        });
        Ok(ImageArtifact::from_rgb(image))
    }
}

/// Object detector returning a fixed list of detections
#[derive(Debug, Clone, Default)]
pub struct MockObjectDetector {
    detections: Vec<Detection>,
    behavior: Behavior,
}

impl MockObjectDetector {
    /// A detector that reports `detections` (filtered by confidence) for every query
    #[must_use]
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            behavior: Behavior::default(),
        }
    }

    /// A detector that never finds anything
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn failing<S: Into<String>>(message: S) -> Self {
        let mut detector = Self::empty();
        detector.behavior.failure = Some(message.into());
        detector
    }

    #[must_use]
    pub fn calls(&self) -> CallCounter {
        self.behavior.calls.clone()
    }
}

impl ObjectDetector for MockObjectDetector {
    fn detect(
        &mut self,
        _image: &ImageArtifact,
        _labels: &[String],
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        self.behavior.enter(ProviderKind::ObjectDetector)?;
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .cloned()
            .collect())
    }
}

/// Face locator returning fixed boxes
#[derive(Debug, Clone, Default)]
pub struct MockFaceLocator {
    faces: Vec<BoundingBox>,
    behavior: Behavior,
}

impl MockFaceLocator {
    #[must_use]
    pub fn new(faces: Vec<BoundingBox>) -> Self {
        Self {
            faces,
            behavior: Behavior::default(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    #[must_use]
    pub fn calls(&self) -> CallCounter {
        self.behavior.calls.clone()
    }
}

impl FaceLocator for MockFaceLocator {
    fn locate(&mut self, _image: &ImageArtifact) -> Result<Vec<BoundingBox>> {
        self.behavior.enter(ProviderKind::FaceLocator)?;
        Ok(self.faces.clone())
    }
}

/// Smart cropper returning a fixed rectangle, or the centered window of the
/// target aspect ratio when none is set
#[derive(Debug, Clone, Default)]
pub struct MockSmartCropper {
    rect: Option<CropRect>,
    behavior: Behavior,
}

impl MockSmartCropper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fixed(rect: CropRect) -> Self {
        Self {
            rect: Some(rect),
            behavior: Behavior::default(),
        }
    }

    #[must_use]
    pub fn calls(&self) -> CallCounter {
        self.behavior.calls.clone()
    }
}

impl SmartCropper for MockSmartCropper {
    fn suggest(&mut self, image: &ImageArtifact, width: u32, height: u32) -> Result<CropRect> {
        self.behavior.enter(ProviderKind::SmartCropper)?;
        if let Some(rect) = self.rect {
            return Ok(rect);
        }
        let (crop_w, crop_h) = super::smartcrop::fit_aspect(image.dimensions(), width, height);
        Ok(CropRect::new(
            (image.width() - crop_w) / 2,
            (image.height() - crop_h) / 2,
            crop_w,
            crop_h,
        ))
    }
}
