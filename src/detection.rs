//! Detection orchestrator: object-crop, detection-info, face-crop and smart-crop
//!
//! Each operation makes one live provider call and applies fixed crop
//! geometry to the result. Nothing here is cached.

use crate::{
    config::ServiceConfig,
    error::{AutoRenderError, Result},
    providers::{ProviderKind, ProviderRegistry},
    types::{Detection, DetectionResult, ImageArtifact},
};
use image::imageops::FilterType;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Runs single-provider detection and crop flows
#[derive(Debug)]
pub struct DetectionOrchestrator {
    providers: Arc<ProviderRegistry>,
    confidence_threshold: f32,
    default_face_padding: u32,
}

fn prompt_label(prompt: &str) -> Result<String> {
    let label = prompt.trim();
    if label.is_empty() {
        return Err(AutoRenderError::invalid_parameter("Prompt must not be empty"));
    }
    Ok(label.to_string())
}

impl DetectionOrchestrator {
    #[must_use]
    pub fn new(providers: Arc<ProviderRegistry>, config: &ServiceConfig) -> Self {
        Self {
            providers,
            confidence_threshold: config.detection_confidence,
            default_face_padding: config.default_face_padding,
        }
    }

    fn detect(&self, image: &ImageArtifact, label: String) -> Result<Vec<Detection>> {
        let detector = self.providers.object_detector()?;
        let labels = [label];
        let detections =
            detector.call(|d| d.detect(image, &labels, self.confidence_threshold))?;
        debug!(
            labels = ?labels,
            count = detections.len(),
            threshold = self.confidence_threshold,
            "Object detection finished"
        );
        Ok(detections)
    }

    /// Crop to the detector's top-ranked box for `prompt`
    ///
    /// # Errors
    /// - `InvalidParameter` for an empty prompt
    /// - `NotFound` when nothing is detected or the box lies outside the image
    /// - `ProviderUnavailable` / `ProviderFailure` from the detector
    #[instrument(skip(self, image), fields(dimensions = %format!("{}x{}", image.width(), image.height())))]
    pub fn object_crop(&self, image: &ImageArtifact, prompt: &str) -> Result<ImageArtifact> {
        let label = prompt_label(prompt)?;
        let detections = self.detect(image, label)?;
        let first = detections
            .first()
            .ok_or_else(|| AutoRenderError::not_found(format!("No '{}' detected", prompt.trim())))?;

        let bbox = first
            .bbox
            .clamp_to(image.width(), image.height())
            .ok_or_else(|| {
                AutoRenderError::not_found(format!(
                    "Detected '{}' lies outside the image",
                    prompt.trim()
                ))
            })?;
        Ok(image.crop(bbox.to_crop_rect()))
    }

    /// Every detection for `prompt`, in provider order, labelled with the
    /// trimmed prompt
    ///
    /// Zero detections is a normal, empty result.
    ///
    /// # Errors
    /// - `InvalidParameter` for an empty prompt
    /// - `ProviderUnavailable` / `ProviderFailure` from the detector
    #[instrument(skip(self, image), fields(dimensions = %format!("{}x{}", image.width(), image.height())))]
    pub fn detection_info(&self, image: &ImageArtifact, prompt: &str) -> Result<DetectionResult> {
        let label = prompt_label(prompt)?;
        let detections = self
            .detect(image, label.clone())?
            .into_iter()
            .map(|mut d| {
                d.label.clone_from(&label);
                d
            })
            .collect();
        Ok(DetectionResult::new(detections))
    }

    /// Crop to the first face, padded on every side and clamped to the image
    ///
    /// `padding` defaults to the configured face padding.
    ///
    /// # Errors
    /// - `NotFound` when no face is found
    /// - `ProviderUnavailable` / `ProviderFailure` from the face locator
    #[instrument(skip(self, image), fields(dimensions = %format!("{}x{}", image.width(), image.height())))]
    pub fn face_crop(&self, image: &ImageArtifact, padding: Option<u32>) -> Result<ImageArtifact> {
        let padding = padding.unwrap_or(self.default_face_padding);
        let locator = self.providers.face_locator()?;
        let faces = locator.call(|l| l.locate(image))?;
        let face = faces
            .first()
            .ok_or_else(|| AutoRenderError::not_found("No face detected"))?;

        let bbox = face
            .expand(padding)
            .clamp_to(image.width(), image.height())
            .ok_or_else(|| AutoRenderError::not_found("Detected face lies outside the image"))?;
        debug!(face = ?face, padded = ?bbox, padding, "Face crop");
        Ok(image.crop(bbox.to_crop_rect()))
    }

    /// Crop to the heuristic's salient region, then resize to exactly
    /// `width` x `height`
    ///
    /// # Errors
    /// - `InvalidParameter` for a zero dimension
    /// - `ProviderFailure` when the suggested rectangle misses the image
    /// - `ProviderUnavailable` when no smart cropper is configured
    #[instrument(skip(self, image), fields(dimensions = %format!("{}x{}", image.width(), image.height())))]
    pub fn smart_crop(&self, image: &ImageArtifact, width: u32, height: u32) -> Result<ImageArtifact> {
        if width == 0 {
            return Err(AutoRenderError::parameter_value_error("width", 0, ">= 1"));
        }
        if height == 0 {
            return Err(AutoRenderError::parameter_value_error("height", 0, ">= 1"));
        }

        let cropper = self.providers.smart_cropper()?;
        let suggested = cropper.call(|c| c.suggest(image, width, height))?;
        let rect = suggested.clamp_to(image.width(), image.height()).ok_or_else(|| {
            AutoRenderError::provider_failure(
                ProviderKind::SmartCropper,
                format!("Suggested crop {suggested:?} lies outside the image"),
            )
        })?;

        let cropped = image.crop(rect);
        let resized = cropped
            .as_dynamic()
            .resize_exact(width, height, FilterType::Lanczos3);
        debug!(rect = ?rect, width, height, "Smart crop");
        Ok(ImageArtifact::new(resized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::providers::mock::{MockFaceLocator, MockObjectDetector, MockSmartCropper};
    use crate::types::{BoundingBox, CropRect};
    use image::{Rgb, RgbImage};

    fn canvas(width: u32, height: u32) -> ImageArtifact {
        ImageArtifact::from_rgb(RgbImage::from_fn(width, height, |x, y| {
            Rgb([x as u8, y as u8, 0])
        }))
    }

    fn orchestrator(registry: ProviderRegistry) -> DetectionOrchestrator {
        DetectionOrchestrator::new(Arc::new(registry), &ServiceConfig::default())
    }

    #[test]
    fn test_object_crop_uses_first_box() {
        let detector = MockObjectDetector::new(vec![
            Detection::new(BoundingBox::new(10, 20, 30, 50), 0.6, "dog"),
            Detection::new(BoundingBox::new(0, 0, 90, 90), 0.95, "dog"),
        ]);
        let orch = orchestrator(ProviderRegistry::builder().object_detector(detector).build());

        let out = orch.object_crop(&canvas(100, 100), "dog").unwrap();
        assert_eq!(out.dimensions(), (20, 30));
        assert_eq!(out.to_rgb8().get_pixel(0, 0), &Rgb([10, 20, 0]));
    }

    #[test]
    fn test_object_crop_without_detections_is_not_found() {
        let orch = orchestrator(
            ProviderRegistry::builder()
                .object_detector(MockObjectDetector::empty())
                .build(),
        );
        let err = orch.object_crop(&canvas(10, 10), "unicorn").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_object_crop_clamps_box() {
        let detector = MockObjectDetector::new(vec![Detection::new(
            BoundingBox::new(-5, 5, 500, 15),
            0.9,
            "cup",
        )]);
        let orch = orchestrator(ProviderRegistry::builder().object_detector(detector).build());
        let out = orch.object_crop(&canvas(40, 40), "cup").unwrap();
        assert_eq!(out.dimensions(), (40, 10));

        let outside = MockObjectDetector::new(vec![Detection::new(
            BoundingBox::new(50, 50, 60, 60),
            0.9,
            "cup",
        )]);
        let orch = orchestrator(ProviderRegistry::builder().object_detector(outside).build());
        let err = orch.object_crop(&canvas(40, 40), "cup").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_empty_prompt_rejected_before_detection() {
        let detector = MockObjectDetector::empty();
        let calls = detector.calls();
        let orch = orchestrator(ProviderRegistry::builder().object_detector(detector).build());
        let err = orch.detection_info(&canvas(10, 10), "  ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_detection_info_keeps_order_and_labels_with_prompt() {
        let detector = MockObjectDetector::new(vec![
            Detection::new(BoundingBox::new(0, 0, 5, 5), 0.7, ""),
            Detection::new(BoundingBox::new(1, 1, 6, 6), 0.9, "human"),
        ]);
        let orch = orchestrator(ProviderRegistry::builder().object_detector(detector).build());
        let result = orch.detection_info(&canvas(10, 10), " person ").unwrap();

        assert_eq!(result.count, 2);
        assert_eq!(result.detections[0].label, "person");
        assert_eq!(result.detections[1].label, "person");
        assert!((result.detections[0].confidence - 0.7).abs() < f32::EPSILON);
        assert!((result.detections[1].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_detection_info_empty_is_ok() {
        let orch = orchestrator(
            ProviderRegistry::builder()
                .object_detector(MockObjectDetector::empty())
                .build(),
        );
        let result = orch.detection_info(&canvas(10, 10), "cat").unwrap();
        assert!(result.is_empty());
        assert_eq!(result.count, 0);
    }

    #[test]
    fn test_face_crop_pads_and_clamps() {
        let locator = MockFaceLocator::new(vec![BoundingBox::new(10, 10, 30, 30)]);
        let orch = orchestrator(ProviderRegistry::builder().face_locator(locator).build());

        let out = orch.face_crop(&canvas(100, 60), Some(5)).unwrap();
        assert_eq!(out.dimensions(), (30, 30));

        // Default padding of 50 reaches past every edge
        let out = orch.face_crop(&canvas(100, 60), None).unwrap();
        assert_eq!(out.dimensions(), (80, 60));
    }

    #[test]
    fn test_face_crop_without_faces_is_not_found() {
        let orch = orchestrator(
            ProviderRegistry::builder()
                .face_locator(MockFaceLocator::empty())
                .build(),
        );
        let err = orch.face_crop(&canvas(10, 10), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_smart_crop_resizes_to_target() {
        let cropper = MockSmartCropper::fixed(CropRect::new(10, 10, 20, 20));
        let orch = orchestrator(ProviderRegistry::builder().smart_cropper(cropper).build());
        let out = orch.smart_crop(&canvas(100, 100), 64, 48).unwrap();
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn test_smart_crop_rejects_zero_size() {
        let cropper = MockSmartCropper::new();
        let calls = cropper.calls();
        let orch = orchestrator(ProviderRegistry::builder().smart_cropper(cropper).build());
        let err = orch.smart_crop(&canvas(10, 10), 0, 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_smart_crop_rect_outside_image_is_provider_failure() {
        let cropper = MockSmartCropper::fixed(CropRect::new(500, 500, 10, 10));
        let orch = orchestrator(ProviderRegistry::builder().smart_cropper(cropper).build());
        let err = orch.smart_crop(&canvas(10, 10), 5, 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);
    }

    #[test]
    fn test_missing_provider_is_unavailable() {
        let orch = orchestrator(ProviderRegistry::builder().build());
        assert_eq!(
            orch.face_crop(&canvas(10, 10), None).unwrap_err().kind(),
            ErrorKind::ProviderUnavailable
        );
        assert_eq!(
            orch.object_crop(&canvas(10, 10), "cat").unwrap_err().kind(),
            ErrorKind::ProviderUnavailable
        );
    }
}
