//! ONNX Runtime background remover for ISNet-style segmentation models
//!
//! The model takes a `1x3xNxN` normalized RGB tensor and returns a `1x1xNxN`
//! foreground probability map. Inputs are letterboxed into the square canvas
//! and the mask is mapped back through the same transform.

use super::{BackgroundRemover, ProviderKind};
use crate::{
    error::{AutoRenderError, Result},
    types::ImageArtifact,
};
use image::{imageops::FilterType, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use instant::Instant;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::{self, value::Value};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Model input geometry and normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnnxRemoverConfig {
    /// Square input edge in pixels
    pub target_size: u32,
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
    /// Intra-op threads (0 = let ONNX Runtime decide)
    pub intra_threads: usize,
}

impl Default for OnnxRemoverConfig {
    fn default() -> Self {
        Self {
            target_size: 1024,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
            intra_threads: 0,
        }
    }
}

/// Letterbox placement of the source image inside the model canvas
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
    scaled_width: u32,
    scaled_height: u32,
}

impl Letterbox {
    fn new(original: (u32, u32), target_size: u32) -> Self {
        let (width, height) = original;
        let target = target_size as f32;
        let scale = (target / width as f32).min(target / height as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, target_size);
        Self {
            scale,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
            scaled_width,
            scaled_height,
        }
    }
}

fn failure(message: String) -> AutoRenderError {
    AutoRenderError::provider_failure(ProviderKind::BackgroundRemover, message)
}

/// Resize, center on a white canvas and normalize into NCHW
#[allow(clippy::indexing_slicing)]
// Tensor dimensions are allocated from the canvas size
fn preprocess(rgb: &RgbImage, config: &OnnxRemoverConfig) -> (Array4<f32>, Letterbox) {
    let size = config.target_size;
    let letterbox = Letterbox::new(rgb.dimensions(), size);
    let resized = image::imageops::resize(
        rgb,
        letterbox.scaled_width,
        letterbox.scaled_height,
        FilterType::Triangle,
    );

    let mut canvas: RgbImage = ImageBuffer::from_pixel(size, size, Rgb([255, 255, 255]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        i64::from(letterbox.offset_x),
        i64::from(letterbox.offset_y),
    );

    let n = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (f32::from(pixel[c]) / 255.0
                - config.normalization_mean[c])
                / config.normalization_std[c];
        }
    }
    (tensor, letterbox)
}

/// Map the model's probability map back onto the original image grid
fn mask_from_tensor(tensor: &Array4<f32>, original: (u32, u32), letterbox: Letterbox) -> GrayImage {
    let (_, _, mask_h, mask_w) = tensor.dim();
    GrayImage::from_fn(original.0, original.1, |x, y| {
        let tx = (x as f32 * letterbox.scale).round() as usize + letterbox.offset_x as usize;
        let ty = (y as f32 * letterbox.scale).round() as usize + letterbox.offset_y as usize;
        let value = if tx < mask_w && ty < mask_h {
            tensor.get([0, 0, ty, tx]).copied().unwrap_or(0.0)
        } else {
            0.0
        };
        Luma([(value.clamp(0.0, 1.0) * 255.0) as u8])
    })
}

/// Background remover backed by an ONNX Runtime session
#[derive(Debug)]
pub struct OnnxBackgroundRemover {
    session: Session,
    config: OnnxRemoverConfig,
}

impl OnnxBackgroundRemover {
    /// Load a model file
    ///
    /// # Errors
    /// - Unreadable or invalid model file
    /// - ONNX Runtime session creation failures
    pub fn from_file<P: AsRef<Path>>(path: P, config: OnnxRemoverConfig) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AutoRenderError::provider_unavailable(
                ProviderKind::BackgroundRemover,
                format!("Model file not found: {}", path.display()),
            ));
        }
        let bytes = std::fs::read(path)?;
        Self::from_memory(&bytes, config)
    }

    /// Build a session from in-memory model bytes
    ///
    /// # Errors
    /// - ONNX Runtime session creation failures
    pub fn from_memory(model: &[u8], config: OnnxRemoverConfig) -> Result<Self> {
        let start = Instant::now();
        let unavailable = |what: &str, e: ort::Error| {
            AutoRenderError::provider_unavailable(
                ProviderKind::BackgroundRemover,
                format!("{what}: {e}"),
            )
        };

        let mut builder = Session::builder()
            .map_err(|e| unavailable("Failed to create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| unavailable("Failed to set optimization level", e))?;
        if config.intra_threads > 0 {
            builder = builder
                .with_intra_threads(config.intra_threads)
                .map_err(|e| unavailable("Failed to set intra threads", e))?;
        }
        let session = builder
            .commit_from_memory(model)
            .map_err(|e| unavailable("Failed to create session from model data", e))?;

        log::info!(
            "📊 Background removal model loaded: {:.0}ms ({}x{} input)",
            start.elapsed().as_secs_f64() * 1000.0,
            config.target_size,
            config.target_size
        );
        Ok(Self { session, config })
    }

    fn infer(&mut self, input: Array4<f32>) -> Result<Array4<f32>> {
        let input_value = Value::from_array(input)
            .map_err(|e| failure(format!("Failed to convert input tensor: {e}")))?;
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| failure(format!("ONNX inference failed: {e}")))?;

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| failure("No output tensors found".to_string()))?
            .to_string();
        let output = outputs
            .get(first_key.as_str())
            .ok_or_else(|| failure("First output tensor not found".to_string()))?
            .try_extract_array::<f32>()
            .map_err(|e| failure(format!("Failed to extract output tensor: {e}")))?;

        let shape = output.shape().to_vec();
        if shape.len() != 4 {
            return Err(failure(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        }
        let data = output.view().to_owned().into_raw_vec_and_offset().0;
        Array4::from_shape_vec(
            (
                shape.first().copied().unwrap_or(1),
                shape.get(1).copied().unwrap_or(1),
                shape.get(2).copied().unwrap_or(1),
                shape.get(3).copied().unwrap_or(1),
            ),
            data,
        )
        .map_err(|e| failure(format!("Failed to reshape output tensor: {e}")))
    }
}

impl BackgroundRemover for OnnxBackgroundRemover {
    fn remove(&mut self, image: &ImageArtifact) -> Result<ImageArtifact> {
        let start = Instant::now();
        let rgb = image.to_rgb8();
        let (tensor, letterbox) = preprocess(&rgb, &self.config);
        let output = self.infer(tensor)?;
        let mask = mask_from_tensor(&output, rgb.dimensions(), letterbox);

        let rgba = RgbaImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
            Rgba([r, g, b, mask.get_pixel(x, y)[0]])
        });
        log::debug!(
            "Background removal inference: {:.2}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(ImageArtifact::from_rgba(rgba))
    }
}
