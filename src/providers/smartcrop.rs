//! Built-in smart-crop heuristic
//!
//! Scores every pixel by edge energy plus color saturation on a reduced copy
//! of the image, then slides the largest window of the target aspect ratio
//! across the free axis and keeps the position capturing the most energy.

use super::SmartCropper;
use crate::{
    error::{AutoRenderError, Result},
    types::{CropRect, ImageArtifact},
};
use image::imageops::FilterType;

/// Longest edge of the reduced copy used for scoring
const ANALYSIS_EDGE: u32 = 256;
/// Candidate window positions along the free axis
const SCAN_STEPS: u32 = 32;
const SATURATION_WEIGHT: f32 = 0.3;

/// Largest `(width, height)` with the aspect ratio of `target_w:target_h`
/// that fits in `dimensions`
#[must_use]
pub fn fit_aspect(dimensions: (u32, u32), target_w: u32, target_h: u32) -> (u32, u32) {
    let (width, height) = dimensions;
    if target_w == 0 || target_h == 0 {
        return (width, height);
    }
    let by_height = (u64::from(height) * u64::from(target_w) / u64::from(target_h)) as u32;
    if by_height <= width {
        (by_height.max(1), height)
    } else {
        let by_width = (u64::from(width) * u64::from(target_h) / u64::from(target_w)) as u32;
        (width, by_width.clamp(1, height))
    }
}

/// Summed-area table over the energy map
struct EnergyMap {
    width: u32,
    height: u32,
    /// `(width + 1) * (height + 1)` prefix sums
    sums: Vec<f64>,
}

impl EnergyMap {
    // Indices stay inside the table allocated from the same dimensions
    #[allow(clippy::indexing_slicing)]
    fn build(image: &ImageArtifact) -> Self {
        let rgb = image
            .as_dynamic()
            .resize(ANALYSIS_EDGE, ANALYSIS_EDGE, FilterType::Triangle)
            .to_rgb8();
        let (width, height) = rgb.dimensions();

        let luma = |x: u32, y: u32| {
            let p = rgb.get_pixel(x, y);
            (0.299 * f32::from(p[0]) + 0.587 * f32::from(p[1]) + 0.114 * f32::from(p[2])) / 255.0
        };

        let stride = width as usize + 1;
        let mut sums = vec![0.0f64; stride * (height as usize + 1)];
        for y in 0..height {
            let mut row = 0.0f64;
            for x in 0..width {
                let center = luma(x, y);
                let left = luma(x.saturating_sub(1), y);
                let right = luma((x + 1).min(width - 1), y);
                let top = luma(x, y.saturating_sub(1));
                let bottom = luma(x, (y + 1).min(height - 1));
                let edge = ((center - left).abs()
                    + (center - right).abs()
                    + (center - top).abs()
                    + (center - bottom).abs())
                    / 4.0;

                let p = rgb.get_pixel(x, y);
                let max = p.0.iter().copied().max().unwrap_or(0);
                let min = p.0.iter().copied().min().unwrap_or(0);
                let saturation = if max == 0 {
                    0.0
                } else {
                    f32::from(max - min) / f32::from(max)
                };

                row += f64::from(edge + SATURATION_WEIGHT * saturation);
                let idx = (y as usize + 1) * stride + x as usize + 1;
                sums[idx] = sums[idx - stride] + row;
            }
        }

        Self {
            width,
            height,
            sums,
        }
    }

    /// Energy inside `[x0, x1) x [y0, y1)` in analysis coordinates
    #[allow(clippy::indexing_slicing)]
    fn window(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
        let stride = self.width as usize + 1;
        let at = |x: u32, y: u32| self.sums[y as usize * stride + x as usize];
        at(x1, y1) - at(x0, y1) - at(x1, y0) + at(x0, y0)
    }
}

/// Saliency-based cropper needing no model
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeSmartCropper;

impl EdgeSmartCropper {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SmartCropper for EdgeSmartCropper {
    fn suggest(&mut self, image: &ImageArtifact, width: u32, height: u32) -> Result<CropRect> {
        if width == 0 || height == 0 {
            return Err(AutoRenderError::invalid_parameter(
                "Crop target dimensions must be positive",
            ));
        }
        let (img_w, img_h) = image.dimensions();
        let (crop_w, crop_h) = fit_aspect((img_w, img_h), width, height);
        let free_x = img_w - crop_w;
        let free_y = img_h - crop_h;
        if free_x == 0 && free_y == 0 {
            return Ok(CropRect::new(0, 0, crop_w, crop_h));
        }

        let energy = EnergyMap::build(image);
        let sx = energy.width as f64 / f64::from(img_w);
        let sy = energy.height as f64 / f64::from(img_h);
        let to_analysis = |v: u32, scale: f64, limit: u32| ((f64::from(v) * scale).round() as u32).min(limit);

        let free = free_x.max(free_y);
        let steps = SCAN_STEPS.min(free);
        let center = f64::from(free) / 2.0;

        let mut best = (f64::NEG_INFINITY, 0u32);
        for step in 0..=steps {
            let offset = (u64::from(free) * u64::from(step) / u64::from(steps)) as u32;
            let (x, y) = if free_x > 0 { (offset, 0) } else { (0, offset) };
            let score = energy.window(
                to_analysis(x, sx, energy.width),
                to_analysis(y, sy, energy.height),
                to_analysis(x + crop_w, sx, energy.width),
                to_analysis(y + crop_h, sy, energy.height),
            );
            // Slight pull toward the center breaks ties on flat images
            let score = score - (f64::from(offset) - center).abs() * 1e-6;
            if score > best.0 {
                best = (score, offset);
            }
        }

        let offset = best.1;
        let rect = if free_x > 0 {
            CropRect::new(offset, 0, crop_w, crop_h)
        } else {
            CropRect::new(0, offset, crop_w, crop_h)
        };
        tracing::debug!(?rect, target_w = width, target_h = height, "Smart-crop suggestion");
        Ok(rect)
    }
}
