//! Pipeline engine: memoized background removal/replacement and generative swap
//!
//! Both flows run at most once per [`OperationFingerprint`]. Inputs are
//! downscaled first, then fingerprinted, so the cache key describes exactly
//! the pixels the providers see. Each flow has its own bounded cache.

use crate::{
    cache::{ArtifactCache, CacheStats},
    codec,
    config::ServiceConfig,
    error::{AutoRenderError, Result},
    fingerprint::{OperationFingerprint, OperationKind},
    providers::ProviderRegistry,
    types::ImageArtifact,
};
use image::{imageops::FilterType, GrayImage, Rgb, RgbImage, RgbaImage};
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Parameters for background removal or solid-color replacement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveBackgroundParams {
    /// Hex RGB color, with or without a leading `#`. `None` or an empty
    /// string keeps transparency.
    pub bg_color: Option<String>,
    /// Gaussian blur radius applied to the alpha channel only
    pub edge_blur_radius: Option<u32>,
}

impl RemoveBackgroundParams {
    #[must_use]
    pub fn transparent() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_color<S: Into<String>>(mut self, color: S) -> Self {
        self.bg_color = Some(color.into());
        self
    }

    #[must_use]
    pub fn with_edge_blur(mut self, radius: u32) -> Self {
        self.edge_blur_radius = Some(radius);
        self
    }
}

/// Parameters for a generative background swap
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapBackgroundParams {
    pub prompt: String,
    /// Generation width; defaults to the input width
    pub width: Option<u32>,
    /// Generation height; defaults to the input height
    pub height: Option<u32>,
}

impl SwapBackgroundParams {
    #[must_use]
    pub fn new<S: Into<String>>(prompt: S) -> Self {
        Self {
            prompt: prompt.into(),
            width: None,
            height: None,
        }
    }

    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// Replace the alpha channel with a Gaussian-blurred copy of itself
#[must_use]
pub fn blur_alpha(foreground: &RgbaImage, radius: u32) -> RgbaImage {
    if radius == 0 {
        return foreground.clone();
    }
    let alpha = GrayImage::from_fn(foreground.width(), foreground.height(), |x, y| {
        image::Luma([foreground.get_pixel(x, y)[3]])
    });
    let softened = image::imageops::blur(&alpha, radius as f32);

    let mut out = foreground.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        pixel[3] = softened.get_pixel(x, y)[0];
    }
    out
}

/// Blend `foreground` over an opaque `background` of the same size using the
/// foreground alpha as the mask
#[must_use]
pub fn composite_over(foreground: &RgbaImage, background: &RgbImage) -> RgbImage {
    RgbImage::from_fn(foreground.width(), foreground.height(), |x, y| {
        let fg = foreground.get_pixel(x, y);
        let bg = background.get_pixel(x, y);
        let a = u32::from(fg[3]);
        let mix = |f: u8, b: u8| ((u32::from(f) * a + u32::from(b) * (255 - a) + 127) / 255) as u8;
        Rgb([mix(fg[0], bg[0]), mix(fg[1], bg[1]), mix(fg[2], bg[2])])
    })
}

/// Runs the removal and swap flows with per-fingerprint memoization
#[derive(Debug)]
pub struct PipelineEngine {
    providers: Arc<ProviderRegistry>,
    removal_cache: ArtifactCache,
    swap_cache: ArtifactCache,
    max_image_size: u32,
    swap_max_image_size: u32,
    default_edge_blur: u32,
}

impl PipelineEngine {
    #[must_use]
    pub fn new(providers: Arc<ProviderRegistry>, config: &ServiceConfig) -> Self {
        let (removal_cache, swap_cache) = if config.disable_cache {
            (
                ArtifactCache::disabled("removal"),
                ArtifactCache::disabled("swap"),
            )
        } else {
            (
                ArtifactCache::new("removal", config.removal_cache_capacity),
                ArtifactCache::new("swap", config.swap_cache_capacity),
            )
        };
        Self {
            providers,
            removal_cache,
            swap_cache,
            max_image_size: config.max_image_size,
            swap_max_image_size: config.swap_max_image_size,
            default_edge_blur: config.default_edge_blur,
        }
    }

    /// Remove the background, optionally softening the mask edge and filling
    /// the background with a solid color.
    ///
    /// Returns an opaque RGB artifact when a color is given, otherwise RGBA.
    ///
    /// # Errors
    /// - `InvalidParameter` for a malformed non-empty color (before any
    ///   provider runs)
    /// - `ProviderUnavailable` when no background remover can be loaded
    /// - `ProviderFailure` when the remover fails
    #[instrument(
        skip(self, image, params),
        fields(
            dimensions = %format!("{}x{}", image.width(), image.height()),
            bg_color = ?params.bg_color,
            edge_blur = ?params.edge_blur_radius
        )
    )]
    pub fn remove_background(
        &self,
        image: &ImageArtifact,
        params: &RemoveBackgroundParams,
    ) -> Result<Arc<ImageArtifact>> {
        // An empty color keeps transparency, same as an absent one
        let color = params
            .bg_color
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(codec::parse_hex_color)
            .transpose()?;
        let blur = params.edge_blur_radius.unwrap_or(self.default_edge_blur);

        let input = codec::downscale_to_fit(image, self.max_image_size);
        let fingerprint = OperationFingerprint::for_artifact(
            OperationKind::RemoveBackground,
            &input,
            vec![params.bg_color.as_deref().into(), blur.into()],
        )?;

        self.removal_cache.get_or_try_compute(&fingerprint, || {
            let start = Instant::now();
            let remover = self.providers.background_remover()?;
            let foreground = remover.call(|r| r.remove(&input))?;
            check_same_size(&foreground, &input)?;

            let refined = blur_alpha(&foreground.to_rgba8(), blur);
            let output = match color {
                Some(rgb) => {
                    let background = RgbImage::from_pixel(refined.width(), refined.height(), Rgb(rgb));
                    ImageArtifact::from_rgb(composite_over(&refined, &background))
                },
                None => ImageArtifact::from_rgba(refined),
            };
            info!(
                fingerprint = %fingerprint,
                elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Background removal computed"
            );
            Ok(output)
        })
    }

    /// Replace the background with one synthesized from `prompt`.
    ///
    /// The requested size drives generation only; the result always has the
    /// foreground's dimensions.
    ///
    /// # Errors
    /// - `InvalidParameter` for an empty prompt or a zero dimension
    /// - `ProviderUnavailable` when the generative model is absent or cannot
    ///   load, raised before the background remover runs
    /// - `ProviderFailure` when either provider fails
    #[instrument(
        skip(self, image, params),
        fields(
            dimensions = %format!("{}x{}", image.width(), image.height()),
            prompt = %params.prompt,
            width = ?params.width,
            height = ?params.height
        )
    )]
    pub fn swap_background(
        &self,
        image: &ImageArtifact,
        params: &SwapBackgroundParams,
    ) -> Result<Arc<ImageArtifact>> {
        if params.prompt.trim().is_empty() {
            return Err(AutoRenderError::invalid_parameter("Prompt must not be empty"));
        }
        if params.width == Some(0) {
            return Err(AutoRenderError::parameter_value_error("width", 0, ">= 1"));
        }
        if params.height == Some(0) {
            return Err(AutoRenderError::parameter_value_error("height", 0, ">= 1"));
        }

        let generator = self.providers.generative_model()?;

        let input = codec::downscale_to_fit(image, self.swap_max_image_size);
        let width = params.width.unwrap_or_else(|| input.width());
        let height = params.height.unwrap_or_else(|| input.height());
        let fingerprint = OperationFingerprint::for_artifact(
            OperationKind::SwapBackground,
            &input,
            vec![params.prompt.as_str().into(), width.into(), height.into()],
        )?;

        self.swap_cache.get_or_try_compute(&fingerprint, || {
            let start = Instant::now();
            let remover = self.providers.background_remover()?;
            let foreground = remover.call(|r| r.remove(&input))?;
            let generated = generator.call(|g| g.generate(&params.prompt, width, height))?;

            let foreground = foreground.to_rgba8();
            let (fg_w, fg_h) = foreground.dimensions();
            let mut background = generated.to_rgb8();
            if background.dimensions() != (fg_w, fg_h) {
                debug!(
                    generated = %format!("{}x{}", background.width(), background.height()),
                    target = %format!("{fg_w}x{fg_h}"),
                    "Resizing generated background to foreground"
                );
                background =
                    image::imageops::resize(&background, fg_w, fg_h, FilterType::CatmullRom);
            }

            let output = ImageArtifact::from_rgb(composite_over(&foreground, &background));
            info!(
                fingerprint = %fingerprint,
                elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Background swap computed"
            );
            Ok(output)
        })
    }

    #[must_use]
    pub fn removal_cache_stats(&self) -> CacheStats {
        self.removal_cache.stats()
    }

    #[must_use]
    pub fn swap_cache_stats(&self) -> CacheStats {
        self.swap_cache.stats()
    }

    /// Drop every cached result
    pub fn clear_caches(&self) {
        self.removal_cache.clear();
        self.swap_cache.clear();
    }

    #[must_use]
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }
}

fn check_same_size(output: &ImageArtifact, input: &ImageArtifact) -> Result<()> {
    if output.dimensions() == input.dimensions() {
        return Ok(());
    }
    Err(AutoRenderError::provider_failure(
        crate::providers::ProviderKind::BackgroundRemover,
        format!(
            "Foreground is {}x{} but input is {}x{}",
            output.width(),
            output.height(),
            input.width(),
            input.height()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::providers::mock::{MockBackgroundRemover, MockGenerativeModel};
    use image::Rgba;

    fn photo(width: u32, height: u32) -> ImageArtifact {
        ImageArtifact::from_rgb(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 2) as u8, (y * 2) as u8, 200])
        }))
    }

    fn engine(registry: ProviderRegistry) -> PipelineEngine {
        PipelineEngine::new(Arc::new(registry), &ServiceConfig::default())
    }

    #[test]
    fn test_composite_extremes() {
        let fg = RgbaImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgba([10, 20, 30, 255])
            } else {
                Rgba([10, 20, 30, 0])
            }
        });
        let bg = RgbImage::from_pixel(2, 1, Rgb([255, 0, 0]));
        let out = composite_over(&fg, &bg);
        assert_eq!(out.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_composite_half_alpha_rounds() {
        let fg = RgbaImage::from_pixel(1, 1, Rgba([0, 255, 100, 128]));
        let bg = RgbImage::from_pixel(1, 1, Rgb([255, 0, 100]));
        let out = composite_over(&fg, &bg);
        // (0*128 + 255*127 + 127) / 255 = 127, (255*128 + 127) / 255 = 128
        assert_eq!(out.get_pixel(0, 0), &Rgb([127, 128, 100]));
    }

    #[test]
    fn test_blur_alpha_touches_only_alpha() {
        let fg = RgbaImage::from_fn(9, 9, |x, _| {
            Rgba([50, 60, 70, if x < 4 { 255 } else { 0 }])
        });
        let out = blur_alpha(&fg, 2);
        for (x, y, p) in out.enumerate_pixels() {
            assert_eq!(&p.0[..3], &[50, 60, 70], "rgb changed at {x},{y}");
        }
        let edge = out.get_pixel(4, 4)[3];
        assert!(edge > 0 && edge < 255, "edge alpha {edge} should be softened");
        assert_eq!(blur_alpha(&fg, 0), fg);
    }

    #[test]
    fn test_red_border_scenario() {
        let engine = engine(
            ProviderRegistry::builder()
                .background_remover(MockBackgroundRemover::new())
                .build(),
        );
        let input = ImageArtifact::from_rgb(RgbImage::from_pixel(100, 100, Rgb([0, 0, 255])));
        let params = RemoveBackgroundParams::transparent()
            .with_color("#FF0000")
            .with_edge_blur(0);

        let out = engine.remove_background(&input, &params).unwrap();
        assert_eq!(out.dimensions(), (100, 100));
        assert!(!out.has_alpha());
        let rgb = out.to_rgb8();
        for i in 0..100 {
            assert_eq!(rgb.get_pixel(i, 0), &Rgb([255, 0, 0]));
            assert_eq!(rgb.get_pixel(0, i), &Rgb([255, 0, 0]));
            assert_eq!(rgb.get_pixel(i, 99), &Rgb([255, 0, 0]));
            assert_eq!(rgb.get_pixel(99, i), &Rgb([255, 0, 0]));
        }
        assert_eq!(rgb.get_pixel(50, 50), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_invalid_color_skips_provider() {
        let remover = MockBackgroundRemover::new();
        let calls = remover.calls();
        let engine = engine(ProviderRegistry::builder().background_remover(remover).build());

        let err = engine
            .remove_background(&photo(10, 10), &RemoveBackgroundParams::transparent().with_color("#12345"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_transparent_output_keeps_alpha() {
        let engine = engine(
            ProviderRegistry::builder()
                .background_remover(MockBackgroundRemover::new())
                .build(),
        );
        let out = engine
            .remove_background(&photo(20, 20), &RemoveBackgroundParams::transparent())
            .unwrap();
        assert!(out.has_alpha());
        assert_eq!(out.to_rgba8().get_pixel(0, 0)[3], 0);
        assert_eq!(out.to_rgba8().get_pixel(10, 10)[3], 255);
    }

    #[test]
    fn test_large_input_is_downscaled_before_removal() {
        let config = ServiceConfig::builder().max_image_size(64).build().unwrap();
        let engine = PipelineEngine::new(
            Arc::new(
                ProviderRegistry::builder()
                    .background_remover(MockBackgroundRemover::new())
                    .build(),
            ),
            &config,
        );
        let out = engine
            .remove_background(&photo(128, 32), &RemoveBackgroundParams::transparent())
            .unwrap();
        assert_eq!(out.dimensions(), (64, 16));
    }

    #[test]
    fn test_swap_validates_before_provider_lookup() {
        let engine = engine(ProviderRegistry::builder().build());
        let err = engine
            .swap_background(&photo(10, 10), &SwapBackgroundParams::new("   "))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let err = engine
            .swap_background(&photo(10, 10), &SwapBackgroundParams::new("beach").with_size(0, 10))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_swap_without_generator_never_calls_remover() {
        let remover = MockBackgroundRemover::new();
        let calls = remover.calls();
        let engine = engine(ProviderRegistry::builder().background_remover(remover).build());

        let err = engine
            .swap_background(&photo(10, 10), &SwapBackgroundParams::new("beach"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
        assert!(err.kind().is_retryable());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_swap_output_matches_foreground_size() {
        let engine = engine(
            ProviderRegistry::builder()
                .background_remover(MockBackgroundRemover::new())
                .generative_model(MockGenerativeModel::new().with_native_size(7, 3))
                .build(),
        );
        let out = engine
            .swap_background(&photo(40, 30), &SwapBackgroundParams::new("forest").with_size(512, 512))
            .unwrap();
        assert_eq!(out.dimensions(), (40, 30));
        assert!(!out.has_alpha());
    }

    #[test]
    fn test_disabled_cache_recomputes() {
        let remover = MockBackgroundRemover::new();
        let calls = remover.calls();
        let config = ServiceConfig::builder().disable_cache(true).build().unwrap();
        let engine = PipelineEngine::new(
            Arc::new(ProviderRegistry::builder().background_remover(remover).build()),
            &config,
        );
        let params = RemoveBackgroundParams::transparent();
        engine.remove_background(&photo(8, 8), &params).unwrap();
        engine.remove_background(&photo(8, 8), &params).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(engine.removal_cache_stats().entries, 0);
    }
}
