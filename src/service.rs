//! Async service façade
//!
//! Provider calls block for their full duration, so every operation is moved
//! onto tokio's blocking pool. The façade is cheap to clone and shares one
//! engine, orchestrator and provider registry.

use crate::{
    cache::CacheStats,
    config::ServiceConfig,
    detection::DetectionOrchestrator,
    error::{AutoRenderError, Result},
    pipeline::{PipelineEngine, RemoveBackgroundParams, SwapBackgroundParams},
    providers::{ProviderRegistry, ProviderStatus},
    types::{DetectionResult, ImageArtifact},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Liveness record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub service: String,
    pub version: String,
    pub status: String,
}

/// Provider load state and cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub providers: ProviderStatus,
    pub removal_cache: CacheStats,
    pub swap_cache: CacheStats,
}

#[derive(Debug)]
struct Inner {
    config: ServiceConfig,
    registry: Arc<ProviderRegistry>,
    pipeline: PipelineEngine,
    detection: DetectionOrchestrator,
}

/// Entry point for the boundary layer
#[derive(Debug, Clone)]
pub struct AutoRenderService {
    inner: Arc<Inner>,
}

impl AutoRenderService {
    /// Wire the engine and orchestrator to one shared registry
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(registry: ProviderRegistry, config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(registry);
        let pipeline = PipelineEngine::new(Arc::clone(&registry), &config);
        let detection = DetectionOrchestrator::new(Arc::clone(&registry), &config);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry,
                pipeline,
                detection,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn pipeline(&self) -> &PipelineEngine {
        &self.inner.pipeline
    }

    #[must_use]
    pub fn detection(&self) -> &DetectionOrchestrator {
        &self.inner.detection
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| AutoRenderError::internal(format!("Blocking task failed: {e}")))?
    }

    /// See [`PipelineEngine::remove_background`]
    ///
    /// # Errors
    /// - As the pipeline operation
    pub async fn remove_background(
        &self,
        image: ImageArtifact,
        params: RemoveBackgroundParams,
    ) -> Result<Arc<ImageArtifact>> {
        self.run_blocking(move |inner| inner.pipeline.remove_background(&image, &params))
            .await
    }

    /// See [`PipelineEngine::swap_background`]
    ///
    /// # Errors
    /// - As the pipeline operation
    pub async fn swap_background(
        &self,
        image: ImageArtifact,
        params: SwapBackgroundParams,
    ) -> Result<Arc<ImageArtifact>> {
        self.run_blocking(move |inner| inner.pipeline.swap_background(&image, &params))
            .await
    }

    /// See [`DetectionOrchestrator::object_crop`]
    ///
    /// # Errors
    /// - As the detection operation
    pub async fn object_crop(&self, image: ImageArtifact, prompt: String) -> Result<ImageArtifact> {
        self.run_blocking(move |inner| inner.detection.object_crop(&image, &prompt))
            .await
    }

    /// See [`DetectionOrchestrator::detection_info`]
    ///
    /// # Errors
    /// - As the detection operation
    pub async fn detection_info(
        &self,
        image: ImageArtifact,
        prompt: String,
    ) -> Result<DetectionResult> {
        self.run_blocking(move |inner| inner.detection.detection_info(&image, &prompt))
            .await
    }

    /// See [`DetectionOrchestrator::face_crop`]
    ///
    /// # Errors
    /// - As the detection operation
    pub async fn face_crop(&self, image: ImageArtifact, padding: Option<u32>) -> Result<ImageArtifact> {
        self.run_blocking(move |inner| inner.detection.face_crop(&image, padding))
            .await
    }

    /// See [`DetectionOrchestrator::smart_crop`]
    ///
    /// # Errors
    /// - As the detection operation
    pub async fn smart_crop(
        &self,
        image: ImageArtifact,
        width: u32,
        height: u32,
    ) -> Result<ImageArtifact> {
        self.run_blocking(move |inner| inner.detection.smart_crop(&image, width, height))
            .await
    }

    /// Load every configured provider now
    ///
    /// # Errors
    /// - The blocking task could not complete
    pub async fn warm_up(&self) -> Result<ProviderStatus> {
        self.run_blocking(|inner| Ok(inner.registry.warm_up())).await
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            providers: self.inner.registry.status(),
            removal_cache: self.inner.pipeline.removal_cache_stats(),
            swap_cache: self.inner.pipeline.swap_cache_stats(),
        }
    }

    #[must_use]
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: "healthy".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::providers::mock::{MockBackgroundRemover, MockGenerativeModel};
    use crate::providers::ProviderKind;
    use image::{Rgb, RgbImage};

    fn photo() -> ImageArtifact {
        ImageArtifact::from_rgb(RgbImage::from_fn(32, 24, |x, y| {
            Rgb([x as u8 * 4, y as u8 * 4, 90])
        }))
    }

    #[tokio::test]
    async fn test_remove_background_async() {
        let service = AutoRenderService::new(
            ProviderRegistry::builder()
                .background_remover(MockBackgroundRemover::new())
                .build(),
            ServiceConfig::default(),
        )
        .unwrap();

        let out = service
            .remove_background(photo(), RemoveBackgroundParams::transparent())
            .await
            .unwrap();
        assert_eq!(out.dimensions(), (32, 24));
        assert_eq!(service.status().removal_cache.entries, 1);
    }

    #[tokio::test]
    async fn test_swap_unavailable_async() {
        let service =
            AutoRenderService::new(ProviderRegistry::builder().build(), ServiceConfig::default())
                .unwrap();
        let err = service
            .swap_background(photo(), SwapBackgroundParams::new("sunset"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    }

    #[tokio::test]
    async fn test_warm_up_and_status() {
        let service = AutoRenderService::new(
            ProviderRegistry::builder()
                .lazy_generative_model(|| {
                    Ok(Box::new(MockGenerativeModel::new()) as Box<dyn crate::providers::GenerativeModel>)
                })
                .build(),
            ServiceConfig::default(),
        )
        .unwrap();

        assert!(!service.status().providers.is_loaded(ProviderKind::GenerativeModel));
        let status = service.warm_up().await.unwrap();
        assert!(status.is_loaded(ProviderKind::GenerativeModel));
    }

    #[test]
    fn test_health() {
        let service =
            AutoRenderService::new(ProviderRegistry::builder().build(), ServiceConfig::default())
                .unwrap();
        let health = service.health();
        assert_eq!(health.service, "autorender");
        assert_eq!(health.status, "healthy");
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = ServiceConfig::default();
        config.removal_cache_capacity = 0;
        assert!(AutoRenderService::new(ProviderRegistry::builder().build(), config).is_err());
    }
}
