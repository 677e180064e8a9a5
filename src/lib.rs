#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # AutoRender
//!
//! Image pipelines over pluggable inference providers: background removal,
//! generative background swap, and detection-driven cropping.
//!
//! ## Features
//!
//! - **Memoized pipelines**: background removal and background swap results are
//!   cached per operation fingerprint in bounded LRU caches, with concurrent
//!   identical requests computed once
//! - **Detection orchestration**: object crop, detection listing, face crop and
//!   smart crop
//! - **Pluggable providers**: object detector, background remover, generative
//!   model, smart cropper and face locator behind traits, loaded lazily and
//!   serialized per provider
//! - **ONNX background remover**: segmentation model via ONNX Runtime (`onnx` feature)
//! - **CLI**: `autorender` binary (`cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use autorender::{
//!     providers::{mock::MockBackgroundRemover, ProviderRegistry},
//!     AutoRenderService, RemoveBackgroundParams, ServiceConfig,
//! };
//!
//! # async fn example(photo: autorender::ImageArtifact) -> anyhow::Result<()> {
//! let registry = ProviderRegistry::builder()
//!     .background_remover(MockBackgroundRemover::new())
//!     .build();
//! let service = AutoRenderService::new(registry, ServiceConfig::default())?;
//!
//! let params = RemoveBackgroundParams::transparent().with_color("#00FF00");
//! let result = service.remove_background(photo, params).await?;
//! println!("{}x{}", result.width(), result.height());
//! # Ok(())
//! # }
//! ```

pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod config;
pub mod detection;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod providers;
pub mod service;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

pub use cache::{ArtifactCache, CacheStats};
pub use codec::OutputFormat;
pub use config::ServiceConfig;
pub use detection::DetectionOrchestrator;
pub use error::{AutoRenderError, ErrorKind, Result};
pub use fingerprint::{OperationFingerprint, OperationKind};
pub use pipeline::{PipelineEngine, RemoveBackgroundParams, SwapBackgroundParams};
pub use providers::{
    BackgroundRemover, FaceLocator, GenerativeModel, ObjectDetector, ProviderKind,
    ProviderRegistry, SmartCropper,
};
pub use service::{AutoRenderService, HealthStatus, ServiceStatus};
pub use types::{BoundingBox, CropRect, Detection, DetectionResult, ImageArtifact};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};
