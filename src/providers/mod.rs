//! Capability providers consumed by the pipeline engine and detection orchestrator
//!
//! Every provider is a blocking inference call on state that is not safe to
//! share between threads. A [`ProviderHandle`] owns one instance behind a
//! mutex, so calls to the same provider run one at a time while different
//! providers proceed in parallel.
//!
//! Providers may load eagerly or on first use through [`LazyProvider`], and
//! any of them may be absent from the [`ProviderRegistry`]. Callers see an
//! absent or unloadable provider as `ProviderUnavailable`.

pub mod mock;
pub mod smartcrop;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use self::smartcrop::EdgeSmartCropper;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackgroundRemover;

use crate::{
    error::{AutoRenderError, Result},
    types::{BoundingBox, CropRect, Detection, ImageArtifact},
};
use instant::Instant;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Identifies a provider in errors, logs and status reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    ObjectDetector,
    BackgroundRemover,
    GenerativeModel,
    SmartCropper,
    FaceLocator,
}

impl ProviderKind {
    pub const ALL: [Self; 5] = [
        Self::ObjectDetector,
        Self::BackgroundRemover,
        Self::GenerativeModel,
        Self::SmartCropper,
        Self::FaceLocator,
    ];
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ObjectDetector => write!(f, "object-detector"),
            Self::BackgroundRemover => write!(f, "background-remover"),
            Self::GenerativeModel => write!(f, "generative-model"),
            Self::SmartCropper => write!(f, "smart-cropper"),
            Self::FaceLocator => write!(f, "face-locator"),
        }
    }
}

/// Open-vocabulary object detection
pub trait ObjectDetector: Send {
    /// Detect objects matching any of `labels` with confidence at or above
    /// `confidence_threshold`, in the detector's own ranking order
    ///
    /// # Errors
    /// - Model inference failures
    fn detect(
        &mut self,
        image: &ImageArtifact,
        labels: &[String],
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>>;
}

/// Foreground segmentation
pub trait BackgroundRemover: Send {
    /// Return the input with an alpha channel that masks out the background.
    /// The output has the same dimensions as the input.
    ///
    /// # Errors
    /// - Model inference failures
    fn remove(&mut self, image: &ImageArtifact) -> Result<ImageArtifact>;
}

/// Text-to-image background synthesis
pub trait GenerativeModel: Send {
    /// Generate an image for `prompt`. The result may not be exactly
    /// `width` x `height`.
    ///
    /// # Errors
    /// - Model inference failures
    fn generate(&mut self, prompt: &str, width: u32, height: u32) -> Result<ImageArtifact>;
}

/// Salient-region crop suggestion
pub trait SmartCropper: Send {
    /// Suggest a crop rectangle with the aspect ratio of `width` x `height`
    ///
    /// # Errors
    /// - Analysis failures
    fn suggest(&mut self, image: &ImageArtifact, width: u32, height: u32) -> Result<CropRect>;
}

/// Face detection
pub trait FaceLocator: Send {
    /// Locate faces, most prominent first
    ///
    /// # Errors
    /// - Model inference failures
    fn locate(&mut self, image: &ImageArtifact) -> Result<Vec<BoundingBox>>;
}

/// Shared, serialized access to one provider instance
pub struct ProviderHandle<T: ?Sized> {
    kind: ProviderKind,
    inner: Arc<Mutex<Box<T>>>,
}

impl<T: ?Sized> Clone for ProviderHandle<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for ProviderHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> ProviderHandle<T> {
    #[must_use]
    pub fn new(kind: ProviderKind, provider: Box<T>) -> Self {
        Self {
            kind,
            inner: Arc::new(Mutex::new(provider)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Run `f` with exclusive access to the provider.
    ///
    /// Errors raised by `f` are attributed to this provider.
    ///
    /// # Errors
    /// - The provider lock was poisoned by a panic in an earlier call
    /// - Whatever `f` returns, as `ProviderFailure` unless already typed
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> Result<R>,
    {
        let mut provider = self.inner.lock().map_err(|_| {
            AutoRenderError::provider_failure(
                self.kind,
                "provider state poisoned by an earlier panic",
            )
        })?;

        let start = Instant::now();
        let result = f(provider.as_mut()).map_err(|e| e.attribute_to(self.kind));
        debug!(
            provider = %self.kind,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            ok = result.is_ok(),
            "Provider call finished"
        );
        result
    }
}

type Loader<T> = Box<dyn Fn() -> Result<Box<T>> + Send + Sync>;

/// A provider that is constructed once, on first use
///
/// Concurrent first uses block on a single load. A failed load is not
/// remembered, so the next use tries again.
pub struct LazyProvider<T: ?Sized> {
    kind: ProviderKind,
    cell: OnceCell<ProviderHandle<T>>,
    loader: Option<Loader<T>>,
}

impl<T: ?Sized> std::fmt::Debug for LazyProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyProvider")
            .field("kind", &self.kind)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> LazyProvider<T> {
    /// Defer construction to `loader`
    pub fn new<F>(kind: ProviderKind, loader: F) -> Self
    where
        F: Fn() -> Result<Box<T>> + Send + Sync + 'static,
    {
        Self {
            kind,
            cell: OnceCell::new(),
            loader: Some(Box::new(loader)),
        }
    }

    /// Wrap an already constructed provider
    #[must_use]
    pub fn loaded(kind: ProviderKind, provider: Box<T>) -> Self {
        Self {
            kind,
            cell: OnceCell::with_value(ProviderHandle::new(kind, provider)),
            loader: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// The provider handle, loading it first if needed
    ///
    /// # Errors
    /// - `ProviderUnavailable` when the loader fails
    pub fn get(&self) -> Result<ProviderHandle<T>> {
        self.cell
            .get_or_try_init(|| {
                let loader = self.loader.as_ref().ok_or_else(|| {
                    AutoRenderError::provider_unavailable(self.kind, "no loader configured")
                })?;

                info!(provider = %self.kind, "Loading provider");
                let start = Instant::now();
                let provider = loader().map_err(|e| {
                    warn!(provider = %self.kind, error = %e, "Provider failed to load");
                    AutoRenderError::provider_unavailable(self.kind, e.to_string())
                })?;
                info!(
                    provider = %self.kind,
                    load_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Provider loaded"
                );
                Ok(ProviderHandle::new(self.kind, provider))
            })
            .cloned()
    }
}

/// Load state of one provider slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    pub provider: ProviderKind,
    /// A provider (or its loader) is registered
    pub configured: bool,
    /// The provider is constructed and ready
    pub loaded: bool,
}

/// Load state of every provider slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub providers: Vec<ProviderState>,
}

impl ProviderStatus {
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderState> {
        self.providers.iter().find(|p| p.provider == kind)
    }

    #[must_use]
    pub fn is_loaded(&self, kind: ProviderKind) -> bool {
        self.get(kind).is_some_and(|p| p.loaded)
    }

    /// Every configured provider is loaded
    #[must_use]
    pub fn all_configured_loaded(&self) -> bool {
        self.providers.iter().all(|p| !p.configured || p.loaded)
    }
}

/// The set of providers available to one service instance
///
/// Built once at startup and shared by handle. Every slot is optional.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    object_detector: Option<LazyProvider<dyn ObjectDetector>>,
    background_remover: Option<LazyProvider<dyn BackgroundRemover>>,
    generative_model: Option<LazyProvider<dyn GenerativeModel>>,
    smart_cropper: Option<LazyProvider<dyn SmartCropper>>,
    face_locator: Option<LazyProvider<dyn FaceLocator>>,
}

fn resolve<T: ?Sized>(
    slot: Option<&LazyProvider<T>>,
    kind: ProviderKind,
) -> Result<ProviderHandle<T>> {
    slot.ok_or_else(|| AutoRenderError::provider_unavailable(kind, "provider not configured"))?
        .get()
}

fn state_of<T: ?Sized>(slot: Option<&LazyProvider<T>>, kind: ProviderKind) -> ProviderState {
    ProviderState {
        provider: kind,
        configured: slot.is_some(),
        loaded: slot.is_some_and(LazyProvider::is_loaded),
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// # Errors
    /// - `ProviderUnavailable` when absent or failing to load
    pub fn object_detector(&self) -> Result<ProviderHandle<dyn ObjectDetector>> {
        resolve(self.object_detector.as_ref(), ProviderKind::ObjectDetector)
    }

    /// # Errors
    /// - `ProviderUnavailable` when absent or failing to load
    pub fn background_remover(&self) -> Result<ProviderHandle<dyn BackgroundRemover>> {
        resolve(
            self.background_remover.as_ref(),
            ProviderKind::BackgroundRemover,
        )
    }

    /// # Errors
    /// - `ProviderUnavailable` when absent or failing to load
    pub fn generative_model(&self) -> Result<ProviderHandle<dyn GenerativeModel>> {
        resolve(self.generative_model.as_ref(), ProviderKind::GenerativeModel)
    }

    /// # Errors
    /// - `ProviderUnavailable` when absent or failing to load
    pub fn smart_cropper(&self) -> Result<ProviderHandle<dyn SmartCropper>> {
        resolve(self.smart_cropper.as_ref(), ProviderKind::SmartCropper)
    }

    /// # Errors
    /// - `ProviderUnavailable` when absent or failing to load
    pub fn face_locator(&self) -> Result<ProviderHandle<dyn FaceLocator>> {
        resolve(self.face_locator.as_ref(), ProviderKind::FaceLocator)
    }

    /// Whether a provider of this kind is registered (loaded or not)
    #[must_use]
    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.state(kind).configured
    }

    fn state(&self, kind: ProviderKind) -> ProviderState {
        match kind {
            ProviderKind::ObjectDetector => state_of(self.object_detector.as_ref(), kind),
            ProviderKind::BackgroundRemover => state_of(self.background_remover.as_ref(), kind),
            ProviderKind::GenerativeModel => state_of(self.generative_model.as_ref(), kind),
            ProviderKind::SmartCropper => state_of(self.smart_cropper.as_ref(), kind),
            ProviderKind::FaceLocator => state_of(self.face_locator.as_ref(), kind),
        }
    }

    #[must_use]
    pub fn status(&self) -> ProviderStatus {
        ProviderStatus {
            providers: ProviderKind::ALL.iter().map(|k| self.state(*k)).collect(),
        }
    }

    /// Load every configured provider now instead of on first use.
    ///
    /// Load failures are logged and reflected in the returned status; they
    /// do not stop the remaining providers from loading.
    pub fn warm_up(&self) -> ProviderStatus {
        let start = Instant::now();
        for kind in ProviderKind::ALL {
            if !self.is_configured(kind) {
                continue;
            }
            let loaded = match kind {
                ProviderKind::ObjectDetector => self.object_detector().map(drop),
                ProviderKind::BackgroundRemover => self.background_remover().map(drop),
                ProviderKind::GenerativeModel => self.generative_model().map(drop),
                ProviderKind::SmartCropper => self.smart_cropper().map(drop),
                ProviderKind::FaceLocator => self.face_locator().map(drop),
            };
            if let Err(e) = loaded {
                warn!(provider = %kind, error = %e, "Warm-up could not load provider");
            }
        }
        let status = self.status();
        info!(
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            all_loaded = status.all_configured_loaded(),
            "Provider warm-up finished"
        );
        status
    }
}

/// Builder for `ProviderRegistry`
///
/// Plain setters register an already constructed provider; `lazy_*` setters
/// register a loader that runs on first use.
#[derive(Debug, Default)]
pub struct ProviderRegistryBuilder {
    registry: ProviderRegistry,
}

impl ProviderRegistryBuilder {
    #[must_use]
    pub fn object_detector<P: ObjectDetector + 'static>(mut self, provider: P) -> Self {
        self.registry.object_detector = Some(LazyProvider::loaded(
            ProviderKind::ObjectDetector,
            Box::new(provider),
        ));
        self
    }

    #[must_use]
    pub fn lazy_object_detector<F>(mut self, loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn ObjectDetector>> + Send + Sync + 'static,
    {
        self.registry.object_detector = Some(LazyProvider::new(ProviderKind::ObjectDetector, loader));
        self
    }

    #[must_use]
    pub fn background_remover<P: BackgroundRemover + 'static>(mut self, provider: P) -> Self {
        self.registry.background_remover = Some(LazyProvider::loaded(
            ProviderKind::BackgroundRemover,
            Box::new(provider),
        ));
        self
    }

    #[must_use]
    pub fn lazy_background_remover<F>(mut self, loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn BackgroundRemover>> + Send + Sync + 'static,
    {
        self.registry.background_remover =
            Some(LazyProvider::new(ProviderKind::BackgroundRemover, loader));
        self
    }

    #[must_use]
    pub fn generative_model<P: GenerativeModel + 'static>(mut self, provider: P) -> Self {
        self.registry.generative_model = Some(LazyProvider::loaded(
            ProviderKind::GenerativeModel,
            Box::new(provider),
        ));
        self
    }

    #[must_use]
    pub fn lazy_generative_model<F>(mut self, loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn GenerativeModel>> + Send + Sync + 'static,
    {
        self.registry.generative_model =
            Some(LazyProvider::new(ProviderKind::GenerativeModel, loader));
        self
    }

    #[must_use]
    pub fn smart_cropper<P: SmartCropper + 'static>(mut self, provider: P) -> Self {
        self.registry.smart_cropper = Some(LazyProvider::loaded(
            ProviderKind::SmartCropper,
            Box::new(provider),
        ));
        self
    }

    #[must_use]
    pub fn lazy_smart_cropper<F>(mut self, loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn SmartCropper>> + Send + Sync + 'static,
    {
        self.registry.smart_cropper = Some(LazyProvider::new(ProviderKind::SmartCropper, loader));
        self
    }

    #[must_use]
    pub fn face_locator<P: FaceLocator + 'static>(mut self, provider: P) -> Self {
        self.registry.face_locator = Some(LazyProvider::loaded(
            ProviderKind::FaceLocator,
            Box::new(provider),
        ));
        self
    }

    #[must_use]
    pub fn lazy_face_locator<F>(mut self, loader: F) -> Self
    where
        F: Fn() -> Result<Box<dyn FaceLocator>> + Send + Sync + 'static,
    {
        self.registry.face_locator = Some(LazyProvider::new(ProviderKind::FaceLocator, loader));
        self
    }

    #[must_use]
    pub fn build(self) -> ProviderRegistry {
        self.registry
    }
}
