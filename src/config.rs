//! Service configuration

use crate::error::{AutoRenderError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Environment variable names read by [`ServiceConfig::from_env`]
pub mod env {
    pub const REMOVAL_CACHE_SIZE: &str = "AUTORENDER_REMOVAL_CACHE_SIZE";
    pub const SWAP_CACHE_SIZE: &str = "AUTORENDER_SWAP_CACHE_SIZE";
    pub const DETECTION_CONFIDENCE: &str = "AUTORENDER_DETECTION_CONFIDENCE";
    pub const MAX_IMAGE_SIZE: &str = "AUTORENDER_MAX_IMAGE_SIZE";
    pub const SWAP_MAX_IMAGE_SIZE: &str = "AUTORENDER_SWAP_MAX_IMAGE_SIZE";
    pub const DISABLE_CACHE: &str = "AUTORENDER_DISABLE_CACHE";
}

/// Configuration for the pipeline engine and detection orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// LRU capacity for remove/replace background results
    pub removal_cache_capacity: usize,

    /// LRU capacity for generative swap results (artifacts are larger)
    pub swap_cache_capacity: usize,

    /// Minimum detector confidence, in [0, 1]
    pub detection_confidence: f32,

    /// Longest edge before background removal
    pub max_image_size: u32,

    /// Longest edge before a generative swap
    pub swap_max_image_size: u32,

    /// Face-crop padding in pixels when the request gives none
    pub default_face_padding: u32,

    /// Alpha blur radius when the request gives none
    pub default_edge_blur: u32,

    /// Bypass both result caches
    pub disable_cache: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            removal_cache_capacity: 32,
            swap_cache_capacity: 16,
            detection_confidence: 0.5,
            max_image_size: 1024,
            swap_max_image_size: 768,
            default_face_padding: 50,
            default_edge_blur: 0,
            disable_cache: false,
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use autorender::ServiceConfig;
    ///
    /// let config = ServiceConfig::builder()
    ///     .swap_cache_capacity(4)
    ///     .detection_confidence(0.35)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.swap_cache_capacity, 4);
    /// ```
    #[must_use]
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Defaults overlaid with `AUTORENDER_*` environment variables
    ///
    /// # Errors
    /// - A variable is set but does not parse
    /// - The resulting configuration fails validation
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by the names in [`env`]
    ///
    /// # Errors
    /// - A value is present but does not parse
    /// - The resulting configuration fails validation
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, env::REMOVAL_CACHE_SIZE)? {
            config.removal_cache_capacity = v;
        }
        if let Some(v) = parse_var(&lookup, env::SWAP_CACHE_SIZE)? {
            config.swap_cache_capacity = v;
        }
        if let Some(v) = parse_var(&lookup, env::DETECTION_CONFIDENCE)? {
            config.detection_confidence = v;
        }
        if let Some(v) = parse_var(&lookup, env::MAX_IMAGE_SIZE)? {
            config.max_image_size = v;
        }
        if let Some(v) = parse_var(&lookup, env::SWAP_MAX_IMAGE_SIZE)? {
            config.swap_max_image_size = v;
        }
        if let Some(raw) = lookup(env::DISABLE_CACHE) {
            config.disable_cache = parse_flag(env::DISABLE_CACHE, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Zero cache capacity
    /// - Confidence outside [0, 1]
    /// - Zero maximum image size
    pub fn validate(&self) -> Result<()> {
        if self.removal_cache_capacity == 0 {
            return Err(AutoRenderError::parameter_value_error(
                "removal cache capacity",
                self.removal_cache_capacity,
                ">= 1",
            ));
        }
        if self.swap_cache_capacity == 0 {
            return Err(AutoRenderError::parameter_value_error(
                "swap cache capacity",
                self.swap_cache_capacity,
                ">= 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.detection_confidence) {
            return Err(AutoRenderError::parameter_value_error(
                "detection confidence",
                self.detection_confidence,
                "0.0-1.0",
            ));
        }
        if self.max_image_size == 0 {
            return Err(AutoRenderError::parameter_value_error(
                "max image size",
                self.max_image_size,
                ">= 1",
            ));
        }
        if self.swap_max_image_size == 0 {
            return Err(AutoRenderError::parameter_value_error(
                "swap max image size",
                self.swap_max_image_size,
                ">= 1",
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim().parse::<T>().map(Some).map_err(|_| {
        AutoRenderError::invalid_parameter(format!("Cannot parse {}='{}'", name, raw))
    })
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(AutoRenderError::invalid_parameter(format!(
            "Cannot parse {}='{}' as a boolean",
            name, raw
        ))),
    }
}

/// Builder for `ServiceConfig`
#[derive(Debug, Default)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    #[must_use]
    pub fn removal_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.removal_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn swap_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.swap_cache_capacity = capacity;
        self
    }

    /// Set the detector confidence threshold
    #[must_use]
    pub fn detection_confidence(mut self, confidence: f32) -> Self {
        self.config.detection_confidence = confidence;
        self
    }

    #[must_use]
    pub fn max_image_size(mut self, size: u32) -> Self {
        self.config.max_image_size = size;
        self
    }

    #[must_use]
    pub fn swap_max_image_size(mut self, size: u32) -> Self {
        self.config.swap_max_image_size = size;
        self
    }

    /// Set the face-crop padding used when a request omits it
    #[must_use]
    pub fn default_face_padding(mut self, padding: u32) -> Self {
        self.config.default_face_padding = padding;
        self
    }

    /// Set the edge blur radius used when a request omits it
    #[must_use]
    pub fn default_edge_blur(mut self, radius: u32) -> Self {
        self.config.default_edge_blur = radius;
        self
    }

    /// Disable both result caches
    #[must_use]
    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.config.disable_cache = disable;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any check in [`ServiceConfig::validate`]
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
