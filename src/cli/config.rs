//! Conversion from CLI arguments to service configuration and providers

use crate::cli::main_impl::Cli;
use crate::{
    config::ServiceConfig,
    providers::{
        mock::{
            MockBackgroundRemover, MockFaceLocator, MockGenerativeModel, MockObjectDetector,
        },
        EdgeSmartCropper, ProviderRegistry,
    },
    types::{BoundingBox, Detection},
};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Environment configuration with command-line overrides applied
    pub(crate) fn service_config(cli: &Cli) -> Result<ServiceConfig> {
        let mut config =
            ServiceConfig::from_env().context("Invalid AUTORENDER_* environment configuration")?;
        if cli.no_cache {
            config.disable_cache = true;
        }
        Ok(config)
    }

    /// Providers the CLI can construct; every other slot stays empty
    pub(crate) fn provider_registry(cli: &Cli) -> ProviderRegistry {
        let mut builder = ProviderRegistry::builder().smart_cropper(EdgeSmartCropper::new());

        if cli.mock {
            builder = builder
                .background_remover(MockBackgroundRemover::new())
                .generative_model(MockGenerativeModel::new())
                .object_detector(MockObjectDetector::new(vec![Detection::new(
                    BoundingBox::new(16, 16, i64::from(u32::MAX), i64::from(u32::MAX)),
                    0.9,
                    "",
                )]))
                .face_locator(MockFaceLocator::new(vec![BoundingBox::from_xywh(
                    32, 32, 64, 64,
                )]));
        }

        #[cfg(feature = "onnx")]
        {
            if let Some(model_path) = cli.onnx_model.clone() {
                use crate::providers::{
                    onnx::OnnxRemoverConfig, BackgroundRemover, OnnxBackgroundRemover,
                };

                let remover_config = OnnxRemoverConfig {
                    intra_threads: cli.threads,
                    ..OnnxRemoverConfig::default()
                };
                builder = builder.lazy_background_remover(move || {
                    let remover =
                        OnnxBackgroundRemover::from_file(&model_path, remover_config.clone())?;
                    Ok(Box::new(remover) as Box<dyn BackgroundRemover>)
                });
            }
        }

        #[cfg(not(feature = "onnx"))]
        {
            if cli.onnx_model.is_some() {
                log::warn!("--onnx-model ignored: built without the `onnx` feature");
            }
        }

        builder.build()
    }
}
