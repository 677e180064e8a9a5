//! AutoRender command-line tool
//!
//! Runs one pipeline or detection operation on a local file or URL and writes
//! the result to disk (or JSON to stdout for `detect-info` and `status`).

use super::config::CliConfigBuilder;
use crate::{
    codec::{self, OutputFormat, DEFAULT_JPEG_QUALITY},
    pipeline::{RemoveBackgroundParams, SwapBackgroundParams},
    service::AutoRenderService,
    types::ImageArtifact,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use instant::Instant;
use log::info;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Cached background removal, generative swap and smart cropping
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "autorender")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// ONNX segmentation model used as the background remover
    #[arg(long, value_name = "PATH", global = true)]
    pub onnx_model: Option<PathBuf>,

    /// Number of inference threads for the ONNX model (0 = auto)
    #[arg(short, long, default_value_t = 0, global = true)]
    pub threads: usize,

    /// Use the built-in mock providers instead of real models
    #[arg(long, global = true)]
    pub mock: bool,

    /// Disable the result caches
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// JPEG quality for .jpg outputs (1-100)
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, global = true)]
    pub jpeg_quality: u8,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Remove the background, optionally filling it with a solid color
    RemoveBg {
        /// Input image path or http(s) URL
        input: String,
        #[arg(short, long)]
        output: PathBuf,
        /// Background color as 6 hex digits, e.g. "#00FF00"
        #[arg(long)]
        bg_color: Option<String>,
        /// Gaussian blur radius for the mask edge
        #[arg(long)]
        edge_blur: Option<u32>,
    },
    /// Replace the background with a generated one
    SwapBg {
        input: String,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        prompt: String,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Crop to the best match for a text prompt
    Detect {
        input: String,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        prompt: String,
    },
    /// Print every detection for a text prompt as JSON
    DetectInfo {
        input: String,
        #[arg(short, long)]
        prompt: String,
    },
    /// Crop to the first detected face
    FaceCrop {
        input: String,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        padding: Option<u32>,
    },
    /// Crop to the salient region and resize to an exact size
    SmartCrop {
        input: String,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
    },
    /// Load every provider and print provider and cache status as JSON
    Status,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose).context("Failed to initialize tracing")?;
    run(&cli).await
}

fn init_tracing(verbose_count: u8) -> Result<()> {
    use crate::tracing_config::{TracingConfig, TracingFormat};

    TracingConfig::new()
        .with_verbosity(verbose_count)
        .with_format(TracingFormat::Console)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
        .context("Failed to initialize tracing subscriber")
}

/// Execute the parsed command
///
/// # Errors
/// - Unreadable input or unwritable output
/// - Any operation error, including unavailable providers
pub async fn run(cli: &Cli) -> Result<()> {
    let config = CliConfigBuilder::service_config(cli)?;
    let registry = CliConfigBuilder::provider_registry(cli);
    let service = AutoRenderService::new(registry, config).context("Invalid configuration")?;
    let start = Instant::now();

    match &cli.command {
        Command::RemoveBg {
            input,
            output,
            bg_color,
            edge_blur,
        } => {
            let image = load_input(input).await?;
            let params = RemoveBackgroundParams {
                bg_color: bg_color.clone(),
                edge_blur_radius: *edge_blur,
            };
            let result = service.remove_background(image, params).await?;
            write_output(&result, output, cli.jpeg_quality).await?;
        },
        Command::SwapBg {
            input,
            output,
            prompt,
            width,
            height,
        } => {
            let image = load_input(input).await?;
            let params = SwapBackgroundParams {
                prompt: prompt.clone(),
                width: *width,
                height: *height,
            };
            let result = service.swap_background(image, params).await?;
            write_output(&result, output, cli.jpeg_quality).await?;
        },
        Command::Detect {
            input,
            output,
            prompt,
        } => {
            let image = load_input(input).await?;
            let result = service.object_crop(image, prompt.clone()).await?;
            write_output(&result, output, cli.jpeg_quality).await?;
        },
        Command::DetectInfo { input, prompt } => {
            let image = load_input(input).await?;
            let result = service.detection_info(image, prompt.clone()).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Command::FaceCrop {
            input,
            output,
            padding,
        } => {
            let image = load_input(input).await?;
            let result = service.face_crop(image, *padding).await?;
            write_output(&result, output, cli.jpeg_quality).await?;
        },
        Command::SmartCrop {
            input,
            output,
            width,
            height,
        } => {
            let image = load_input(input).await?;
            let result = service.smart_crop(image, *width, *height).await?;
            write_output(&result, output, cli.jpeg_quality).await?;
        },
        Command::Status => {
            service.warm_up().await?;
            let report = serde_json::json!({
                "health": service.health(),
                "status": service.status(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
    }

    info!(
        "Finished in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Read and decode an image from a path or URL
async fn load_input(input: &str) -> Result<ImageArtifact> {
    let bytes = if is_url(input) {
        debug!(url = %input, "Fetching input");
        let response = reqwest::get(input)
            .await
            .with_context(|| format!("Failed to fetch {input}"))?
            .error_for_status()
            .with_context(|| format!("Failed to fetch {input}"))?;
        response.bytes().await?.to_vec()
    } else {
        tokio::fs::read(input)
            .await
            .with_context(|| format!("Failed to read {input}"))?
    };
    Ok(codec::decode(&bytes)?)
}

/// Output encoding chosen from the file extension
fn output_format_for(path: &Path) -> OutputFormat {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => OutputFormat::Jpeg,
        _ => OutputFormat::Png,
    }
}

async fn write_output(artifact: &ImageArtifact, path: &Path, jpeg_quality: u8) -> Result<()> {
    let format = output_format_for(path);
    let bytes = codec::encode(artifact, format, jpeg_quality)?;
    tokio::fs::write(path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(
        "Wrote {}x{} {} to {}",
        artifact.width(),
        artifact.height(),
        format.extension(),
        path.display()
    );
    Ok(())
}
