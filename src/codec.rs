//! Image codec helpers
//!
//! Canonical encoding (the byte form used for fingerprints), wire transport
//! encodings, hex color parsing and pre-pipeline downscaling.

use crate::{
    error::{AutoRenderError, Result},
    types::ImageArtifact,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Transport encodings for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG, keeps the alpha channel
    #[default]
    Png,
    /// JPEG, alpha dropped
    Jpeg,
}

impl OutputFormat {
    /// File extension without the dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    /// MIME type for HTTP responses
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    /// Default response encoding per operation: generated backgrounds are
    /// photographic and opaque, so swap results ship as JPEG.
    #[must_use]
    pub fn for_operation(kind: crate::fingerprint::OperationKind) -> Self {
        match kind {
            crate::fingerprint::OperationKind::SwapBackground => Self::Jpeg,
            crate::fingerprint::OperationKind::RemoveBackground => Self::Png,
        }
    }
}

/// Default JPEG quality for transport encoding
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Lossless PNG of the artifact in its own pixel format.
///
/// Identical pixels always produce identical bytes, which is what makes
/// these bytes usable as fingerprint material.
///
/// # Errors
/// - PNG encoder failure
pub fn encode_canonical(artifact: &ImageArtifact) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    artifact
        .as_dynamic()
        .write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Decode any supported image payload into an artifact
///
/// # Errors
/// - Empty payload
/// - Unknown or corrupt image data
pub fn decode(bytes: &[u8]) -> Result<ImageArtifact> {
    if bytes.is_empty() {
        return Err(AutoRenderError::invalid_parameter("Image payload is empty"));
    }
    let image = image::load_from_memory(bytes).map_err(|e| {
        AutoRenderError::invalid_parameter(format!("Failed to decode image from bytes: {}", e))
    })?;
    Ok(ImageArtifact::new(image))
}

/// Encode an artifact for transport
///
/// # Errors
/// - Encoder failure
pub fn encode(artifact: &ImageArtifact, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Png => encode_canonical(artifact),
        OutputFormat::Jpeg => {
            let rgb = artifact.to_rgb8();
            let mut buffer = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
            encoder.encode_image(&rgb)?;
            Ok(buffer)
        },
    }
}

/// Encode an artifact and wrap it in standard base64
///
/// # Errors
/// - Encoder failure
pub fn to_base64(artifact: &ImageArtifact, format: OutputFormat) -> Result<String> {
    let bytes = encode(artifact, format, DEFAULT_JPEG_QUALITY)?;
    Ok(STANDARD.encode(bytes))
}

/// Decode a standard base64 image payload
///
/// # Errors
/// - Invalid base64
/// - Undecodable image data
pub fn from_base64(data: &str) -> Result<ImageArtifact> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| AutoRenderError::invalid_parameter(format!("Invalid base64 payload: {}", e)))?;
    decode(&bytes)
}

/// Shrink so neither edge exceeds `max_edge`, keeping aspect ratio.
///
/// Artifacts already within bounds are returned unchanged (same buffer).
#[must_use]
pub fn downscale_to_fit(artifact: &ImageArtifact, max_edge: u32) -> ImageArtifact {
    let (width, height) = artifact.dimensions();
    if width <= max_edge && height <= max_edge {
        return artifact.clone();
    }
    let resized = artifact
        .as_dynamic()
        .resize(max_edge, max_edge, FilterType::Lanczos3);
    ImageArtifact::new(resized)
}

/// Parse a 6-digit hex RGB color with an optional leading `#`
///
/// # Errors
/// - Anything other than exactly six hex digits after the optional `#`
pub fn parse_hex_color(color: &str) -> Result<[u8; 3]> {
    let hex = color.strip_prefix('#').unwrap_or(color);
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AutoRenderError::invalid_parameter(format!(
            "Invalid background color '{}'. Use a 6-digit hex code.",
            color
        )));
    }
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .ok_or_else(|| {
                AutoRenderError::invalid_parameter(format!("Invalid hex color '{}'", color))
            })
    };
    Ok([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> ImageArtifact {
        ImageArtifact::from_rgb(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FF0000").unwrap(), [255, 0, 0]);
        assert_eq!(parse_hex_color("00ff7f").unwrap(), [0, 255, 127]);
    }

    #[test]
    fn test_parse_hex_color_rejects_malformed() {
        for bad in ["", "#", "#FFF", "FF00000", "#GG0000", "##FF0000", "12 456"] {
            let err = parse_hex_color(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter, "input {bad:?}");
        }
    }

    #[test]
    fn test_canonical_encoding_is_deterministic() {
        let a = gradient(16, 9);
        let b = gradient(16, 9);
        assert_eq!(encode_canonical(&a).unwrap(), encode_canonical(&b).unwrap());
        assert_ne!(
            encode_canonical(&a).unwrap(),
            encode_canonical(&gradient(9, 16)).unwrap()
        );
    }

    #[test]
    fn test_decode_preserves_alpha() {
        let rgba = ImageArtifact::from_rgba(RgbaImage::from_pixel(3, 3, Rgba([9, 8, 7, 100])));
        let bytes = encode(&rgba, OutputFormat::Png, DEFAULT_JPEG_QUALITY).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, rgba);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(&[]).unwrap_err().kind(), ErrorKind::InvalidParameter);
        assert_eq!(
            decode(b"definitely not an image").unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );
    }

    #[test]
    fn test_jpeg_encoding_drops_alpha() {
        let rgba = ImageArtifact::from_rgba(RgbaImage::from_pixel(8, 8, Rgba([200, 10, 10, 0])));
        let bytes = encode(&rgba, OutputFormat::Jpeg, 80).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert!(!decoded.has_alpha());
        assert_eq!(decoded.dimensions(), (8, 8));
    }

    #[test]
    fn test_base64_transport() {
        let artifact = gradient(5, 4);
        let encoded = to_base64(&artifact, OutputFormat::Png).unwrap();
        assert_eq!(from_base64(&encoded).unwrap(), artifact);
        assert!(from_base64("***").is_err());
    }

    #[test]
    fn test_downscale_to_fit() {
        let large = gradient(2048, 1024);
        let small = downscale_to_fit(&large, 1024);
        assert_eq!(small.dimensions(), (1024, 512));

        let fits = gradient(100, 100);
        assert_eq!(downscale_to_fit(&fits, 1024), fits);
    }

    #[test]
    fn test_output_format_per_operation() {
        use crate::fingerprint::OperationKind;
        assert_eq!(
            OutputFormat::for_operation(OperationKind::SwapBackground),
            OutputFormat::Jpeg
        );
        assert_eq!(
            OutputFormat::for_operation(OperationKind::RemoveBackground),
            OutputFormat::Png
        );
        assert_eq!(OutputFormat::Jpeg.mime_type(), "image/jpeg");
    }
}
