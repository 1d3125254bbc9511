//! Image asset normalization.
//!
//! Every image asset is decoded, validated and re-encoded to one canonical
//! target (lossless PNG over RGBA8) so that visually-identical assets from
//! different source encodings hash identically after normalization. The
//! fingerprint is computed over the decoded pixel buffer, feeding the
//! raw-buffer hashing requirement of the dedup module.
//!
//! Dimensions are probed from the container header *before* any pixel
//! decoding; a payload whose pixel area exceeds the configured bound fails
//! with [`ImageError::TooLarge`] without allocating the pixel buffer, which
//! is the defense against decompression-bomb inputs.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::dedup::Fingerprint;

/// Canonical target encoding for all stored assets.
pub const CANONICAL_FORMAT: &str = "png";

/// Default maximum pixel area (width * height): 50 megapixels.
pub const DEFAULT_MAX_PIXEL_AREA: u64 = 50_000_000;

/// Errors that can occur while normalizing an image asset.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The payload is not in a recognized image container format.
    #[error("unsupported image format: {detail}")]
    UnsupportedFormat {
        /// What the probe saw.
        detail: String,
    },

    /// The container was recognized but the payload failed to decode.
    #[error("image decode failed: {detail}")]
    DecodeFailed {
        /// The underlying decoder error.
        detail: String,
    },

    /// The declared dimensions exceed the configured pixel-area bound.
    #[error("image too large: {width}x{height} exceeds max pixel area {max_area}")]
    TooLarge {
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
        /// The configured bound.
        max_area: u64,
    },
}

/// A decoded, validated, canonically re-encoded image asset.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Canonical encoding name (always [`CANONICAL_FORMAT`]).
    pub format: &'static str,
    /// Canonically encoded payload.
    pub bytes: Vec<u8>,
    /// Fingerprint over the decoded RGBA buffer (not the encoded bytes).
    pub fingerprint: Fingerprint,
}

/// Decodes, bounds-checks and canonically re-encodes image payloads.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    max_pixel_area: u64,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PIXEL_AREA)
    }
}

impl ImageNormalizer {
    /// Creates a normalizer with the given pixel-area bound.
    #[must_use]
    pub fn new(max_pixel_area: u64) -> Self {
        Self { max_pixel_area }
    }

    /// Returns the configured pixel-area bound.
    #[must_use]
    pub fn max_pixel_area(&self) -> u64 {
        self.max_pixel_area
    }

    /// Normalizes an image payload.
    ///
    /// # Errors
    ///
    /// - [`ImageError::UnsupportedFormat`] if the container is unrecognized
    /// - [`ImageError::TooLarge`] if declared dimensions exceed the bound
    ///   (checked from the header, before pixel decode)
    /// - [`ImageError::DecodeFailed`] if the payload is corrupt
    #[instrument(skip(self, bytes), fields(input_len = bytes.len()))]
    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedImage, ImageError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ImageError::UnsupportedFormat { detail: e.to_string() })?;

        let source_format = reader.format().ok_or_else(|| ImageError::UnsupportedFormat {
            detail: "no known image signature".to_string(),
        })?;

        // Header-only dimension probe: no pixel buffer is allocated yet.
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| ImageError::DecodeFailed { detail: e.to_string() })?;

        let area = u64::from(width) * u64::from(height);
        if area > self.max_pixel_area {
            return Err(ImageError::TooLarge {
                width,
                height,
                max_area: self.max_pixel_area,
            });
        }

        let decoded = ImageReader::with_format(Cursor::new(bytes), source_format)
            .decode()
            .map_err(|e| ImageError::DecodeFailed { detail: e.to_string() })?;

        let rgba = decoded.to_rgba8();
        let fingerprint = Fingerprint::of_pixels(width, height, rgba.as_raw());

        let mut encoded = Vec::new();
        DynamicImage::ImageRgba8(rgba)
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(|e| ImageError::DecodeFailed { detail: e.to_string() })?;

        debug!(
            width,
            height,
            source = ?source_format,
            output_len = encoded.len(),
            "image normalized"
        );

        Ok(NormalizedImage {
            width,
            height,
            format: CANONICAL_FORMAT,
            bytes: encoded,
            fingerprint,
        })
    }
}
