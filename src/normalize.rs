//! Image normalization
//!
//! Turns untrusted bytes into a bounded, canonical RGBA8 image:
//!
//! 1. sniff the format from the content and fully decode it
//! 2. convert to RGBA8
//! 3. downscale so the longest side is at most `max_side`
//! 4. re-encode as PNG
//!
//! The PNG bytes are canonical for a given pixel buffer, so two encodings of
//! the same picture (PNG vs TIFF, say) normalize to the same bytes and the
//! same fingerprint.

use crate::error::{CleanerError, Result};
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder, ImageReader, RgbaImage};
use std::io::Cursor;
use tracing::{debug, instrument};

/// Default bound on the longest side of a normalized image
pub const DEFAULT_MAX_SIDE: u32 = 2048;

/// A decoded, bounded, RGBA8 image plus its canonical PNG encoding
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: RgbaImage,
    pub png: Vec<u8>,
    /// `(width, height)` before downscaling
    pub original_dimensions: (u32, u32),
}

impl NormalizedImage {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn was_downscaled(&self) -> bool {
        self.original_dimensions != self.image.dimensions()
    }
}

/// Decode, bound, and re-encode input images
#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    max_side: u32,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_MAX_SIDE,
        }
    }
}

impl ImageNormalizer {
    /// # Errors
    /// - `max_side` is zero
    pub fn new(max_side: u32) -> Result<Self> {
        if max_side == 0 {
            return Err(CleanerError::invalid_config("max side must be at least 1"));
        }
        Ok(Self { max_side })
    }

    #[must_use]
    pub fn max_side(&self) -> u32 {
        self.max_side
    }

    /// Normalize raw image bytes
    ///
    /// # Errors
    /// - [`CleanerError::UnsupportedImage`] when the format is unknown or the
    ///   data does not decode completely
    /// - [`CleanerError::NormalizationFailed`] when PNG encoding fails
    #[instrument(skip_all, fields(input_bytes = bytes.len()))]
    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedImage> {
        let image = decode(bytes)?;
        let original_dimensions = image.dimensions();

        let image = self.bound(image);
        let png = encode_png(&image)
            .map_err(|e| CleanerError::NormalizationFailed(e.to_string()))?;

        debug!(
            original = ?original_dimensions,
            normalized = ?image.dimensions(),
            png_bytes = png.len(),
            "Image normalized"
        );

        Ok(NormalizedImage {
            image,
            png,
            original_dimensions,
        })
    }

    fn bound(&self, image: RgbaImage) -> RgbaImage {
        let (width, height) = image.dimensions();
        let (target_width, target_height) = target_dimensions(width, height, self.max_side);
        if (target_width, target_height) == (width, height) {
            return image;
        }
        image::imageops::resize(&image, target_width, target_height, FilterType::Lanczos3)
    }
}

/// Size after bounding `(width, height)` by `max_side`
///
/// The longest side becomes exactly `max_side`; the other is scaled in integer
/// arithmetic (floor) and kept at least 1. Images already within the bound are
/// returned unchanged.
#[must_use]
pub fn target_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_side || longest == 0 {
        return (width, height);
    }

    let scale = |side: u32| -> u32 {
        let scaled = u64::from(side) * u64::from(max_side) / u64::from(longest);
        u32::try_from(scaled).unwrap_or(max_side).max(1)
    };

    if width >= height {
        (max_side, scale(height))
    } else {
        (scale(width), max_side)
    }
}

fn decode(bytes: &[u8]) -> Result<RgbaImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CleanerError::UnsupportedImage(format!("format detection failed: {e}")))?;

    let Some(format) = reader.format() else {
        return Err(CleanerError::UnsupportedImage(
            "unrecognized image format".to_string(),
        ));
    };

    // `decode` materializes every pixel, so truncated data fails here
    let image = reader
        .decode()
        .map_err(|e| CleanerError::UnsupportedImage(format!("{format:?} decode failed: {e}")))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(CleanerError::UnsupportedImage("zero-sized image".to_string()));
    }

    Ok(image.into_rgba8())
}

/// Encode an RGBA8 image as PNG
///
/// # Errors
/// - [`CleanerError::Processing`] when the encoder fails
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| CleanerError::processing(format!("PNG encoding failed: {e}")))?;
    Ok(png)
}
