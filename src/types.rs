//! Shared image types

use crate::error::{CleanerError, Result};
use image::{GrayImage, RgbaImage};

/// Per-pixel foreground probability scaled to 0-255, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    pub data: Vec<u8>,
    /// `(width, height)`
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// The mask as a grayscale image
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        GrayImage::from_raw(width, height, self.data.clone()).ok_or_else(|| {
            CleanerError::processing("Mask data length does not match its dimensions")
        })
    }

    /// Fraction of pixels with a mask value above one half
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&v| v > 127).count();
        foreground as f32 / self.data.len() as f32
    }

    /// Cut the background out of `image` using this mask as alpha
    ///
    /// The output alpha is the mask value scaled by the input alpha, so pixels
    /// that were already transparent stay transparent. Fully transparent
    /// output pixels are written as `[0, 0, 0, 0]`.
    ///
    /// # Errors
    /// - Mask and image dimensions differ
    pub fn apply_to_image(&self, image: &RgbaImage) -> Result<RgbaImage> {
        if image.dimensions() != self.dimensions {
            return Err(CleanerError::processing(format!(
                "Mask is {:?} but image is {:?}",
                self.dimensions,
                image.dimensions()
            )));
        }

        let mut result = image.clone();
        for (pixel, &mask_value) in result.pixels_mut().zip(self.data.iter()) {
            let alpha = (u16::from(mask_value) * u16::from(pixel[3]) + 127) / 255;
            pixel.0 = if alpha == 0 {
                [0, 0, 0, 0]
            } else {
                [pixel[0], pixel[1], pixel[2], alpha as u8]
            };
        }

        Ok(result)
    }
}
