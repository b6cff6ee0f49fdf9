//! Model input preparation
//!
//! Images are letterboxed: scaled to fit the model input while keeping their
//! aspect ratio, centered on a padded canvas, then normalized into an NCHW
//! tensor. The [`Letterbox`] describing that placement travels with the
//! tensor so the mask can be mapped back onto the original pixels.

use crate::{
    error::{CleanerError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, ImageBuffer, Rgb, RgbImage, RgbaImage};
use ndarray::Array4;

/// Placement of a scaled image inside the model's input canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Scale factor from original to canvas coordinates
    pub scale: f32,
    /// Size of the scaled image on the canvas
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Top-left corner of the scaled image on the canvas
    pub offset_x: u32,
    pub offset_y: u32,
    /// Canvas size
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl Letterbox {
    /// Fit `(width, height)` into a `[canvas_height, canvas_width]` target
    ///
    /// # Errors
    /// - Zero-sized image or canvas
    pub fn fit(original: (u32, u32), target_size: [u32; 2]) -> Result<Self> {
        let (width, height) = original;
        let [canvas_height, canvas_width] = target_size;
        if width == 0 || height == 0 || canvas_width == 0 || canvas_height == 0 {
            return Err(CleanerError::processing(format!(
                "Cannot letterbox {width}x{height} into {canvas_width}x{canvas_height}"
            )));
        }

        let scale = (canvas_width as f32 / width as f32).min(canvas_height as f32 / height as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, canvas_width);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, canvas_height);

        Ok(Self {
            scale,
            scaled_width,
            scaled_height,
            offset_x: (canvas_width - scaled_width) / 2,
            offset_y: (canvas_height - scaled_height) / 2,
            canvas_width,
            canvas_height,
        })
    }

    /// Canvas coordinate sampled for original pixel `(x, y)`
    #[must_use]
    pub fn canvas_coordinate(&self, x: u32, y: u32) -> (u32, u32) {
        let sx = (((x as f32 + 0.5) * self.scale) as u32).min(self.scaled_width - 1);
        let sy = (((y as f32 + 0.5) * self.scale) as u32).min(self.scaled_height - 1);
        (sx + self.offset_x, sy + self.offset_y)
    }
}

/// Letterbox and normalization for model input
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Padding color for the letterbox canvas
    pub const PADDING: [u8; 3] = [255, 255, 255];

    /// Build the model input tensor for `image`
    ///
    /// Transparent pixels are composited over the padding color so that the
    /// model never sees the undefined RGB of fully transparent input.
    ///
    /// # Errors
    /// - Zero-sized image or model input
    pub fn preprocess_for_inference(
        image: &RgbaImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox)> {
        let letterbox = Letterbox::fit(image.dimensions(), preprocessing_config.target_size)?;

        let rgb = Self::flatten_alpha(image);
        let resized = image::imageops::resize(
            &rgb,
            letterbox.scaled_width,
            letterbox.scaled_height,
            FilterType::Triangle,
        );

        let mut canvas = ImageBuffer::from_pixel(
            letterbox.canvas_width,
            letterbox.canvas_height,
            Rgb(Self::PADDING),
        );
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset_x),
            i64::from(letterbox.offset_y),
        );

        Ok((Self::canvas_to_tensor(&canvas, preprocessing_config), letterbox))
    }

    fn flatten_alpha(image: &RgbaImage) -> RgbImage {
        let [pr, pg, pb] = Self::PADDING.map(u32::from);
        ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
            let [r, g, b, a] = image.get_pixel(x, y).0;
            let a = u32::from(a);
            let blend = |c: u8, p: u32| ((u32::from(c) * a + p * (255 - a) + 127) / 255) as u8;
            Rgb([blend(r, pr), blend(g, pg), blend(b, pb)])
        })
    }

    /// Convert canvas to normalized NCHW tensor
    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        let mean = config.normalization_mean;
        let std = config.normalization_std;

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] =
                    (f32::from(pixel[channel]) / 255.0 - mean[channel]) / std[channel];
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn config(height: u32, width: u32) -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: [height, width],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn test_letterbox_wide_image() {
        let letterbox = Letterbox::fit((200, 100), [64, 64]).unwrap();
        assert_eq!((letterbox.scaled_width, letterbox.scaled_height), (64, 32));
        assert_eq!((letterbox.offset_x, letterbox.offset_y), (0, 16));
        assert_eq!(letterbox.canvas_coordinate(0, 0), (0, 16));
        assert_eq!(letterbox.canvas_coordinate(199, 99), (63, 47));
    }

    #[test]
    fn test_letterbox_non_square_canvas() {
        let letterbox = Letterbox::fit((100, 100), [32, 64]).unwrap();
        assert_eq!((letterbox.scaled_width, letterbox.scaled_height), (32, 32));
        assert_eq!((letterbox.offset_x, letterbox.offset_y), (16, 0));
    }

    #[test]
    fn test_letterbox_rejects_empty() {
        assert!(Letterbox::fit((0, 10), [32, 32]).is_err());
        assert!(Letterbox::fit((10, 10), [0, 32]).is_err());
    }

    #[test]
    fn test_tensor_shape_and_padding() {
        let image = RgbaImage::from_pixel(40, 20, Rgba([0, 0, 0, 255]));
        let (tensor, letterbox) =
            ImagePreprocessor::preprocess_for_inference(&image, &config(16, 16)).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 16, 16]);
        assert_eq!(letterbox.offset_y, 4);
        // Padding row is white: (1.0 - 0.5) / 1.0
        assert!((tensor[[0, 0, 0, 0]] - 0.5).abs() < 1e-6);
        // Image row is black: (0.0 - 0.5) / 1.0
        assert!((tensor[[0, 2, 8, 8]] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_transparent_pixels_become_padding() {
        let image = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0]));
        let (tensor, _) =
            ImagePreprocessor::preprocess_for_inference(&image, &config(8, 8)).unwrap();
        assert!(tensor.iter().all(|v| (v - 0.5).abs() < 1e-6));
    }
}
