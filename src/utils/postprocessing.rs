//! Model output to segmentation mask

use crate::{
    error::{CleanerError, Result},
    types::SegmentationMask,
    utils::preprocessing::Letterbox,
};
use ndarray::Array4;

/// Maps a model output tensor back onto the original image
pub struct MaskPostprocessor;

impl MaskPostprocessor {
    /// Convert a `(1, 1, H, W)` probability tensor into a mask of `original` size
    ///
    /// Each original pixel samples the canvas position it was letterboxed to.
    ///
    /// # Errors
    /// - Tensor is not `(1, 1, H, W)`
    /// - Tensor size differs from the letterbox canvas
    pub fn tensor_to_mask(
        tensor: &Array4<f32>,
        letterbox: &Letterbox,
        original: (u32, u32),
    ) -> Result<SegmentationMask> {
        let (batch, channels, height, width) = tensor.dim();
        if batch != 1 || channels != 1 {
            return Err(CleanerError::processing(format!(
                "Invalid output tensor shape {:?}, expected (1, 1, H, W)",
                tensor.dim()
            )));
        }
        if (width, height) != (letterbox.canvas_width as usize, letterbox.canvas_height as usize)
        {
            return Err(CleanerError::processing(format!(
                "Output tensor is {width}x{height} but model input was {}x{}",
                letterbox.canvas_width, letterbox.canvas_height
            )));
        }

        let (orig_width, orig_height) = original;
        let mut data = Vec::with_capacity(orig_width as usize * orig_height as usize);
        for y in 0..orig_height {
            for x in 0..orig_width {
                let (tx, ty) = letterbox.canvas_coordinate(x, y);
                let value = tensor
                    .get([0, 0, ty as usize, tx as usize])
                    .copied()
                    .unwrap_or(0.0);
                let value = if value.is_nan() { 0.0 } else { value };
                data.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }

        Ok(SegmentationMask::new(data, original))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_follows_letterbox() {
        // 4x2 image into a 4x4 canvas: rows 1..3 carry the image
        let letterbox = Letterbox::fit((4, 2), [4, 4]).unwrap();
        assert_eq!(letterbox.offset_y, 1);

        let mut tensor = Array4::<f32>::zeros((1, 1, 4, 4));
        for x in 0..4 {
            tensor[[0, 0, 1, x]] = 1.0;
            tensor[[0, 0, 2, x]] = 0.5;
        }

        let mask = MaskPostprocessor::tensor_to_mask(&tensor, &letterbox, (4, 2)).unwrap();
        assert_eq!(mask.dimensions, (4, 2));
        assert_eq!(&mask.data[..4], &[255; 4]);
        assert_eq!(&mask.data[4..], &[128; 4]);
    }

    #[test]
    fn test_values_are_clamped() {
        let letterbox = Letterbox::fit((1, 1), [1, 1]).unwrap();
        let tensor = Array4::from_elem((1, 1, 1, 1), 3.0_f32);
        let mask = MaskPostprocessor::tensor_to_mask(&tensor, &letterbox, (1, 1)).unwrap();
        assert_eq!(mask.data, vec![255]);

        let tensor = Array4::from_elem((1, 1, 1, 1), f32::NAN);
        let mask = MaskPostprocessor::tensor_to_mask(&tensor, &letterbox, (1, 1)).unwrap();
        assert_eq!(mask.data, vec![0]);
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let letterbox = Letterbox::fit((4, 4), [4, 4]).unwrap();
        let tensor = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(MaskPostprocessor::tensor_to_mask(&tensor, &letterbox, (4, 4)).is_err());

        let tensor = Array4::<f32>::zeros((1, 1, 8, 8));
        assert!(MaskPostprocessor::tensor_to_mask(&tensor, &letterbox, (4, 4)).is_err());
    }
}
