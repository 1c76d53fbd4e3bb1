//! Image preprocessing for OCR models
//!
//! Handles image resizing, normalization, and tensor conversion for PaddleOCR models.

use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessing configuration
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Longest side fed to the detection model (rounded to a multiple of 32)
    pub det_max_side: u32,
    /// ImageNet mean for the detector [R, G, B]
    pub det_mean: [f32; 3],
    /// ImageNet std for the detector [R, G, B]
    pub det_std: [f32; 3],
    /// Target height for the recognition model
    pub rec_height: u32,
    /// Maximum width for recognition
    pub rec_max_width: u32,
    /// Recognizer maps [0, 255] to [-1, 1]
    pub rec_mean: [f32; 3],
    pub rec_std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_max_side: 960,
            det_mean: [0.485, 0.456, 0.406],
            det_std: [0.229, 0.224, 0.225],
            rec_height: 48,
            rec_max_width: 640,
            rec_mean: [0.5, 0.5, 0.5],
            rec_std: [0.5, 0.5, 0.5],
        }
    }
}

/// Convert an RGB image to a normalized NCHW tensor (batch size 1)
pub fn to_nchw(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Array4<f32> {
    let (w, h) = image.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        let value = image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (value - mean[c]) / std[c]
    })
}

/// Detector input size: longest side capped, both sides multiples of 32
pub fn detection_size(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f32;
    let scale = (max_side as f32 / longest).min(1.0);
    let round32 = |v: u32| (((v as f32 * scale) / 32.0).round() as u32).max(1) * 32;
    (round32(width), round32(height))
}

/// Detection tensor plus the (x, y) factors mapping model space back to the image
pub fn preprocess_for_detection(
    image: &RgbImage,
    config: &PreprocessConfig,
) -> (Array4<f32>, (f32, f32)) {
    let (w, h) = image.dimensions();
    let (dw, dh) = detection_size(w, h, config.det_max_side);
    let resized = imageops::resize(image, dw, dh, imageops::FilterType::Triangle);

    let tensor = to_nchw(&resized, &config.det_mean, &config.det_std);
    (tensor, (w as f32 / dw as f32, h as f32 / dh as f32))
}

/// Recognition tensor: fixed height, proportional width
pub fn preprocess_for_recognition(crop: &RgbImage, config: &PreprocessConfig) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let scale = config.rec_height as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, config.rec_max_width);
    let resized = imageops::resize(crop, new_w, config.rec_height, imageops::FilterType::Triangle);

    to_nchw(&resized, &config.rec_mean, &config.rec_std)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_to_nchw() {
        let img = RgbImage::from_fn(20, 10, |x, y| Rgb([x as u8, y as u8, 255]));
        let tensor = to_nchw(&img, &[0.0; 3], &[1.0; 3]);

        assert_eq!(tensor.dim(), (1, 3, 10, 20));
        assert!((tensor[[0, 0, 5, 10]] - 10.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 10]] - 5.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 10]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let config = PreprocessConfig::default();
        let tensor = to_nchw(&img, &config.rec_mean, &config.rec_std);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_detection_size() {
        assert_eq!(detection_size(1920, 1080, 960), (960, 544));
        assert_eq!(detection_size(100, 40, 960), (96, 32));
        assert_eq!(detection_size(5, 5, 960), (32, 32));
    }

    #[test]
    fn test_recognition_shape() {
        let crop = RgbImage::new(100, 24);
        let tensor = preprocess_for_recognition(&crop, &PreprocessConfig::default());
        assert_eq!(tensor.dim(), (1, 3, 48, 200));
    }
}
