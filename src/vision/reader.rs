//! Digit reader
//!
//! Reads short integers (badge counts, totals) out of a small box of the
//! screenshot.

use image::{imageops, RgbImage};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::geometry::BBox;
use super::locator::normalize_whitespace;
use super::ocr::TextRecognizer;
use super::ocr_preprocess::prepare_for_recognition;

static NUMBER_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{1,3}$").unwrap_or_else(|e| panic!("Failed to compile number pattern: {e}"))
});

/// Crop and enhancement settings for digit reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Padding as a share of the box's shorter side
    pub pad_ratio: f32,
    /// Padding floor in pixels
    pub min_pad: u32,
    /// Integer upscale factor
    pub upscale: u32,
    pub clahe_clip_limit: f32,
    pub clahe_tiles: (u32, u32),
    /// Tokens below this recognition confidence are dropped
    pub min_confidence: f32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            pad_ratio: 0.12,
            min_pad: 2,
            upscale: 2,
            clahe_clip_limit: 2.0,
            clahe_tiles: (4, 4),
            min_confidence: 0.3,
        }
    }
}

impl ReaderConfig {
    /// Symmetric padding for a box
    pub fn padding(&self, bbox: &BBox) -> u32 {
        let relative = (self.pad_ratio * bbox.width.min(bbox.height) as f32).round() as u32;
        self.min_pad.max(relative)
    }
}

/// Number read from the screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Number {
    pub value: u32,
    /// Location in full-image coordinates
    pub bbox: BBox,
    pub confidence: f32,
}

/// Map a box from the upscaled crop back to the source image
///
/// Origin rounds down and the far edge rounds up, so the result always
/// covers the recognized glyphs.
pub fn map_to_image(
    points: &[(f32, f32)],
    factor: u32,
    crop_origin: (u32, u32),
    img_w: u32,
    img_h: u32,
) -> BBox {
    if points.is_empty() {
        return BBox::default();
    }
    let k = factor.max(1) as f32;

    let min_x = points.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_x = points.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

    BBox::from_edges(
        (min_x / k).floor() as i64 + crop_origin.0 as i64,
        (min_y / k).floor() as i64 + crop_origin.1 as i64,
        (max_x / k).ceil() as i64 + crop_origin.0 as i64,
        (max_y / k).ceil() as i64 + crop_origin.1 as i64,
        img_w,
        img_h,
    )
}

/// Read 1-3 digit numbers inside `bbox`
///
/// Results are in reading order: top to bottom, then left to right.
/// A recognition failure yields an empty list.
pub fn read_numbers(
    recognizer: &dyn TextRecognizer,
    image: &RgbImage,
    bbox: BBox,
    config: &ReaderConfig,
) -> Vec<Number> {
    let (img_w, img_h) = image.dimensions();
    let target = bbox.clip_to(img_w, img_h);
    if target.is_empty() {
        return Vec::new();
    }
    let crop = target.expand(config.padding(&target), img_w, img_h);

    let pixels = imageops::crop_imm(image, crop.x, crop.y, crop.width, crop.height).to_image();
    let factor = config.upscale.max(1);
    let prepared = prepare_for_recognition(
        &pixels,
        factor,
        config.clahe_clip_limit,
        config.clahe_tiles,
    );

    let detections = match recognizer.recognize(&prepared) {
        Ok(detections) => detections,
        Err(e) => {
            warn!("Digit read in {:?}: {} failed: {}", crop, recognizer.name(), e);
            return Vec::new();
        }
    };

    let mut numbers: Vec<Number> = detections
        .into_iter()
        .filter(|d| d.confidence >= config.min_confidence)
        .filter_map(|d| {
            let token = normalize_whitespace(&d.text);
            if !NUMBER_TOKEN.is_match(&token) {
                return None;
            }
            let value = token.parse().ok()?;
            Some(Number {
                value,
                bbox: map_to_image(&d.quad, factor, (crop.x, crop.y), img_w, img_h),
                confidence: d.confidence,
            })
        })
        .collect();

    numbers.sort_by_key(|n| (n.bbox.y, n.bbox.x));

    debug!(
        "Read {:?} in {:?}",
        numbers.iter().map(|n| n.value).collect::<Vec<_>>(),
        crop
    );
    numbers
}

/// Drop later occurrences of an already-seen value, keeping order
pub fn dedupe_values(numbers: Vec<Number>) -> Vec<Number> {
    let mut seen = Vec::new();
    numbers
        .into_iter()
        .filter(|n| {
            if seen.contains(&n.value) {
                false
            } else {
                seen.push(n.value);
                true
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::ocr::ScriptedRecognizer;
    use crate::vision::TextDetection;

    fn number(value: u32, y: u32) -> Number {
        Number {
            value,
            bbox: BBox::new(0, y, 10, 10),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_padding() {
        let config = ReaderConfig::default();
        assert_eq!(config.padding(&BBox::new(0, 0, 30, 30)), 4);
        assert_eq!(config.padding(&BBox::new(0, 0, 5, 100)), 2);
    }

    #[test]
    fn test_digit_box_round_trip() {
        let image = RgbImage::new(640, 480);
        let candidate = BBox::new(145, 30, 30, 30);
        let config = ReaderConfig::default();
        let pad = config.padding(&candidate);
        let crop = candidate.expand(pad, 640, 480);

        // glyphs occupy the candidate box, seen in the x2 crop
        let k = config.upscale as f32;
        let local_x = (candidate.x - crop.x) as f32 * k;
        let local_y = (candidate.y - crop.y) as f32 * k;
        let recognizer = ScriptedRecognizer::new().then(vec![TextDetection::from_rect(
            "7",
            local_x + 0.6,
            local_y + 0.4,
            candidate.width as f32 * k - 1.2,
            candidate.height as f32 * k - 0.8,
            0.95,
        )]);

        let numbers = read_numbers(&recognizer, &image, candidate, &config);
        assert_eq!(numbers.len(), 1);
        let mapped = numbers[0].bbox;
        assert_eq!(numbers[0].value, 7);
        assert!(mapped.x + 1 >= candidate.x && mapped.y + 1 >= candidate.y);
        assert!(mapped.right() <= candidate.right() + 1);
        assert!(mapped.bottom() <= candidate.bottom() + 1);

        // recognizer saw the padded, upscaled crop
        assert_eq!(
            recognizer.requests(),
            vec![(crop.width * config.upscale, crop.height * config.upscale)]
        );
    }

    #[test]
    fn test_only_short_integers_are_kept() {
        let image = RgbImage::new(200, 200);
        let recognizer = ScriptedRecognizer::new().then(vec![
            TextDetection::from_rect("Total", 0.0, 0.0, 40.0, 10.0, 0.9),
            TextDetection::from_rect("1234", 0.0, 20.0, 40.0, 10.0, 0.9),
            TextDetection::from_rect("4 2", 0.0, 40.0, 40.0, 10.0, 0.9),
            TextDetection::from_rect("5.11", 0.0, 60.0, 40.0, 10.0, 0.9),
            TextDetection::from_rect("9", 0.0, 80.0, 40.0, 10.0, 0.1),
            TextDetection::from_rect("007", 0.0, 100.0, 40.0, 10.0, 0.9),
        ]);

        let values: Vec<u32> = read_numbers(&recognizer, &image, BBox::new(10, 10, 100, 100), &ReaderConfig::default())
            .iter()
            .map(|n| n.value)
            .collect();
        assert_eq!(values, vec![42, 7]);
    }

    #[test]
    fn test_reading_order() {
        let image = RgbImage::new(200, 200);
        let recognizer = ScriptedRecognizer::new().then(vec![
            TextDetection::from_rect("37", 0.0, 60.0, 20.0, 10.0, 0.9),
            TextDetection::from_rect("12", 40.0, 10.0, 20.0, 10.0, 0.9),
            TextDetection::from_rect("42", 0.0, 10.0, 20.0, 10.0, 0.9),
        ]);
        let values: Vec<u32> = read_numbers(&recognizer, &image, BBox::new(20, 20, 80, 80), &ReaderConfig::default())
            .iter()
            .map(|n| n.value)
            .collect();
        assert_eq!(values, vec![42, 12, 37]);
    }

    #[test]
    fn test_backend_failure_reads_nothing() {
        let image = RgbImage::new(50, 50);
        let recognizer = ScriptedRecognizer::new().then_fail("gpu lost");
        assert!(read_numbers(&recognizer, &image, BBox::new(0, 0, 20, 20), &ReaderConfig::default()).is_empty());
    }

    #[test]
    fn test_empty_box_skips_recognizer() {
        let image = RgbImage::new(0, 0);
        let recognizer = ScriptedRecognizer::new();
        assert!(read_numbers(&recognizer, &image, BBox::new(0, 0, 20, 20), &ReaderConfig::default()).is_empty());
        assert_eq!(recognizer.calls(), 0);
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let deduped = dedupe_values(vec![number(42, 0), number(42, 20), number(37, 40), number(42, 60)]);
        let values: Vec<(u32, u32)> = deduped.iter().map(|n| (n.value, n.bbox.y)).collect();
        assert_eq!(values, vec![(42, 0), (37, 40)]);
    }
}
