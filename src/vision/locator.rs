//! Text anchor locator
//!
//! Finds the date label that every search region hangs off.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use super::geometry::BBox;
use super::ocr::TextRecognizer;
use super::TextDetection;

/// Located occurrence of the target label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Full text of the detection that contained the label
    pub text: String,
    /// Axis-aligned box around the (possibly rotated) detection
    pub bbox: BBox,
    pub confidence: f32,
}

/// Remove every whitespace character
pub fn normalize_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Exact containment of `label` in `text`, without gluing onto digits
///
/// An occurrence only counts when it is not directly preceded (if the label
/// starts with a digit) or followed (if it ends with one) by another ASCII
/// digit, so "1.12" is found in "on 1.12" but not in "11.12" or "1.123".
pub fn contains_label(text: &str, label: &str) -> bool {
    if label.is_empty() {
        return false;
    }

    let guard_start = label.chars().next().is_some_and(|c| c.is_ascii_digit());
    let guard_end = label.chars().next_back().is_some_and(|c| c.is_ascii_digit());

    text.char_indices()
        .filter(|(start, _)| text[*start..].starts_with(label))
        .any(|(start, _)| {
            let before = text[..start].chars().next_back();
            let after = text[start + label.len()..].chars().next();
            let glued_before = guard_start && before.is_some_and(|c| c.is_ascii_digit());
            let glued_after = guard_end && after.is_some_and(|c| c.is_ascii_digit());
            !glued_before && !glued_after
        })
}

/// Pick the anchor among recognized text items
///
/// Highest confidence wins; equal confidence keeps the earlier detection.
pub fn select_anchor(
    detections: &[TextDetection],
    target: &str,
    min_confidence: f32,
    img_w: u32,
    img_h: u32,
) -> Option<Anchor> {
    let wanted = normalize_whitespace(target);
    if wanted.is_empty() {
        return None;
    }

    let mut best: Option<&TextDetection> = None;
    for detection in detections {
        if !detection.confidence.is_finite() || detection.confidence < min_confidence {
            continue;
        }
        if !contains_label(&normalize_whitespace(&detection.text), &wanted) {
            continue;
        }
        if best.map_or(true, |b| detection.confidence > b.confidence) {
            best = Some(detection);
        }
    }

    best.map(|detection| Anchor {
        text: detection.text.clone(),
        bbox: detection.bounds(img_w, img_h),
        confidence: detection.confidence,
    })
}

/// Locate `target` in the full image
///
/// A backend failure is logged and treated as an image without text.
pub fn locate(
    recognizer: &dyn TextRecognizer,
    image: &RgbImage,
    target: &str,
    min_confidence: f32,
) -> Option<Anchor> {
    let start = Instant::now();
    let detections = match recognizer.recognize(image) {
        Ok(detections) => detections,
        Err(e) => {
            warn!("Anchor search: {} failed, treating as no text: {}", recognizer.name(), e);
            return None;
        }
    };

    let (width, height) = image.dimensions();
    let anchor = select_anchor(&detections, target, min_confidence, width, height);

    debug!(
        "Anchor search for '{}' over {} detections in {:?}: {:?}",
        target,
        detections.len(),
        start.elapsed(),
        anchor.as_ref().map(|a| a.bbox)
    );

    anchor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::ocr::ScriptedRecognizer;

    fn det(text: &str, x: f32, conf: f32) -> TextDetection {
        TextDetection::from_rect(text, x, 10.0, 40.0, 20.0, conf)
    }

    #[test]
    fn test_contains_label_rejects_glued_digits() {
        assert!(contains_label("1.12", "1.12"));
        assert!(contains_label("Вт,1.12", "1.12"));
        assert!(!contains_label("11.12", "1.12"));
        assert!(!contains_label("1.123", "1.12"));
        assert!(contains_label("11.12and1.12", "1.12"));
        assert!(!contains_label("", "1.12"));
        assert!(!contains_label("1.12", ""));
    }

    #[test]
    fn test_whitespace_is_ignored_on_both_sides() {
        let detections = vec![det("5 . 11", 100.0, 0.8)];
        let anchor = select_anchor(&detections, " 5.11 ", 0.0, 640, 480).unwrap();
        assert_eq!(anchor.bbox, BBox::new(100, 10, 40, 20));
    }

    #[test]
    fn test_highest_confidence_wins_ties_keep_first() {
        let detections = vec![
            det("5.11", 10.0, 0.7),
            det("5.11", 200.0, 0.9),
            det("5.11", 300.0, 0.9),
        ];
        let anchor = select_anchor(&detections, "5.11", 0.0, 640, 480).unwrap();
        assert_eq!(anchor.bbox.x, 200);
        assert!((anchor.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_absent_without_match() {
        let detections = vec![det("11.12", 10.0, 0.99), det("Orders", 60.0, 0.99)];
        assert!(select_anchor(&detections, "1.12", 0.0, 640, 480).is_none());
    }

    #[test]
    fn test_min_confidence_filters() {
        let detections = vec![det("5.11", 10.0, 0.2)];
        assert!(select_anchor(&detections, "5.11", 0.5, 640, 480).is_none());
    }

    #[test]
    fn test_non_finite_confidence_never_wins() {
        let detections = vec![
            det("5.11", 10.0, f32::NAN),
            det("5.11", 100.0, 0.6),
            det("5.11", 200.0, f32::INFINITY),
        ];
        let anchor = select_anchor(&detections, "5.11", 0.0, 640, 480).unwrap();
        assert_eq!(anchor.bbox.x, 100);

        let detections = vec![det("5.11", 10.0, f32::NAN)];
        assert!(select_anchor(&detections, "5.11", 0.0, 640, 480).is_none());
    }

    #[test]
    fn test_locate_survives_backend_failure() {
        let recognizer = ScriptedRecognizer::new().then_fail("model crashed");
        let image = RgbImage::new(64, 64);
        assert!(locate(&recognizer, &image, "5.11", 0.0).is_none());
        assert_eq!(recognizer.calls(), 1);
    }
}
