//! PaddleOCR recognition backend
//!
//! DBNet text detection followed by CRNN line recognition with greedy CTC
//! decoding, both run through ONNX Runtime.

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

use super::geometry::BBox;
use super::models::{ModelManager, ModelType, OnnxSession};
use super::ocr::TextRecognizer;
use super::preprocess::{preprocess_for_detection, preprocess_for_recognition, PreprocessConfig};
use super::TextDetection;
use crate::error::RecognitionError;

/// DBNet post-processing and runtime settings
#[derive(Debug, Clone)]
pub struct PaddleConfig {
    /// Probability above which a map pixel is text
    pub det_threshold: f32,
    /// Minimum mean probability inside a box
    pub box_threshold: f32,
    /// Box growth factor compensating DBNet's shrunk kernels
    pub unclip_ratio: f32,
    /// Boxes with a shorter side (map pixels) are dropped
    pub min_box_side: u32,
    /// Recognized lines below this confidence are dropped
    pub min_text_confidence: f32,
    pub intra_threads: usize,
    pub preprocess: PreprocessConfig,
}

impl Default for PaddleConfig {
    fn default() -> Self {
        Self {
            det_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            min_box_side: 3,
            min_text_confidence: 0.1,
            intra_threads: 4,
            preprocess: PreprocessConfig::default(),
        }
    }
}

/// PaddleOCR detector + recognizer pair
///
/// Sessions sit behind mutexes so one instance can serve several worker
/// threads; inference calls on the same model are serialized.
pub struct PaddleRecognizer {
    detector: Mutex<OnnxSession>,
    recognizer: Mutex<OnnxSession>,
    dictionary: Vec<String>,
    config: PaddleConfig,
}

impl PaddleRecognizer {
    pub fn new(
        det_model: &Path,
        rec_model: &Path,
        dictionary: &Path,
        config: PaddleConfig,
    ) -> Result<Self, RecognitionError> {
        let detector = OnnxSession::new(det_model, config.intra_threads)?;
        let recognizer = OnnxSession::new(rec_model, config.intra_threads)?;
        let dictionary = load_dictionary(dictionary)?;

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
            dictionary,
            config,
        })
    }

    /// Build from models already present in a [`ModelManager`] directory
    pub fn from_manager(manager: &ModelManager, config: PaddleConfig) -> Result<Self, RecognitionError> {
        for model_type in ModelType::ALL {
            if !manager.is_model_available(model_type) {
                return Err(RecognitionError::Init(format!(
                    "{} missing in {:?}; run `badge-watch models`",
                    model_type.display_name(),
                    manager.models_dir()
                )));
            }
        }

        Self::new(
            &manager.model_path(ModelType::Detection),
            &manager.model_path(ModelType::Recognition),
            &manager.model_path(ModelType::Dictionary),
            config,
        )
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<BBox>, RecognitionError> {
        let (tensor, (sx, sy)) = preprocess_for_detection(image, &self.config.preprocess);
        let (shape, probs) = self.detector.lock().run_single(tensor)?;

        if shape.len() != 4 {
            return Err(RecognitionError::inference(
                "detection output",
                format!("unexpected shape {:?}", shape),
            ));
        }
        let map_h = shape[2] as u32;
        let map_w = shape[3] as u32;

        let (img_w, img_h) = image.dimensions();
        let boxes = db_boxes(&probs, map_w, map_h, &self.config)
            .into_iter()
            .map(|(b, _)| {
                BBox::from_edges(
                    (b.x as f32 * sx).floor() as i64,
                    (b.y as f32 * sy).floor() as i64,
                    (b.right() as f32 * sx).ceil() as i64,
                    (b.bottom() as f32 * sy).ceil() as i64,
                    img_w,
                    img_h,
                )
            })
            .filter(|b| !b.is_empty())
            .collect();

        Ok(boxes)
    }

    fn read_line(&self, crop: &RgbImage) -> Result<(String, f32), RecognitionError> {
        let tensor = preprocess_for_recognition(crop, &self.config.preprocess);
        let (shape, probs) = self.recognizer.lock().run_single(tensor)?;

        if shape.len() != 3 {
            return Err(RecognitionError::inference(
                "recognition output",
                format!("unexpected shape {:?}", shape),
            ));
        }

        Ok(ctc_greedy_decode(
            &probs,
            shape[1] as usize,
            shape[2] as usize,
            &self.dictionary,
        ))
    }
}

impl TextRecognizer for PaddleRecognizer {
    fn recognize(&self, image: &RgbImage) -> Result<Vec<TextDetection>, RecognitionError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(RecognitionError::InvalidInput(format!("empty image {}x{}", w, h)));
        }

        let start = Instant::now();
        let mut boxes = self.detect(image)?;
        boxes.sort_by_key(|b| (b.y, b.x));

        let mut detections = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let crop = imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
            let (text, confidence) = self.read_line(&crop)?;
            if text.trim().is_empty() || confidence < self.config.min_text_confidence {
                continue;
            }
            detections.push(TextDetection::from_rect(
                text,
                bbox.x as f32,
                bbox.y as f32,
                bbox.width as f32,
                bbox.height as f32,
                confidence,
            ));
        }

        debug!(
            "PaddleOCR: {} text items in {}x{} image in {:?}",
            detections.len(),
            w,
            h,
            start.elapsed()
        );
        Ok(detections)
    }

    fn name(&self) -> &str {
        "paddleocr"
    }
}

/// Load a PaddleOCR character dictionary
///
/// Index 0 is the CTC blank; a trailing space class follows the file's
/// entries, matching how the recognition models were exported.
pub fn load_dictionary(path: &Path) -> Result<Vec<String>, RecognitionError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RecognitionError::Init(format!("dictionary {}: {}", path.display(), e)))?;

    let mut dictionary = vec!["#".to_string()];
    dictionary.extend(
        content
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .filter(|line| !line.is_empty()),
    );
    dictionary.push(" ".to_string());
    Ok(dictionary)
}

/// Greedy CTC decoding of a `[seq_len, classes]` probability matrix
///
/// Repeated classes collapse, blanks (class 0) are dropped. Confidence is
/// the mean probability of the emitted characters.
pub fn ctc_greedy_decode(
    probs: &[f32],
    seq_len: usize,
    classes: usize,
    dictionary: &[String],
) -> (String, f32) {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = None;

    for t in 0..seq_len {
        let Some(row) = probs.get(t * classes..(t + 1) * classes) else {
            break;
        };
        let Some((index, &score)) = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            break;
        };

        if index != 0 && previous != Some(index) {
            if let Some(symbol) = dictionary.get(index) {
                text.push_str(symbol);
                scores.push(score);
            }
        }
        previous = Some(index);
    }

    let confidence = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };
    (text, confidence)
}

/// Text boxes from a DBNet probability map, in map coordinates
pub fn db_boxes(probs: &[f32], width: u32, height: u32, config: &PaddleConfig) -> Vec<(BBox, f32)> {
    if probs.len() < (width * height) as usize || width == 0 || height == 0 {
        return Vec::new();
    }

    let bitmap = GrayImage::from_fn(width, height, |x, y| {
        let p = probs[(y * width + x) as usize];
        Luma([if p > config.det_threshold { 255 } else { 0 }])
    });

    let mut boxes = Vec::new();
    for contour in find_contours::<i32>(&bitmap) {
        if contour.border_type != BorderType::Outer || contour.parent.is_some() {
            continue;
        }
        let points: Vec<(f32, f32)> = contour
            .points
            .iter()
            .map(|p| (p.x as f32, p.y as f32))
            .collect();
        let Some(core) = hull_box(&points, width, height) else {
            continue;
        };
        if core.width.min(core.height) < config.min_box_side {
            continue;
        }

        let score = mean_inside(probs, width, &core);
        if score < config.box_threshold {
            continue;
        }

        boxes.push((unclip(&core, config.unclip_ratio, width, height), score));
    }

    boxes
}

fn hull_box(points: &[(f32, f32)], width: u32, height: u32) -> Option<BBox> {
    if points.is_empty() {
        return None;
    }
    let min_x = points.iter().map(|p| p.0).fold(f32::INFINITY, f32::min) as i64;
    let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min) as i64;
    let max_x = points.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max) as i64;
    let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max) as i64;
    Some(BBox::from_edges(min_x, min_y, max_x + 1, max_y + 1, width, height))
}

fn mean_inside(probs: &[f32], width: u32, bbox: &BBox) -> f32 {
    if bbox.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for y in bbox.y..bbox.bottom() {
        for x in bbox.x..bbox.right() {
            sum += probs[(y * width + x) as usize] as f64;
        }
    }
    (sum / bbox.area() as f64) as f32
}

/// Grow a box by `area * ratio / perimeter` on every side
fn unclip(bbox: &BBox, ratio: f32, width: u32, height: u32) -> BBox {
    let perimeter = 2.0 * (bbox.width + bbox.height) as f32;
    if perimeter == 0.0 {
        return *bbox;
    }
    let distance = (bbox.area() as f32 * ratio / perimeter).round() as u32;
    bbox.expand(distance, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dictionary() -> Vec<String> {
        let mut dict = vec!["#".to_string()];
        dict.extend("0123456789.".chars().map(|c| c.to_string()));
        dict.push(" ".to_string());
        dict
    }

    fn one_hot(indices: &[usize], classes: usize) -> Vec<f32> {
        let mut probs = vec![0.0; indices.len() * classes];
        for (t, &i) in indices.iter().enumerate() {
            probs[t * classes + i] = 0.9;
        }
        probs
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let dict = dictionary();
        let classes = dict.len();
        // "5.11": 5 5 _ . 1 _ 1 _
        let probs = one_hot(&[6, 6, 0, 11, 2, 0, 2, 0], classes);
        let (text, conf) = ctc_greedy_decode(&probs, 8, classes, &dict);
        assert_eq!(text, "5.11");
        assert!((conf - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_ctc_all_blank() {
        let dict = dictionary();
        let probs = one_hot(&[0, 0, 0], dict.len());
        assert_eq!(ctc_greedy_decode(&probs, 3, dict.len(), &dict), (String::new(), 0.0));
    }

    #[test]
    fn test_db_boxes_finds_and_unclips() {
        let (w, h) = (64u32, 32u32);
        let mut probs = vec![0.0f32; (w * h) as usize];
        for y in 10..16 {
            for x in 20..40 {
                probs[(y * w + x) as usize] = 0.9;
            }
        }
        // speck below min side
        probs[(2 * w + 2) as usize] = 0.9;

        let boxes = db_boxes(&probs, w, h, &PaddleConfig::default());
        assert_eq!(boxes.len(), 1);
        let (bbox, score) = boxes[0];
        assert!((score - 0.9).abs() < 1e-4);
        // 20x6 core, distance = 120 * 1.5 / 52 = 3.46 -> 3
        assert_eq!(bbox, BBox::new(17, 7, 26, 12));
    }

    #[test]
    fn test_db_boxes_rejects_weak_regions() {
        let (w, h) = (32u32, 32u32);
        let probs = vec![0.4f32; (w * h) as usize];
        assert!(db_boxes(&probs, w, h, &PaddleConfig::default()).is_empty());
    }

    #[test]
    fn test_load_dictionary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dict.txt");
        std::fs::write(&path, "0\r\n1\n2\n\n").unwrap();

        let dict = load_dictionary(&path).unwrap();
        assert_eq!(dict, vec!["#", "0", "1", "2", " "]);
        assert!(load_dictionary(&dir.path().join("missing.txt")).is_err());
    }
}
