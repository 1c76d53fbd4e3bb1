//! Vision Layer
//!
//! Pixel-level building blocks of the classifier: anchor search, region
//! derivation, color segmentation, blob extraction and digit reading.
//! Text recognition is abstracted behind [`TextRecognizer`]; the bundled
//! backend runs PaddleOCR models via ONNX Runtime.

pub mod components;
pub mod geometry;
pub mod locator;
pub mod models;
pub mod ocr;
pub mod ocr_preprocess;
pub mod paddle;
pub mod preprocess;
pub mod reader;
pub mod regions;
pub mod segmentation;

use serde::{Deserialize, Serialize};

pub use components::{Candidate, Proximity, ShapeFilter};
pub use geometry::BBox;
pub use locator::{locate, Anchor};
pub use models::{ModelManager, ModelType, OnnxSession};
pub use ocr::{LazyRecognizer, ScriptedRecognizer, TextRecognizer};
pub use paddle::{PaddleConfig, PaddleRecognizer};
pub use reader::{Number, ReaderConfig};
pub use regions::{GeometryProfile, Region, RegionKind};
pub use segmentation::{ColorClass, ColorMask, ColorProfile};

/// Single recognized text item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDetection {
    /// Recognized text
    pub text: String,
    /// Corner points, clockwise from top-left, in input pixel coordinates
    pub quad: [(f32, f32); 4],
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl TextDetection {
    pub fn new(text: impl Into<String>, quad: [(f32, f32); 4], confidence: f32) -> Self {
        Self {
            text: text.into(),
            quad,
            confidence,
        }
    }

    /// Detection with an axis-aligned quad
    pub fn from_rect(
        text: impl Into<String>,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        confidence: f32,
    ) -> Self {
        Self::new(
            text,
            [(x, y), (x + width, y), (x + width, y + height), (x, y + height)],
            confidence,
        )
    }

    /// Axis-aligned box around the quad, clipped to the image
    pub fn bounds(&self, img_w: u32, img_h: u32) -> BBox {
        BBox::from_points(&self.quad, img_w, img_h)
    }
}
