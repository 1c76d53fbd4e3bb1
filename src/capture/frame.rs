//! Frame data structures for captured screen content

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::RgbImage;
use std::path::Path;

/// A settled screenshot of the dashboard
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: RgbImage,
    /// When the screenshot was taken (file mtime for stored frames)
    pub captured_at: DateTime<Utc>,
}

impl CapturedFrame {
    /// Wrap an already decoded image, stamped now
    pub fn from_image(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    /// Decode an encoded screenshot (PNG, JPEG, ...)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .context("Failed to decode screenshot")?
            .to_rgb8();
        Ok(Self::from_image(image))
    }

    /// Load a screenshot from disk
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let mut frame =
            Self::from_bytes(&bytes).with_context(|| format!("Failed to decode {:?}", path))?;

        if let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) {
            frame.captured_at = modified.into();
        }
        Ok(frame)
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
