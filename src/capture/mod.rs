//! Screenshot Capture
//!
//! Navigating to the dashboard and rendering it happens outside this crate.
//! The classifier only needs something that hands back a settled frame.

pub mod frame;

pub use frame::CapturedFrame;

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing::debug;

/// Source of dashboard screenshots
pub trait CaptureService: Send + Sync {
    /// Capture one settled frame
    fn capture(&self) -> Result<CapturedFrame>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Capture that reads a stored screenshot from disk
pub struct FileCapture {
    path: PathBuf,
    label: String,
}

impl FileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self { path, label }
    }
}

impl CaptureService for FileCapture {
    fn capture(&self) -> Result<CapturedFrame> {
        let frame = CapturedFrame::open(&self.path)?;
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            bail!("{:?} is an empty image", self.path);
        }
        debug!(
            "Captured {}x{} from {} (taken {})",
            width,
            height,
            self.label,
            frame.captured_at.to_rfc3339()
        );
        Ok(frame)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_file_capture_reads_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        RgbImage::from_pixel(32, 16, Rgb([10, 20, 30])).save(&path).unwrap();

        let capture = FileCapture::new(&path);
        let frame = capture.capture().unwrap();
        assert_eq!(frame.dimensions(), (32, 16));
        assert_eq!(*frame.image.get_pixel(0, 0), Rgb([10, 20, 30]));
        assert!(capture.name().ends_with("shot.png"));
    }

    #[test]
    fn test_stored_frame_is_stamped_with_file_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        RgbImage::new(4, 4).save(&path).unwrap();
        let modified: chrono::DateTime<chrono::Utc> =
            std::fs::metadata(&path).unwrap().modified().unwrap().into();

        let frame = FileCapture::new(&path).capture().unwrap();
        assert_eq!(frame.captured_at, modified);
    }

    #[test]
    fn test_file_capture_missing_file() {
        let capture = FileCapture::new("/nonexistent/shot.png");
        assert!(capture.capture().is_err());
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        assert!(CapturedFrame::from_bytes(b"definitely not a png").is_err());
    }
}
