//! Alert delivery
//!
//! Delivery is best-effort: a failing channel is logged and the caller
//! carries on with the next check.

use anyhow::{Context, Result};
use chrono::Utc;
use image::{imageops, RgbImage};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::analysis::Verdict;

/// Longest side of an attachment; larger screenshots are downscaled
pub const MAX_ATTACHMENT_SIDE: u32 = 2560;

/// Operator alert channel
pub trait Notifier: Send + Sync {
    fn notify(&self, verdict: &Verdict, attachment: &RgbImage, caption: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// Human-readable alert text
///
/// `is_today` selects "today" over the explicit date, matching how the
/// dashboard is checked before and after the switch hour.
pub fn caption(date_label: &str, is_today: bool, verdict: &Verdict, site: &str) -> String {
    let day = if is_today {
        "today".to_string()
    } else {
        format!("for {}", date_label)
    };
    let mut text = format!(
        "⚠️ Unprocessed orders {} ({}). Check the dashboard ({})",
        day, verdict.signal, site
    );
    if let Some((total, confirmed)) = verdict.numbers {
        text.push_str(&format!(": {} total, {} confirmed", total, confirmed));
    }
    text
}

/// Downscale so the longest side is at most `max_side`, keeping aspect
pub fn prepare_attachment(image: &RgbImage, max_side: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_side || max_side == 0 {
        return image.clone();
    }

    let scale = max_side as f64 / longest as f64;
    let new_w = ((width as f64 * scale).round() as u32).clamp(1, max_side);
    let new_h = ((height as f64 * scale).round() as u32).clamp(1, max_side);
    info!("Attachment resized from {}x{} to {}x{}", width, height, new_w, new_h);
    imageops::thumbnail(image, new_w, new_h)
}

/// Send an alert, logging instead of failing
///
/// Returns whether the notifier accepted it.
pub fn deliver(notifier: &dyn Notifier, verdict: &Verdict, screenshot: &RgbImage, caption: &str) -> bool {
    let attachment = prepare_attachment(screenshot, MAX_ATTACHMENT_SIDE);
    match notifier.notify(verdict, &attachment, caption) {
        Ok(()) => true,
        Err(e) => {
            warn!("Notifier '{}' failed: {:#}", notifier.name(), e);
            false
        }
    }
}

/// Notifier that only logs the caption
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, verdict: &Verdict, attachment: &RgbImage, caption: &str) -> Result<()> {
        info!(
            "ALERT {} [{} evidence={:?}, {}x{} attachment]",
            caption,
            verdict.signal,
            verdict.evidence_bbox,
            attachment.width(),
            attachment.height()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Notifier that writes the attachment and caption into a directory
pub struct DirNotifier {
    dir: PathBuf,
}

impl DirNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Notifier for DirNotifier {
    fn notify(&self, verdict: &Verdict, attachment: &RgbImage, caption: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {:?}", self.dir))?;

        let stem = format!(
            "alert_{}_{}",
            verdict.target.replace('.', "-"),
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        );
        let image_path = self.dir.join(format!("{}.png", stem));
        attachment
            .save(&image_path)
            .with_context(|| format!("Failed to write {:?}", image_path))?;
        std::fs::write(self.dir.join(format!("{}.txt", stem)), caption)?;

        info!("Alert written to {:?}", image_path);
        Ok(())
    }

    fn name(&self) -> &str {
        "dir"
    }
}
