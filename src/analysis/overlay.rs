//! Debug overlay rendering
//!
//! Draws the anchor, search regions and winning evidence over a copy of the
//! screenshot so a verdict can be audited by eye.

use ab_glyph::{FontArc, FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::error::ConfigError;
use crate::vision::geometry::BBox;
use crate::vision::regions::{Region, RegionKind};

use super::fusion::Verdict;

const ANCHOR_COLOR: Rgb<u8> = Rgb([30, 110, 255]);
const BADGE_REGION_COLOR: Rgb<u8> = Rgb([255, 160, 0]);
const NUMBERS_REGION_COLOR: Rgb<u8> = Rgb([0, 190, 190]);
const EVIDENCE_COLOR: Rgb<u8> = Rgb([220, 0, 200]);

static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSansMono.ttf");

/// Load a label font from disk
pub fn load_font(path: &Path) -> Result<FontArc, ConfigError> {
    let data = std::fs::read(path)
        .map_err(|e| ConfigError::invalid("overlay.font_path", format!("{}: {}", path.display(), e)))?;
    FontVec::try_from_vec(data)
        .map(FontArc::new)
        .map_err(|e| ConfigError::invalid("overlay.font_path", format!("{}: {}", path.display(), e)))
}

/// Label font: the configured file, or the bundled DejaVu Sans Mono
pub fn label_font(path: Option<&Path>) -> Result<FontArc, ConfigError> {
    match path {
        Some(path) => load_font(path),
        None => FontArc::try_from_slice(EMBEDDED_FONT)
            .map_err(|e| ConfigError::invalid("overlay.font_path", format!("bundled font: {}", e))),
    }
}

fn draw_box(canvas: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, thickness: u32) {
    for inset in 0..thickness {
        if bbox.width <= 2 * inset || bbox.height <= 2 * inset {
            break;
        }
        let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32)
            .of_size(bbox.width - 2 * inset, bbox.height - 2 * inset);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

fn draw_label(canvas: &mut RgbImage, font: &FontArc, size: f32, bbox: &BBox, color: Rgb<u8>, text: &str) {
    let y = bbox.y as i32 - size.ceil() as i32 - 1;
    let y = if y < 0 { bbox.bottom() as i32 + 1 } else { y };
    if y < canvas.height() as i32 {
        draw_text_mut(canvas, color, bbox.x as i32, y, PxScale::from(size), font, text);
    }
}

/// Render the overlay for a verdict
///
/// Anchor blue, badge window orange, numbers window teal, winning evidence
/// magenta. Each box is labeled above its top edge, or below it when
/// there is no room.
pub fn render(
    image: &RgbImage,
    verdict: &Verdict,
    regions: &[Region],
    font: &FontArc,
    font_size: f32,
) -> RgbImage {
    let mut canvas = image.clone();

    for region in regions {
        let (color, label) = match region.kind {
            RegionKind::Badge => (BADGE_REGION_COLOR, "badge"),
            RegionKind::Numbers => (NUMBERS_REGION_COLOR, "numbers"),
            RegionKind::Page => continue,
        };
        draw_box(&mut canvas, &region.bbox, color, 1);
        draw_label(&mut canvas, font, font_size, &region.bbox, color, label);
    }

    if let Some(anchor) = &verdict.anchor {
        draw_box(&mut canvas, &anchor.bbox, ANCHOR_COLOR, 2);
        draw_label(&mut canvas, font, font_size, &anchor.bbox, ANCHOR_COLOR, &verdict.target);
    }

    if let Some(evidence) = &verdict.evidence_bbox {
        draw_box(&mut canvas, evidence, EVIDENCE_COLOR, 3);
        let label = match (verdict.candidate.as_ref().and_then(|c| c.value), verdict.numbers) {
            (Some(value), _) => format!("{} ({})", verdict.signal, value),
            (None, Some((total, confirmed))) => format!("{} {}>{}", verdict.signal, total, confirmed),
            (None, None) => verdict.signal.to_string(),
        };
        draw_label(&mut canvas, font, font_size, evidence, EVIDENCE_COLOR, &label);
    }

    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fusion::Signal;
    use crate::vision::locator::Anchor;

    #[test]
    fn test_render_marks_anchor_and_evidence() {
        let image = RgbImage::from_pixel(100, 80, Rgb([255, 255, 255]));
        let mut verdict = Verdict::absent("5.11");
        verdict.anchor_found = true;
        verdict.anchor = Some(Anchor {
            text: "5.11".to_string(),
            bbox: BBox::new(10, 10, 20, 10),
            confidence: 0.9,
        });
        verdict.present = true;
        verdict.signal = Signal::Badge;
        verdict.evidence_bbox = Some(BBox::new(40, 5, 12, 12));

        let regions = vec![
            Region { kind: RegionKind::Badge, bbox: BBox::new(30, 0, 40, 40) },
            Region { kind: RegionKind::Page, bbox: BBox::new(0, 0, 100, 80) },
            Region { kind: RegionKind::Numbers, bbox: BBox::new(0, 0, 0, 0) },
        ];
        let font = label_font(None).unwrap();
        let out = render(&image, &verdict, &regions, &font, 14.0);

        assert_eq!(out.dimensions(), image.dimensions());
        assert_eq!(*out.get_pixel(10, 10), ANCHOR_COLOR);
        assert_eq!(*out.get_pixel(40, 5), EVIDENCE_COLOR);
        assert_eq!(*out.get_pixel(69, 39), BADGE_REGION_COLOR);
        // page region is not outlined
        assert_eq!(*out.get_pixel(99, 79), Rgb([255, 255, 255]));
        // source untouched
        assert_eq!(*image.get_pixel(10, 10), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_boxes_are_labeled_with_bundled_font() {
        let image = RgbImage::from_pixel(120, 80, Rgb([255, 255, 255]));
        let mut verdict = Verdict::absent("5.11");
        verdict.present = true;
        verdict.signal = Signal::Banner;
        verdict.evidence_bbox = Some(BBox::new(10, 40, 12, 12));

        let font = label_font(None).unwrap();
        let out = render(&image, &verdict, &[], &font, 14.0);

        // "banner" sits in the band above the box
        let inked = (10..80)
            .flat_map(|x| (25..40).map(move |y| (x, y)))
            .filter(|&(x, y)| *out.get_pixel(x, y) != Rgb([255, 255, 255]))
            .count();
        assert!(inked > 20, "label pixels: {}", inked);
        // nothing drawn far from box and label
        assert_eq!(*out.get_pixel(110, 5), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_missing_font_is_config_error() {
        assert!(load_font(Path::new("/nonexistent/font.ttf")).is_err());
    }
}
