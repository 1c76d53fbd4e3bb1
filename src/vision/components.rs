//! Candidate extraction
//!
//! Connected components of a class mask, filtered by size, shape and
//! position relative to the anchor.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use super::geometry::BBox;
use super::segmentation::{ColorClass, ColorMask};

/// Where a candidate center may sit relative to the anchor
///
/// `dx` is measured from the anchor's right edge, `dy` from its vertical
/// center; bounds are multiples of the anchor width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Proximity {
    pub dx_min_w: f32,
    pub dx_max_w: f32,
    pub dy_min_h: f32,
    pub dy_max_h: f32,
}

/// Geometric filter for one candidate class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeFilter {
    /// Absolute area floor in pixels
    pub min_area_px: u64,
    /// Area floor as a multiple of anchor height squared
    #[serde(default)]
    pub min_area_anchor_h2: f32,
    #[serde(default)]
    pub max_area_px: Option<u64>,
    pub min_aspect: f32,
    #[serde(default)]
    pub max_aspect: Option<f32>,
    /// Minimum share of digit-white pixels inside the blob box
    #[serde(default)]
    pub min_digit_fill: Option<f32>,
    #[serde(default)]
    pub proximity: Option<Proximity>,
}

impl ShapeFilter {
    /// Count badge: compact, roughly square, near the date
    pub fn badge() -> Self {
        Self {
            min_area_px: 300,
            min_area_anchor_h2: 0.5,
            max_area_px: Some(3000),
            min_aspect: 0.7,
            max_aspect: Some(1.5),
            min_digit_fill: None,
            proximity: Some(Proximity {
                dx_min_w: -0.5,
                dx_max_w: 3.0,
                dy_min_h: -2.5,
                dy_max_h: 3.5,
            }),
        }
    }

    /// Warning banner: large and wide, anywhere on the page
    pub fn banner() -> Self {
        Self {
            min_area_px: 5000,
            min_area_anchor_h2: 0.0,
            max_area_px: None,
            min_aspect: 3.0,
            max_aspect: None,
            min_digit_fill: None,
            proximity: None,
        }
    }

    /// Effective area floor for an anchor of the given height
    pub fn min_area(&self, anchor_height: u32) -> u64 {
        let relative = (self.min_area_anchor_h2 as f64 * (anchor_height as f64).powi(2)).ceil();
        self.min_area_px.max(relative.max(0.0) as u64)
    }

    pub fn check(&self) -> Result<(), String> {
        if let Some(max) = self.max_area_px {
            if max < self.min_area_px {
                return Err(format!("max_area_px {} < min_area_px {}", max, self.min_area_px));
            }
        }
        if let Some(max) = self.max_aspect {
            if max < self.min_aspect {
                return Err(format!("max_aspect {} < min_aspect {}", max, self.min_aspect));
            }
        }
        if let Some(fill) = self.min_digit_fill {
            if !(0.0..=1.0).contains(&fill) {
                return Err(format!("min_digit_fill {} outside [0, 1]", fill));
            }
        }
        if let Some(p) = &self.proximity {
            if p.dx_min_w > p.dx_max_w || p.dy_min_h > p.dy_max_h {
                return Err("inverted proximity bounds".to_string());
            }
        }
        Ok(())
    }
}

/// Filtered component, in full-image coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub bbox: BBox,
    /// Bounding box area in pixels
    pub area: u64,
    pub aspect: f32,
    /// Horizontal distance from the center to the anchor's right edge
    pub distance: f32,
    pub class: ColorClass,
    /// Position in contour detection order
    pub order: usize,
    /// Number read inside the candidate, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Share of foreground pixels of `mask` inside `bbox` (region-local)
fn fill_ratio(mask: &GrayImage, bbox: &BBox) -> f32 {
    if bbox.is_empty() {
        return 0.0;
    }
    let mut on = 0u64;
    for y in bbox.y..bbox.bottom().min(mask.height()) {
        for x in bbox.x..bbox.right().min(mask.width()) {
            if mask.get_pixel(x, y)[0] > 0 {
                on += 1;
            }
        }
    }
    on as f32 / bbox.area() as f32
}

fn within_proximity(center: (f32, f32), anchor: &BBox, p: &Proximity) -> bool {
    let w = anchor.width as f32;
    let h = anchor.height as f32;
    let dx = center.0 - anchor.right() as f32;
    let dy = center.1 - (anchor.y as f32 + h / 2.0);

    dx >= p.dx_min_w * w && dx <= p.dx_max_w * w && dy >= p.dy_min_h * h && dy <= p.dy_max_h * h
}

/// Extract and filter outer components of a class mask
///
/// `digits` is a digit-white mask over the same region; it is only
/// consulted when the filter sets `min_digit_fill`, and a missing mask then
/// rejects every component.
pub fn extract(
    mask: &ColorMask,
    anchor: &BBox,
    filter: &ShapeFilter,
    digits: Option<&ColorMask>,
) -> Vec<Candidate> {
    if mask.region.is_empty() {
        return Vec::new();
    }

    let min_area = filter.min_area(anchor.height);
    let region = mask.region;
    let mut candidates = Vec::new();

    let outer = find_contours::<i32>(&mask.mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none());

    for (order, contour) in outer.enumerate() {
        let points: Vec<(f32, f32)> = contour
            .points
            .iter()
            .map(|p| (p.x as f32, p.y as f32))
            .collect();
        if points.is_empty() {
            continue;
        }

        // contour points are pixel centers, so the box extends one past the max
        let min_x = points.iter().map(|p| p.0).fold(f32::INFINITY, f32::min) as i64;
        let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min) as i64;
        let max_x = points.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max) as i64;
        let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max) as i64;
        let local = BBox::from_edges(
            min_x,
            min_y,
            max_x + 1,
            max_y + 1,
            region.width,
            region.height,
        );

        let area = local.area();
        let aspect = local.aspect_ratio();

        if area < min_area || filter.max_area_px.is_some_and(|max| area > max) {
            continue;
        }
        if aspect < filter.min_aspect || filter.max_aspect.is_some_and(|max| aspect > max) {
            continue;
        }

        if let Some(min_fill) = filter.min_digit_fill {
            let fill = digits.map_or(0.0, |d| fill_ratio(&d.mask, &local));
            if fill < min_fill {
                debug!("{} blob {:?} rejected: digit fill {:.2}", mask.class, local, fill);
                continue;
            }
        }

        let bbox = local.offset(region.x, region.y);
        let center = bbox.center();

        if let Some(proximity) = &filter.proximity {
            if !within_proximity(center, anchor, proximity) {
                continue;
            }
        }

        candidates.push(Candidate {
            bbox,
            area,
            aspect,
            distance: (center.0 - anchor.right() as f32).abs(),
            class: mask.class,
            order,
            value: None,
            confidence: None,
        });
    }

    debug!(
        "{}: {} candidates in region {:?}",
        mask.class,
        candidates.len(),
        region
    );
    candidates
}

/// Candidate ranking: closer to the anchor, then larger, then earlier
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| b.area.cmp(&a.area))
        .then_with(|| a.order.cmp(&b.order))
}

/// Sort candidates best-first
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(compare);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn mask_with(w: u32, h: u32, rects: &[(u32, u32, u32, u32)]) -> GrayImage {
        let mut mask = GrayImage::new(w, h);
        for &(x, y, rw, rh) in rects {
            for yy in y..y + rh {
                for xx in x..x + rw {
                    mask.put_pixel(xx, yy, Luma([255]));
                }
            }
        }
        mask
    }

    fn red(region: BBox, mask: GrayImage) -> ColorMask {
        ColorMask {
            class: ColorClass::AlertRed,
            region,
            mask,
        }
    }

    fn candidate(distance: f32, area: u64, order: usize) -> Candidate {
        Candidate {
            bbox: BBox::default(),
            area,
            aspect: 1.0,
            distance,
            class: ColorClass::AlertRed,
            order,
            value: None,
            confidence: None,
        }
    }

    #[test]
    fn test_badge_square_is_kept_in_image_coordinates() {
        let anchor = BBox::new(100, 50, 40, 20);
        let region = BBox::new(120, 20, 120, 100);
        // square at (145, 30) in image coordinates
        let mask = red(region, mask_with(120, 100, &[(25, 10, 30, 30)]));

        let found = extract(&mask, &anchor, &ShapeFilter::badge(), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox, BBox::new(145, 30, 30, 30));
        assert_eq!(found[0].area, 900);
        assert!((found[0].distance - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_shape_bounds_reject() {
        let anchor = BBox::new(100, 50, 40, 20);
        let region = BBox::new(120, 20, 120, 100);
        let mask = red(
            region,
            mask_with(
                120,
                100,
                &[
                    (2, 2, 10, 10),  // too small
                    (30, 10, 60, 15), // too wide
                ],
            ),
        );
        assert!(extract(&mask, &anchor, &ShapeFilter::badge(), None).is_empty());
    }

    #[test]
    fn test_min_area_scales_with_anchor() {
        let filter = ShapeFilter::badge();
        assert_eq!(filter.min_area(20), 300);
        assert_eq!(filter.min_area(40), 800);
    }

    #[test]
    fn test_proximity_rejects_far_blob() {
        let anchor = BBox::new(10, 200, 40, 20);
        let mask = red(BBox::new(0, 0, 400, 400), mask_with(400, 400, &[(300, 20, 30, 30)]));
        assert!(extract(&mask, &anchor, &ShapeFilter::badge(), None).is_empty());
    }

    #[test]
    fn test_digit_fill_floor() {
        let anchor = BBox::new(100, 50, 40, 20);
        let region = BBox::new(120, 20, 120, 100);
        let mask = red(region, mask_with(120, 100, &[(25, 10, 30, 30)]));
        let mut filter = ShapeFilter::badge();
        filter.min_digit_fill = Some(0.1);

        assert!(extract(&mask, &anchor, &filter, None).is_empty());

        let digits = ColorMask {
            class: ColorClass::DigitWhite,
            region,
            mask: mask_with(120, 100, &[(35, 18, 10, 14)]),
        };
        assert_eq!(extract(&mask, &anchor, &filter, Some(&digits)).len(), 1);
    }

    #[test]
    fn test_banner_ignores_anchor_position() {
        let anchor = BBox::new(10, 10, 40, 20);
        let mask = ColorMask {
            class: ColorClass::WarningYellow,
            region: BBox::new(0, 0, 640, 480),
            mask: mask_with(640, 480, &[(100, 400, 400, 40)]),
        };
        let found = extract(&mask, &anchor, &ShapeFilter::banner(), None);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox, BBox::new(100, 400, 400, 40));
    }

    #[test]
    fn test_ranking_is_total_and_deterministic() {
        let mut list = vec![
            candidate(5.0, 400, 3),
            candidate(2.0, 400, 2),
            candidate(2.0, 900, 4),
            candidate(2.0, 900, 1),
            candidate(0.0, 100, 0),
        ];
        rank(&mut list);
        let orders: Vec<usize> = list.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![0, 1, 4, 2, 3]);

        // antisymmetric for distinct candidates
        for a in &list {
            for b in &list {
                if a.order != b.order {
                    assert_eq!(compare(a, b), compare(b, a).reverse());
                }
            }
        }
    }
}
