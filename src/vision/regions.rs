//! Region-of-interest derivation
//!
//! Pure geometry: every search window is expressed as edge offsets relative
//! to the anchor box, so a layout shift is a config change.

use serde::{Deserialize, Serialize};

use super::geometry::BBox;

/// Purpose of a search window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// Window around the date where the count badge sits
    Badge,
    /// Column under the date holding total/confirmed counts
    Numbers,
    /// The whole page (banner search)
    Page,
}

/// Anchor edge an offset is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorEdge {
    Left,
    Right,
    CenterX,
    Top,
    Bottom,
    CenterY,
}

/// One edge of a derived window: `edge + scale * extent + pixels`
///
/// `extent` is the anchor width for horizontal edges and the anchor height
/// for vertical ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeOffset {
    pub from: AnchorEdge,
    #[serde(default)]
    pub scale: f32,
    #[serde(default)]
    pub pixels: i32,
}

impl EdgeOffset {
    pub const fn new(from: AnchorEdge, scale: f32, pixels: i32) -> Self {
        Self { from, scale, pixels }
    }

    fn resolve(&self, anchor: &BBox) -> i64 {
        let (x, y) = (anchor.x as f64, anchor.y as f64);
        let (w, h) = (anchor.width as f64, anchor.height as f64);

        let (base, extent) = match self.from {
            AnchorEdge::Left => (x, w),
            AnchorEdge::Right => (x + w, w),
            AnchorEdge::CenterX => (x + w / 2.0, w),
            AnchorEdge::Top => (y, h),
            AnchorEdge::Bottom => (y + h, h),
            AnchorEdge::CenterY => (y + h / 2.0, h),
        };

        (base + self.scale as f64 * extent).round() as i64 + self.pixels as i64
    }
}

/// Window definition relative to the anchor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionSpec {
    pub left: EdgeOffset,
    pub top: EdgeOffset,
    pub right: EdgeOffset,
    pub bottom: EdgeOffset,
}

impl RegionSpec {
    /// Resolve against an anchor, clipped to the image
    pub fn resolve(&self, anchor: &BBox, img_w: u32, img_h: u32) -> BBox {
        BBox::from_edges(
            self.left.resolve(anchor),
            self.top.resolve(anchor),
            self.right.resolve(anchor),
            self.bottom.resolve(anchor),
            img_w,
            img_h,
        )
    }
}

/// Anchor-relative windows for one layout family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryProfile {
    pub badge: RegionSpec,
    pub numbers: RegionSpec,
}

impl Default for GeometryProfile {
    fn default() -> Self {
        use AnchorEdge::*;
        Self {
            // Right of the date and slightly above it, where the card's
            // corner badge is drawn
            badge: RegionSpec {
                left: EdgeOffset::new(Right, -0.5, 0),
                top: EdgeOffset::new(Top, -1.5, 0),
                right: EdgeOffset::new(Right, 2.5, 0),
                bottom: EdgeOffset::new(Bottom, 2.5, 0),
            },
            numbers: RegionSpec {
                left: EdgeOffset::new(Left, -0.25, 0),
                top: EdgeOffset::new(Bottom, 0.0, 0),
                right: EdgeOffset::new(Right, 0.5, 0),
                bottom: EdgeOffset::new(Bottom, 4.0, 0),
            },
        }
    }
}

/// Derived search window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub kind: RegionKind,
    pub bbox: BBox,
}

/// Derive every search window for an anchor
///
/// Zero-area windows are kept; they simply produce no candidates.
pub fn derive(anchor: &BBox, image_size: (u32, u32), profile: &GeometryProfile) -> Vec<Region> {
    let (img_w, img_h) = image_size;

    vec![
        Region {
            kind: RegionKind::Badge,
            bbox: profile.badge.resolve(anchor, img_w, img_h),
        },
        Region {
            kind: RegionKind::Numbers,
            bbox: profile.numbers.resolve(anchor, img_w, img_h),
        },
        Region {
            kind: RegionKind::Page,
            bbox: BBox::full(img_w, img_h),
        },
    ]
}

/// Find the window of a given kind
pub fn find(regions: &[Region], kind: RegionKind) -> Option<&Region> {
    regions.iter().find(|r| r.kind == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_badge_window() {
        let anchor = BBox::new(100, 50, 40, 20);
        let regions = derive(&anchor, (640, 480), &GeometryProfile::default());
        let badge = find(&regions, RegionKind::Badge).unwrap();
        assert_eq!(badge.bbox, BBox::new(120, 20, 120, 100));
        // the scenario badge square must fit inside
        assert!(badge.bbox.contains(&BBox::new(145, 30, 30, 30)));
    }

    #[test]
    fn test_regions_stay_inside_image() {
        let profile = GeometryProfile::default();
        let sizes = [(1, 1), (50, 30), (640, 480), (1440, 900)];
        let anchors = [
            BBox::new(0, 0, 40, 20),
            BBox::new(620, 470, 20, 10),
            BBox::new(30, 25, 200, 200),
            BBox::new(1000, 0, 3, 1),
            BBox::new(5, 5, 0, 0),
        ];

        for &(w, h) in &sizes {
            for anchor in &anchors {
                for region in derive(anchor, (w, h), &profile) {
                    let b = region.bbox;
                    assert!(b.right() <= w, "{:?} exceeds width {}", b, w);
                    assert!(b.bottom() <= h, "{:?} exceeds height {}", b, h);
                }
            }
        }
    }

    #[test]
    fn test_anchor_at_corner_gives_degenerate_window() {
        let anchor = BBox::new(630, 470, 10, 10);
        let regions = derive(&anchor, (640, 480), &GeometryProfile::default());
        let numbers = find(&regions, RegionKind::Numbers).unwrap();
        assert!(numbers.bbox.is_empty());
    }

    #[test]
    fn test_pixel_offsets() {
        let spec = RegionSpec {
            left: EdgeOffset::new(AnchorEdge::Right, 0.0, -20),
            top: EdgeOffset::new(AnchorEdge::Top, 0.0, -30),
            right: EdgeOffset::new(AnchorEdge::Right, 0.0, 80),
            bottom: EdgeOffset::new(AnchorEdge::Top, 0.0, 50),
        };
        let bbox = spec.resolve(&BBox::new(100, 50, 40, 20), 640, 480);
        assert_eq!(bbox, BBox::new(120, 20, 100, 80));
    }
}
