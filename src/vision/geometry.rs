//! Axis-aligned boxes in image pixel coordinates

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box (x, y, width, height)
///
/// Boxes produced by the pipeline are always clipped to the image they
/// describe, so `right() <= image width` and `bottom() <= image height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BBox {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Box covering a whole image
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive right edge
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Width over height; 0.0 for degenerate boxes
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Build a box from signed edges, clipped to `[0, img_w) x [0, img_h)`
    ///
    /// Inverted edges collapse to a zero-area box instead of wrapping.
    pub fn from_edges(left: i64, top: i64, right: i64, bottom: i64, img_w: u32, img_h: u32) -> Self {
        let x0 = left.clamp(0, img_w as i64);
        let y0 = top.clamp(0, img_h as i64);
        let x1 = right.clamp(x0, img_w as i64);
        let y1 = bottom.clamp(y0, img_h as i64);

        Self::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
    }

    /// Axis-aligned hull of a set of points, clipped to the image
    pub fn from_points(points: &[(f32, f32)], img_w: u32, img_h: u32) -> Self {
        if points.is_empty() {
            return Self::default();
        }

        let min_x = points.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let min_y = points.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_x = points.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let max_y = points.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

        Self::from_edges(
            min_x.floor() as i64,
            min_y.floor() as i64,
            max_x.ceil() as i64,
            max_y.ceil() as i64,
            img_w,
            img_h,
        )
    }

    /// Clip this box to an image of the given size
    pub fn clip_to(&self, img_w: u32, img_h: u32) -> Self {
        Self::from_edges(
            self.x as i64,
            self.y as i64,
            self.right() as i64,
            self.bottom() as i64,
            img_w,
            img_h,
        )
    }

    /// Grow by `pad` pixels on every side, clipped to the image
    pub fn expand(&self, pad: u32, img_w: u32, img_h: u32) -> Self {
        let pad = pad as i64;
        Self::from_edges(
            self.x as i64 - pad,
            self.y as i64 - pad,
            self.right() as i64 + pad,
            self.bottom() as i64 + pad,
            img_w,
            img_h,
        )
    }

    /// Translate a box given in region-local coordinates
    pub fn offset(&self, origin_x: u32, origin_y: u32) -> Self {
        Self::new(self.x + origin_x, self.y + origin_y, self.width, self.height)
    }

    /// Smallest box containing both
    pub fn union(&self, other: &BBox) -> Self {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn contains(&self, other: &BBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}
