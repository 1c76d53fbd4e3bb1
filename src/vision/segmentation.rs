//! Color segmentation
//!
//! Turns a region of the screenshot into a binary mask (0 / 255) for one
//! semantic color class. A class mask is the union of independent
//! detectors (HSV ranges, red channel dominance, adaptive CIELAB chroma),
//! minus an exclusion band, followed by median + close + open cleanup.

use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::median_filter;
use imageproc::morphology::{close, open};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::geometry::BBox;

/// Semantic color class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorClass {
    /// Red count badge
    AlertRed,
    /// Yellow warning banner
    WarningYellow,
    /// White digits drawn on a badge
    DigitWhite,
}

impl ColorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorClass::AlertRed => "alert_red",
            ColorClass::WarningYellow => "warning_yellow",
            ColorClass::DigitWhite => "digit_white",
        }
    }
}

impl fmt::Display for ColorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive HSV box, OpenCV scale (H 0-179, S and V 0-255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub hue: (u8, u8),
    pub saturation: (u8, u8),
    pub value: (u8, u8),
}

impl HsvRange {
    pub const fn new(hue: (u8, u8), saturation: (u8, u8), value: (u8, u8)) -> Self {
        Self {
            hue,
            saturation,
            value,
        }
    }

    pub fn contains(&self, (h, s, v): (u8, u8, u8)) -> bool {
        (self.hue.0..=self.hue.1).contains(&h)
            && (self.saturation.0..=self.saturation.1).contains(&s)
            && (self.value.0..=self.value.1).contains(&v)
    }
}

/// Red channel dominance: `R - max(G, B) >= margin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDiff {
    pub margin: i16,
}

impl ChannelDiff {
    fn matches(&self, Rgb([r, g, b]): Rgb<u8>) -> bool {
        r as i16 - g.max(b) as i16 >= self.margin
    }
}

/// Adaptive chroma detector in CIELAB
///
/// A pixel passes when its chroma reaches `max(floor, mean + k * stddev)`
/// of the region, and, if a band is set, its Lab hue angle lies in
/// `[start, end]` degrees (wrapping through 0 when `start > end`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChromaDetector {
    pub floor: f32,
    pub k: f32,
    #[serde(default)]
    pub hue_band_deg: Option<(f32, f32)>,
}

/// Median + morphology cleanup radii; 0 skips a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cleanup {
    pub median_radius: u32,
    pub close_radius: u8,
    pub open_radius: u8,
}

/// Detector set for one color class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorProfile {
    /// At most two ranges, so red can wrap around hue 0
    #[serde(default)]
    pub hue_ranges: Vec<HsvRange>,
    #[serde(default)]
    pub channel_diff: Option<ChannelDiff>,
    #[serde(default)]
    pub chroma: Option<ChromaDetector>,
    /// Removed from the union of detectors
    #[serde(default)]
    pub exclude: Vec<HsvRange>,
    pub cleanup: Cleanup,
}

impl ColorProfile {
    pub fn alert_red() -> Self {
        Self {
            hue_ranges: vec![
                HsvRange::new((0, 10), (100, 255), (100, 255)),
                HsvRange::new((170, 179), (100, 255), (100, 255)),
            ],
            channel_diff: Some(ChannelDiff { margin: 60 }),
            chroma: Some(ChromaDetector {
                floor: 40.0,
                k: 1.0,
                hue_band_deg: Some((340.0, 70.0)),
            }),
            // blue UI accent
            exclude: vec![HsvRange::new((90, 130), (60, 255), (60, 255))],
            cleanup: Cleanup {
                median_radius: 1,
                close_radius: 4,
                open_radius: 3,
            },
        }
    }

    pub fn warning_yellow() -> Self {
        Self {
            hue_ranges: vec![HsvRange::new((18, 35), (100, 255), (150, 255))],
            channel_diff: None,
            chroma: Some(ChromaDetector {
                floor: 40.0,
                k: 1.0,
                hue_band_deg: Some((65.0, 110.0)),
            }),
            exclude: Vec::new(),
            cleanup: Cleanup {
                median_radius: 1,
                close_radius: 3,
                open_radius: 2,
            },
        }
    }

    pub fn digit_white() -> Self {
        Self {
            hue_ranges: vec![HsvRange::new((0, 179), (0, 60), (200, 255))],
            channel_diff: None,
            chroma: None,
            exclude: Vec::new(),
            cleanup: Cleanup {
                median_radius: 0,
                close_radius: 0,
                open_radius: 1,
            },
        }
    }

    /// Structural checks used by config validation
    pub fn check(&self) -> Result<(), String> {
        if self.hue_ranges.len() > 2 {
            return Err(format!("at most 2 hue ranges, got {}", self.hue_ranges.len()));
        }
        for range in self.hue_ranges.iter().chain(&self.exclude) {
            if range.hue.1 > 179 || range.hue.0 > range.hue.1 {
                return Err(format!("invalid hue range {:?}", range.hue));
            }
            if range.saturation.0 > range.saturation.1 || range.value.0 > range.value.1 {
                return Err(format!("inverted range {:?}", range));
            }
        }
        if let Some(chroma) = &self.chroma {
            if chroma.k < 0.0 || !chroma.floor.is_finite() {
                return Err("chroma k must be >= 0 and floor finite".to_string());
            }
        }
        if self.hue_ranges.is_empty() && self.channel_diff.is_none() && self.chroma.is_none() {
            return Err("no detector enabled".to_string());
        }
        Ok(())
    }
}

/// Binary mask aligned to a region of the source image
#[derive(Debug, Clone)]
pub struct ColorMask {
    pub class: ColorClass,
    /// Region of the source image the mask covers
    pub region: BBox,
    pub mask: GrayImage,
}

impl ColorMask {
    /// Count of foreground pixels
    pub fn coverage(&self) -> u64 {
        self.mask.pixels().filter(|p| p[0] > 0).count() as u64
    }
}

/// Chroma threshold for a region: `max(floor, mean + max(k, 0) * stddev)`
pub fn adaptive_chroma_threshold(floor: f32, mean: f32, stddev: f32, k: f32) -> f32 {
    floor.max(mean + k.max(0.0) * stddev)
}

/// RGB to HSV on the OpenCV 8-bit scale
pub fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> (u8, u8, u8) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = (max - min) as f32;

    if max == 0 {
        return (0, 0, 0);
    }

    let saturation = (delta * 255.0 / max as f32).round() as u8;
    if delta == 0.0 {
        return (0, saturation, max);
    }

    let (r, g, b) = (r as f32, g as f32, b as f32);
    let max_f = max as f32;
    let mut hue = if max_f == r {
        60.0 * (g - b) / delta
    } else if max_f == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    (((hue / 2.0).round() as u8).min(179), saturation, max)
}

static SRGB_TO_LINEAR: Lazy<[f32; 256]> = Lazy::new(|| {
    let mut table = [0.0f32; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let c = i as f32 / 255.0;
        *slot = if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        };
    }
    table
});

/// sRGB (D65) to CIELAB `(L, a, b)`
pub fn rgb_to_lab(Rgb([r, g, b]): Rgb<u8>) -> (f32, f32, f32) {
    let r = SRGB_TO_LINEAR[r as usize];
    let g = SRGB_TO_LINEAR[g as usize];
    let b = SRGB_TO_LINEAR[b as usize];

    let x = (0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b) / 0.950_47;
    let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175 * b;
    let z = (0.019_333_9 * r + 0.119_192 * g + 0.950_304_1 * b) / 1.088_83;

    fn f(t: f32) -> f32 {
        const DELTA: f32 = 6.0 / 29.0;
        if t > DELTA * DELTA * DELTA {
            t.cbrt()
        } else {
            t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
        }
    }

    let (fx, fy, fz) = (f(x), f(y), f(z));
    (116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

fn hue_in_band(angle: f32, (start, end): (f32, f32)) -> bool {
    if start <= end {
        angle >= start && angle <= end
    } else {
        angle >= start || angle <= end
    }
}

fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean as f32, var.sqrt() as f32)
}

/// Segment already-cropped region pixels for one class
pub fn segment(region: &RgbImage, profile: &ColorProfile) -> GrayImage {
    let (width, height) = region.dimensions();
    let mut mask = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return mask;
    }

    let chroma_hits = profile.chroma.map(|detector| chroma_pass(region, &detector));

    for (x, y, pixel) in region.enumerate_pixels() {
        let hsv = rgb_to_hsv(*pixel);
        let idx = (y * width + x) as usize;

        let hit = profile.hue_ranges.iter().any(|range| range.contains(hsv))
            || profile.channel_diff.is_some_and(|diff| diff.matches(*pixel))
            || chroma_hits.as_ref().is_some_and(|pass| pass[idx]);
        let excluded = profile.exclude.iter().any(|range| range.contains(hsv));

        if hit && !excluded {
            mask.put_pixel(x, y, Luma([255]));
        }
    }

    cleanup(mask, &profile.cleanup)
}

fn chroma_pass(region: &RgbImage, detector: &ChromaDetector) -> Vec<bool> {
    let lab: Vec<(f32, f32)> = region
        .pixels()
        .map(|p| {
            let (_, a, b) = rgb_to_lab(*p);
            (a, b)
        })
        .collect();
    let chroma: Vec<f32> = lab.iter().map(|(a, b)| (a * a + b * b).sqrt()).collect();

    let (mean, stddev) = mean_std(&chroma);
    let threshold = adaptive_chroma_threshold(detector.floor, mean, stddev, detector.k);
    debug!(
        "Chroma threshold {:.1} (mean {:.1}, std {:.1})",
        threshold, mean, stddev
    );

    lab.iter()
        .zip(&chroma)
        .map(|(&(a, b), &c)| {
            if c < threshold {
                return false;
            }
            match detector.hue_band_deg {
                Some(band) => {
                    let angle = b.atan2(a).to_degrees().rem_euclid(360.0);
                    hue_in_band(angle, band)
                }
                None => true,
            }
        })
        .collect()
}

fn cleanup(mut mask: GrayImage, steps: &Cleanup) -> GrayImage {
    if steps.median_radius > 0 {
        mask = median_filter(&mask, steps.median_radius, steps.median_radius);
    }
    if steps.close_radius > 0 {
        mask = close(&mask, Norm::LInf, steps.close_radius);
    }
    if steps.open_radius > 0 {
        mask = open(&mask, Norm::LInf, steps.open_radius);
    }
    mask
}

/// Crop `bbox` out of `image` and segment it
pub fn segment_region(
    image: &RgbImage,
    bbox: BBox,
    class: ColorClass,
    profile: &ColorProfile,
) -> ColorMask {
    let bbox = bbox.clip_to(image.width(), image.height());
    let pixels = imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
    let mask = segment(&pixels, profile);

    ColorMask {
        class,
        region: bbox,
        mask,
    }
}
