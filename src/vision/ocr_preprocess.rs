//! Image preprocessing filters for digit reading
//!
//! Small crops of rendered UI text are upscaled and contrast-equalized
//! before recognition; the recognizer works far better on large, evenly lit
//! glyphs than on 12 px anti-aliased ones.

use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use tracing::debug;

/// Upscale by an integer factor with bicubic (Catmull-Rom) filtering
pub fn upscale(image: &RgbImage, factor: u32) -> RgbImage {
    if factor <= 1 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    imageops::resize(
        image,
        image.width() * factor,
        image.height() * factor,
        imageops::FilterType::CatmullRom,
    )
}

/// Rec.601 luminance
pub fn luminance(image: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(image.width(), image.height());
    for (x, y, Rgb([r, g, b])) in image.enumerate_pixels() {
        let y_val = 0.299 * *r as f32 + 0.587 * *g as f32 + 0.114 * *b as f32;
        gray.put_pixel(x, y, Luma([y_val.round().clamp(0.0, 255.0) as u8]));
    }
    gray
}

/// Contrast-limited adaptive histogram equalization
///
/// `clip_limit` follows the usual convention: a histogram bin may hold at
/// most `clip_limit` times the uniform share of its tile; the excess is
/// spread evenly over all bins. Tile lookup tables are blended bilinearly.
pub fn clahe(image: &GrayImage, clip_limit: f32, tiles: (u32, u32)) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tile_w = width.div_ceil(tiles.0.clamp(1, width));
    let tile_h = height.div_ceil(tiles.1.clamp(1, height));
    // rounding the tile size up can leave trailing tiles past the edge
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts[(ty * tiles_x + tx) as usize] = tile_lut(image, x0, y0, x1, y1, clip_limit);
        }
    }

    let mut out = GrayImage::new(width, height);
    for (x, y, Luma([v])) in image.enumerate_pixels() {
        // position in tile-center space
        let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;

        let tx0 = gx.floor().clamp(0.0, (tiles_x - 1) as f32) as u32;
        let ty0 = gy.floor().clamp(0.0, (tiles_y - 1) as f32) as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fx = (gx - tx0 as f32).clamp(0.0, 1.0);
        let fy = (gy - ty0 as f32).clamp(0.0, 1.0);

        let at = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][*v as usize] as f32;
        let top = at(tx0, ty0) * (1.0 - fx) + at(tx1, ty0) * fx;
        let bottom = at(tx0, ty1) * (1.0 - fx) + at(tx1, ty1) * fx;
        let value = top * (1.0 - fy) + bottom * fy;

        out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }

    out
}

fn tile_lut(image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[image.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let pixels = ((x1 - x0) * (y1 - y0)).max(1);
    if clip_limit > 0.0 {
        let limit = ((clip_limit * pixels as f32 / 256.0).ceil() as u32).max(1);
        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let share = excess / 256;
        let remainder = (excess % 256) as usize;
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin += share + u32::from(i < remainder);
        }
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    let scale = 255.0 / pixels as f32;
    for (i, count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Full preparation of a crop for the recognizer
///
/// Upscale, then equalize luminance; the result is gray replicated over
/// three channels.
pub fn prepare_for_recognition(
    crop: &RgbImage,
    factor: u32,
    clip_limit: f32,
    tiles: (u32, u32),
) -> RgbImage {
    let scaled = upscale(crop, factor);
    let equalized = clahe(&luminance(&scaled), clip_limit, tiles);

    debug!(
        "Prepared crop {:?} -> {:?} (x{}, clip {})",
        crop.dimensions(),
        equalized.dimensions(),
        factor,
        clip_limit
    );

    let mut out = RgbImage::new(equalized.width(), equalized.height());
    for (x, y, Luma([v])) in equalized.enumerate_pixels() {
        out.put_pixel(x, y, Rgb([*v, *v, *v]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luminance() {
        let img = RgbImage::from_pixel(1, 1, Rgb([255, 0, 0]));
        // 0.299 * 255 = 76.2
        assert_eq!(luminance(&img).get_pixel(0, 0)[0], 76);
    }

    #[test]
    fn test_upscale_dimensions() {
        let img = RgbImage::new(7, 3);
        assert_eq!(upscale(&img, 3).dimensions(), (21, 9));
        assert_eq!(upscale(&img, 1).dimensions(), (7, 3));
        assert_eq!(upscale(&RgbImage::new(0, 0), 2).dimensions(), (0, 0));
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        // two close gray levels
        let mut img = GrayImage::from_pixel(32, 32, Luma([120]));
        for y in 0..32 {
            for x in 16..32 {
                img.put_pixel(x, y, Luma([130]));
            }
        }
        let spread = |clip: f32| {
            let out = clahe(&img, clip, (1, 1));
            out.get_pixel(30, 30)[0] as i32 - out.get_pixel(2, 2)[0] as i32
        };
        // clipping limits the stretch, plain equalization maximizes it
        assert!(spread(40.0) > 30);
        assert!(spread(0.0) > 100);
        assert!(spread(0.0) >= spread(40.0));
    }

    #[test]
    fn test_clahe_uniform_stays_uniform() {
        let img = GrayImage::from_pixel(40, 20, Luma([90]));
        let out = clahe(&img, 2.0, (4, 2));
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn test_clahe_dense_grid_on_narrow_crops() {
        for width in 1..30 {
            let mut img = RgbImage::from_pixel(width, 40, Rgb([40, 40, 40]));
            img.put_pixel(width / 2, 20, Rgb([220, 220, 220]));
            let out = prepare_for_recognition(&img, 2, 2.0, (8, 8));
            assert_eq!(out.dimensions(), (width * 2, 80));
        }
        // more tiles than pixels
        let out = clahe(&GrayImage::from_pixel(3, 2, Luma([50])), 2.0, (8, 8));
        assert_eq!(out.dimensions(), (3, 2));
    }

    #[test]
    fn test_prepare_outputs_gray_rgb() {
        let img = RgbImage::from_pixel(5, 4, Rgb([10, 200, 30]));
        let out = prepare_for_recognition(&img, 2, 2.0, (2, 2));
        assert_eq!(out.dimensions(), (10, 8));
        let Rgb([r, g, b]) = *out.get_pixel(3, 3);
        assert!(r == g && g == b);
    }
}
