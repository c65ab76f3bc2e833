//! Nearest-neighbor downscaling
//!
//! No interpolation: every destination pixel is a verbatim copy of one source pixel, which
//! keeps the output deterministic for a given source and bounding box.

use image::RgbaImage;

/// Fit `width`×`height` inside a `max_side` square, preserving aspect ratio.
///
/// Images already inside the box keep their size. Scaled axes are rounded down, with a
/// floor of one pixel.
pub fn target_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let (mut target_width, mut target_height) = (width, height);

    if width > max_side || height > max_side {
        if width >= height {
            target_width = max_side;
            target_height = (height as u64 * max_side as u64 / width as u64) as u32;
        } else {
            target_height = max_side;
            target_width = (width as u64 * max_side as u64 / height as u64) as u32;
        }
    }

    (target_width.max(1), target_height.max(1))
}

/// Sample `src` into a new `target_width`×`target_height` grid
pub fn resize_nearest(src: &RgbaImage, target_width: u32, target_height: u32) -> RgbaImage {
    let target_width = target_width.max(1);
    let target_height = target_height.max(1);
    let (src_width, src_height) = src.dimensions();
    if src_width == 0 || src_height == 0 {
        return RgbaImage::new(target_width, target_height);
    }

    RgbaImage::from_fn(target_width, target_height, |x, y| {
        let src_x = (x as u64 * src_width as u64 / target_width as u64) as u32;
        let src_y = (y as u64 * src_height as u64 / target_height as u64) as u32;
        *src.get_pixel(src_x, src_y)
    })
}
