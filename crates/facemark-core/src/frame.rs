//! Frame type, capture interface and frame-level image helpers.

use crate::types::BoundingBox;
use chrono::NaiveDateTime;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("capture failed {attempts} times in a row; last error: {last}")]
    Exhausted {
        attempts: usize,
        last: String,
    },
}

/// A captured colour frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: NaiveDateTime,
    pub sequence: u64,
}

/// Pull-based source of frames, e.g. a camera.
pub trait FrameSource {
    /// Block until the next frame is available.
    ///
    /// `Ok(None)` signals end of stream; a live camera never returns it.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// A frame shrunk for extraction, plus the factors that undo the shrink.
pub struct Downsampled {
    pub image: RgbImage,
    /// `full_width / small_width`.
    pub scale_x: f32,
    /// `full_height / small_height`.
    pub scale_y: f32,
}

impl Downsampled {
    /// Map a box detected on the small image onto the full frame.
    pub fn to_full_frame(&self, region: &BoundingBox) -> BoundingBox {
        region.rescaled(self.scale_x, self.scale_y)
    }
}

/// Shrink `image` by an integer `factor` (1 = no resize).
///
/// Scale factors are derived from the actual output size, so rounding of odd
/// dimensions is accounted for when boxes are mapped back.
pub fn downsample(image: &RgbImage, factor: u32) -> Downsampled {
    let factor = factor.max(1);
    if factor == 1 || image.width() == 0 || image.height() == 0 {
        return Downsampled {
            image: image.clone(),
            scale_x: 1.0,
            scale_y: 1.0,
        };
    }

    let width = (image.width() / factor).max(1);
    let height = (image.height() / factor).max(1);
    let small = imageops::resize(image, width, height, FilterType::Triangle);

    Downsampled {
        scale_x: image.width() as f32 / width as f32,
        scale_y: image.height() as f32 / height as f32,
        image: small,
    }
}

/// Draw a rectangle outline on `image`, clipped to its bounds.
pub fn draw_box(image: &mut RgbImage, region: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(h - 1);

    let left = clamp_x(region.x);
    let right = clamp_x(region.x + region.width);
    let top = clamp_y(region.y);
    let bottom = clamp_y(region.y + region.height);

    for t in 0..thickness {
        for x in left..=right {
            if let Some(y) = top.checked_add(t).filter(|&y| y <= bottom) {
                image.put_pixel(x, y, color);
            }
            if let Some(y) = bottom.checked_sub(t).filter(|&y| y >= top) {
                image.put_pixel(x, y, color);
            }
        }
        for y in top..=bottom {
            if let Some(x) = left.checked_add(t).filter(|&x| x <= right) {
                image.put_pixel(x, y, color);
            }
            if let Some(x) = right.checked_sub(t).filter(|&x| x >= left) {
                image.put_pixel(x, y, color);
            }
        }
    }
}

/// Height in pixels of text drawn by [`draw_text`] at scale 1.
pub const GLYPH_SIZE: u32 = 8;

/// Draw `text` with its top-left corner at (`x`, `y`) using an 8x8 bitmap
/// font, each font pixel `scale` pixels wide. Clipped to the image; characters
/// without a glyph leave a blank cell.
pub fn draw_text(image: &mut RgbImage, x: i64, y: i64, text: &str, color: Rgb<u8>, scale: u32) {
    let scale = i64::from(scale.max(1));
    let cell = i64::from(GLYPH_SIZE) * scale;
    let (w, h) = (i64::from(image.width()), i64::from(image.height()));

    for (i, c) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(c) else {
            continue;
        };
        let left = x + i as i64 * cell;
        for (row, bits) in glyph.iter().copied().enumerate() {
            for col in 0..8u8 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let px = left + i64::from(col) * scale;
                let py = y + row as i64 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (tx, ty) = (px + dx, py + dy);
                        if (0..w).contains(&tx) && (0..h).contains(&ty) {
                            image.put_pixel(tx as u32, ty as u32, color);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_factor_four() {
        let img = RgbImage::new(640, 360);
        let small = downsample(&img, 4);
        assert_eq!(small.image.dimensions(), (160, 90));
        assert_eq!(small.scale_x, 4.0);
        assert_eq!(small.scale_y, 4.0);
    }

    #[test]
    fn test_rescale_inverts_downsample_exactly() {
        let img = RgbImage::new(640, 360);
        let small = downsample(&img, 4);
        let detected = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 15.0,
        };
        let full = small.to_full_frame(&detected);
        assert_eq!(
            full,
            BoundingBox {
                x: 40.0,
                y: 80.0,
                width: 120.0,
                height: 60.0,
            }
        );
    }

    #[test]
    fn test_downsample_odd_dimensions_uses_actual_ratio() {
        let img = RgbImage::new(642, 361);
        let small = downsample(&img, 4);
        assert_eq!(small.image.dimensions(), (160, 90));
        let corner = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 160.0,
            height: 90.0,
        };
        let full = small.to_full_frame(&corner);
        assert!((full.width - 642.0).abs() < 1e-3);
        assert!((full.height - 361.0).abs() < 1e-3);
    }

    #[test]
    fn test_downsample_factor_one_is_identity() {
        let img = RgbImage::from_pixel(3, 2, Rgb([9, 9, 9]));
        let same = downsample(&img, 1);
        assert_eq!(same.image, img);
        assert_eq!((same.scale_x, same.scale_y), (1.0, 1.0));
    }

    #[test]
    fn test_draw_box_outline_only() {
        let mut img = RgbImage::new(10, 10);
        let green = Rgb([0, 255, 0]);
        let region = BoundingBox {
            x: 2.0,
            y: 2.0,
            width: 5.0,
            height: 5.0,
        };
        draw_box(&mut img, &region, green, 1);
        assert_eq!(*img.get_pixel(2, 2), green);
        assert_eq!(*img.get_pixel(7, 7), green);
        assert_eq!(*img.get_pixel(4, 2), green);
        assert_eq!(*img.get_pixel(4, 4), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_text_stays_in_its_cell() {
        let mut img = RgbImage::new(32, 32);
        let red = Rgb([255, 0, 0]);
        draw_text(&mut img, 4, 4, "A", red, 2);

        let painted: Vec<(u32, u32)> = img
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == red)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!painted.is_empty());
        let cell = 4..20;
        assert!(painted
            .iter()
            .all(|(x, y)| cell.contains(x) && cell.contains(y)));
    }

    #[test]
    fn test_draw_text_clips_negative_origin() {
        let mut img = RgbImage::new(8, 8);
        draw_text(&mut img, -100, -100, "alice", Rgb([1, 1, 1]), 1);
        draw_text(&mut img, -3, -3, "W", Rgb([1, 1, 1]), 1);
        assert!(img.pixels().any(|p| *p == Rgb([1, 1, 1])));
    }

    #[test]
    fn test_draw_box_clips_to_image() {
        let mut img = RgbImage::new(4, 4);
        let region = BoundingBox {
            x: -5.0,
            y: -5.0,
            width: 100.0,
            height: 100.0,
        };
        draw_box(&mut img, &region, Rgb([255, 0, 0]), 2);
        assert_eq!(*img.get_pixel(3, 3), Rgb([255, 0, 0]));
    }
}
