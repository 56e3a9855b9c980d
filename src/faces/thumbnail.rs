//! Face thumbnail extraction.
//!
//! Crops the detected face region out of the decoded source image and
//! re-encodes it as a small JPEG for preview. The source image is never
//! mutated; boxes that overrun the image at the edges are clamped to the
//! image extents instead of failing.

use std::io::Cursor;

use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::db::BoundingBox;

use super::FaceError;

/// Render the pixels inside `bbox` as a standalone JPEG, downscaled so
/// its longest edge is at most `max_edge`.
pub fn crop(img: &DynamicImage, bbox: &BoundingBox, max_edge: u32) -> Result<Vec<u8>, FaceError> {
    let (x, y, w, h) = clamp_to_image(img, bbox);

    let mut face = img.crop_imm(x, y, w, h);
    if face.width() > max_edge || face.height() > max_edge {
        face = face.thumbnail(max_edge, max_edge);
    }

    let mut bytes = Vec::new();
    // JPEG cannot carry an alpha channel
    face.to_rgb8()
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
    Ok(bytes)
}

/// Clamp a bounding box to the image extents. Detection models report
/// boxes in source coordinates and can overshoot at the edges; the
/// clamped region is always at least one pixel.
fn clamp_to_image(img: &DynamicImage, bbox: &BoundingBox) -> (u32, u32, u32, u32) {
    let (img_w, img_h) = img.dimensions();

    let x = bbox.x.clamp(0, img_w as i32 - 1) as u32;
    let y = bbox.y.clamp(0, img_h as i32 - 1) as u32;
    let w = (bbox.width.max(1) as u32).min(img_w - x);
    let h = (bbox.height.max(1) as u32).min(img_h - y);

    (x, y, w.max(1), h.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbImage::new(w, h);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x % 256) as u8, (y % 256) as u8, 0]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn crop_produces_decodable_jpeg_of_expected_size() {
        let img = gradient(100, 80);
        let bbox = BoundingBox { x: 10, y: 20, width: 30, height: 40 };

        let bytes = crop(&img, &bbox, 160).unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (30, 40));
    }

    #[test]
    fn oversized_box_is_clamped_not_rejected() {
        let img = gradient(64, 64);
        // Overshoots on every side
        let bbox = BoundingBox { x: -10, y: 50, width: 100, height: 100 };

        let bytes = crop(&img, &bbox, 160).unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (64, 14));
    }

    #[test]
    fn source_image_is_not_mutated() {
        let img = gradient(32, 32);
        let before = img.clone().into_rgb8().into_raw();

        let bbox = BoundingBox { x: 4, y: 4, width: 8, height: 8 };
        crop(&img, &bbox, 160).unwrap();

        assert_eq!(img.into_rgb8().into_raw(), before);
    }

    #[test]
    fn large_crop_is_downscaled() {
        let img = gradient(400, 400);
        let bbox = BoundingBox { x: 0, y: 0, width: 400, height: 400 };

        let bytes = crop(&img, &bbox, 160).unwrap();
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert!(thumb.width() <= 160 && thumb.height() <= 160);
    }
}
