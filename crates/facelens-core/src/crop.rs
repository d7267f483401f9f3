//! Padded face crops.
//!
//! The crop end bound is clamped to `dimension - 1` (exclusive), so a crop
//! never reaches the last row or column of the source image.

use crate::types::BoundingBox;
use image::imageops;
use image::RgbImage;
use thiserror::Error;

/// Margin added on each side of a detected face before classification.
pub const DEFAULT_FACE_PADDING: u32 = 20;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CropError {
    #[error("padded crop of {bbox:?} is empty within a {width}x{height} image")]
    Empty {
        bbox: (i32, i32, i32, i32),
        width: u32,
        height: u32,
    },
}

/// Crop region within the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Expand `bbox` by `padding` on every side and clamp it to the image.
pub fn padded_region(
    bbox: &BoundingBox,
    image_width: u32,
    image_height: u32,
    padding: u32,
) -> Result<CropRegion, CropError> {
    let pad = i64::from(padding);
    let (x_start, x_end) = clamp_span(bbox.x1, bbox.x2, pad, image_width);
    let (y_start, y_end) = clamp_span(bbox.y1, bbox.y2, pad, image_height);

    if x_end <= x_start || y_end <= y_start {
        return Err(CropError::Empty {
            bbox: (bbox.x1, bbox.y1, bbox.x2, bbox.y2),
            width: image_width,
            height: image_height,
        });
    }

    // Both spans lie inside [0, dim - 1), so the casts cannot truncate.
    Ok(CropRegion {
        x: x_start as u32,
        y: y_start as u32,
        width: (x_end - x_start) as u32,
        height: (y_end - y_start) as u32,
    })
}

/// `[max(0, lo - pad), min(hi + pad, dim - 1))`
fn clamp_span(lo: i32, hi: i32, pad: i64, dim: u32) -> (i64, i64) {
    let start = (i64::from(lo) - pad).max(0);
    let end = (i64::from(hi) + pad).min(i64::from(dim) - 1);
    (start, end)
}

/// Copy the padded face region out of `image`.
pub fn crop_face(image: &RgbImage, bbox: &BoundingBox, padding: u32) -> Result<RgbImage, CropError> {
    let region = padded_region(bbox, image.width(), image.height(), padding)?;
    tracing::debug!(?region, "face crop");
    Ok(imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image())
}
