//! SSD face detector via ONNX Runtime.
//!
//! Runs the OpenCV res10 SSD face detector (ResNet-10 backbone, 300×300 input)
//! exported to ONNX. The network emits `[1, 1, N, 7]` rows of
//! `[image_id, label, confidence, x1, y1, x2, y2]` with normalized corners.

use crate::onnx;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SSD_INPUT_SIZE: u32 = 300;
/// Per-channel means in RGB order (the BGR source is channel-swapped first).
const SSD_MEAN: [f32; 3] = [104.0, 117.0, 123.0];
const SSD_ROW_LEN: usize = 7;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates faces in a decoded image.
pub trait FaceLocator {
    /// Return every face above the confidence threshold, in the network's native order.
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// SSD-based face detector.
pub struct SsdFaceDetector {
    session: Session,
    confidence_threshold: f32,
}

impl SsdFaceDetector {
    /// Load the SSD ONNX model from the given path.
    pub fn load(
        model_path: &Path,
        confidence_threshold: f32,
        intra_threads: usize,
    ) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = onnx::open_session(model_path, intra_threads, "SSD face detector")?;
        onnx::require_outputs(session.outputs().len(), "SSD")
            .map_err(DetectorError::InferenceFailed)?;

        Ok(Self {
            session,
            confidence_threshold,
        })
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Resize to 300×300 and build a mean-subtracted NCHW tensor in RGB order.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let size = SSD_INPUT_SIZE as usize;
        let resized = imageops::resize(image, SSD_INPUT_SIZE, SSD_INPUT_SIZE, FilterType::Triangle);
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for (c, mean) in SSD_MEAN.iter().enumerate() {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 - mean;
            }
        }

        tensor
    }
}

impl FaceLocator for SsdFaceDetector {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = Self::preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detections: {e}")))?;

        let faces = decode_detections(raw, image.width(), image.height(), self.confidence_threshold);
        tracing::debug!(
            candidates = raw.len() / SSD_ROW_LEN,
            accepted = faces.len(),
            "SSD detection complete"
        );

        Ok(faces)
    }
}

/// Convert raw SSD rows into pixel-space boxes, keeping rows above `threshold`.
///
/// Coordinates are scaled by the original image size and truncated toward
/// zero. Order follows the network output; nothing is sorted or suppressed.
fn decode_detections(raw: &[f32], width: u32, height: u32, threshold: f32) -> Vec<BoundingBox> {
    let w = width as f32;
    let h = height as f32;

    raw.chunks_exact(SSD_ROW_LEN)
        .filter(|row| row[2] > threshold)
        .map(|row| BoundingBox {
            x1: (row[3] * w) as i32,
            y1: (row[4] * h) as i32,
            x2: (row[5] * w) as i32,
            y2: (row[6] * h) as i32,
            confidence: row[2],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn row(conf: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> [f32; 7] {
        [0.0, 1.0, conf, x1, y1, x2, y2]
    }

    #[test]
    fn test_decode_scales_to_pixels() {
        let raw = row(0.95, 0.25, 0.1, 0.75, 0.6);
        let faces = decode_detections(&raw, 400, 200, 0.7);
        assert_eq!(faces.len(), 1);
        let f = faces[0];
        assert_eq!((f.x1, f.y1, f.x2, f.y2), (100, 20, 300, 120));
        assert!((f.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_decode_threshold_is_exclusive() {
        let raw = row(0.7, 0.1, 0.1, 0.2, 0.2);
        assert!(decode_detections(&raw, 100, 100, 0.7).is_empty());
    }

    #[test]
    fn test_decode_preserves_native_order() {
        let mut raw = Vec::new();
        raw.extend(row(0.8, 0.5, 0.5, 0.6, 0.6));
        raw.extend(row(0.2, 0.0, 0.0, 0.1, 0.1));
        raw.extend(row(0.99, 0.1, 0.1, 0.3, 0.3));
        let faces = decode_detections(&raw, 100, 100, 0.7);
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].x1, 50);
        assert_eq!(faces[1].x1, 10);
    }

    #[test]
    fn test_decode_truncates_toward_zero() {
        let raw = row(0.9, -0.015, 0.333, 0.999, 1.025);
        let faces = decode_detections(&raw, 100, 100, 0.5);
        assert_eq!((faces[0].x1, faces[0].y1, faces[0].x2, faces[0].y2), (-1, 33, 99, 102));
    }

    #[test]
    fn test_decode_ignores_trailing_partial_row() {
        let mut raw = row(0.9, 0.1, 0.1, 0.2, 0.2).to_vec();
        raw.extend([0.0, 1.0, 0.99]);
        assert_eq!(decode_detections(&raw, 10, 10, 0.5).len(), 1);
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode_detections(&[], 640, 480, 0.7).is_empty());
    }

    #[test]
    fn test_preprocess_shape_and_means() {
        let image = RgbImage::from_pixel(64, 48, Rgb([104, 117, 123]));
        let tensor = SsdFaceDetector::preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 300, 300]);
        // Resampling a uniform image may shift values by one rounding step.
        assert!(tensor.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_preprocess_channel_order_rgb() {
        let image = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
        let tensor = SsdFaceDetector::preprocess(&image);
        assert!((tensor[[0, 0, 150, 150]] - (255.0 - 104.0)).abs() <= 1.0);
        assert!((tensor[[0, 1, 150, 150]] + 117.0).abs() <= 1.0);
        assert!((tensor[[0, 2, 150, 150]] + 123.0).abs() <= 1.0);
    }

    #[test]
    fn test_load_missing_model() {
        let err = SsdFaceDetector::load(Path::new("/nonexistent/face.onnx"), 0.7, 1)
            .err()
            .unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
