//! Facial emotion analysis.
//!
//! The analyzer runs on an already-located face crop: there is no internal
//! face-presence check and only the emotion action is computed. Failures are
//! recovered by the caller, never propagated to the request.

use crate::onnx;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Placeholder label when emotion analysis fails.
pub const UNKNOWN_EMOTION: &str = "Unknown";

/// FER-2013 class order used by the bundled emotion model.
pub const EMOTION_LABELS: [&str; 7] = ["angry", "disgust", "fear", "happy", "sad", "surprise", "neutral"];

const EMOTION_DEFAULT_INPUT_SIZE: usize = 48;

#[derive(Error, Debug)]
pub enum EmotionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("analysis produced no result")]
    NoResult,
    #[error("malformed result: {0}")]
    MalformedResult(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Determines the dominant emotion of a face crop.
pub trait EmotionAnalyzer {
    fn dominant_emotion(&mut self, face: &RgbImage) -> Result<String, EmotionError>;
}

/// Outcome of the emotion step, collapsed to a label by [`EmotionOutcome::into_label`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmotionOutcome {
    Detected(String),
    Failed,
}

impl EmotionOutcome {
    /// Run `analyzer`, logging and absorbing any failure.
    pub fn analyze<E: EmotionAnalyzer + ?Sized>(analyzer: &mut E, face: &RgbImage) -> Self {
        match analyzer.dominant_emotion(face) {
            Ok(label) => EmotionOutcome::Detected(label),
            Err(err) => {
                tracing::warn!(error = %err, "emotion analysis failed; reporting {UNKNOWN_EMOTION}");
                EmotionOutcome::Failed
            }
        }
    }

    pub fn into_label(self) -> String {
        match self {
            EmotionOutcome::Detected(label) => label,
            EmotionOutcome::Failed => UNKNOWN_EMOTION.to_string(),
        }
    }
}

/// Memory layout of the emotion model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `[1, 1, H, W]`
    Nchw,
    /// `[1, H, W, 1]` (Keras exports)
    Nhwc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InputSpec {
    layout: Layout,
    width: usize,
    height: usize,
}

impl InputSpec {
    /// Infer layout and size from a declared input shape.
    ///
    /// A single channel at axis 1 means NCHW; otherwise NHWC. Dynamic or
    /// missing spatial dimensions fall back to 48×48.
    fn from_shape(shape: Option<&[i64]>) -> Self {
        let dim = |v: i64| if v > 0 { v as usize } else { EMOTION_DEFAULT_INPUT_SIZE };
        match shape {
            Some(&[_, 1, h, w]) => Self { layout: Layout::Nchw, width: dim(w), height: dim(h) },
            Some(&[_, h, w, _]) => Self { layout: Layout::Nhwc, width: dim(w), height: dim(h) },
            _ => Self {
                layout: Layout::Nhwc,
                width: EMOTION_DEFAULT_INPUT_SIZE,
                height: EMOTION_DEFAULT_INPUT_SIZE,
            },
        }
    }
}

/// Grayscale CNN emotion classifier backed by an ONNX session.
pub struct OnnxEmotionAnalyzer {
    session: Session,
    input: InputSpec,
}

impl OnnxEmotionAnalyzer {
    /// Load the emotion ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, EmotionError> {
        if !model_path.exists() {
            return Err(EmotionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = onnx::open_session(model_path, intra_threads, "emotion")?;
        onnx::require_outputs(session.outputs().len(), "emotion").map_err(EmotionError::InvalidModel)?;
        let input = InputSpec::from_shape(onnx::input_shape(&session).as_deref());
        tracing::debug!(?input, "emotion input layout");

        Ok(Self { session, input })
    }
}

/// Grayscale, resize to the model's input size, and scale pixels to [0, 1].
fn preprocess(face: &RgbImage, spec: InputSpec) -> Array4<f32> {
    let InputSpec { layout, width, height } = spec;
    let gray = imageops::grayscale(face);
    let resized = imageops::resize(&gray, width as u32, height as u32, FilterType::Triangle);

    let mut tensor = match layout {
        Layout::Nchw => Array4::<f32>::zeros((1, 1, height, width)),
        Layout::Nhwc => Array4::<f32>::zeros((1, height, width, 1)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = pixel[0] as f32 / 255.0;
        let (x, y) = (x as usize, y as usize);
        match layout {
            Layout::Nchw => tensor[[0, 0, y, x]] = value,
            Layout::Nhwc => tensor[[0, y, x, 0]] = value,
        }
    }

    tensor
}

/// Map a 7-class score vector to its dominant label.
fn dominant_label(scores: &[f32]) -> Result<&'static str, EmotionError> {
    if scores.is_empty() {
        return Err(EmotionError::NoResult);
    }
    if scores.len() != EMOTION_LABELS.len() {
        return Err(EmotionError::MalformedResult(format!(
            "expected {} emotion scores, got {}",
            EMOTION_LABELS.len(),
            scores.len()
        )));
    }
    onnx::argmax(scores)
        .map(|idx| EMOTION_LABELS[idx])
        .ok_or_else(|| EmotionError::MalformedResult("all emotion scores are NaN".into()))
}

impl EmotionAnalyzer for OnnxEmotionAnalyzer {
    fn dominant_emotion(&mut self, face: &RgbImage) -> Result<String, EmotionError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(EmotionError::NoResult);
        }

        let input = preprocess(face, self.input);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmotionError::MalformedResult(format!("emotion scores: {e}")))?;

        let label = dominant_label(scores)?;
        tracing::debug!(?scores, label, "emotion scores");
        Ok(label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    struct Fixed(&'static str);

    impl EmotionAnalyzer for Fixed {
        fn dominant_emotion(&mut self, _face: &RgbImage) -> Result<String, EmotionError> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    impl EmotionAnalyzer for Broken {
        fn dominant_emotion(&mut self, _face: &RgbImage) -> Result<String, EmotionError> {
            Err(EmotionError::MalformedResult("injected".into()))
        }
    }

    fn face() -> RgbImage {
        RgbImage::from_pixel(20, 20, Rgb([90, 90, 90]))
    }

    #[test]
    fn test_outcome_detected() {
        let outcome = EmotionOutcome::analyze(&mut Fixed("happy"), &face());
        assert_eq!(outcome, EmotionOutcome::Detected("happy".into()));
        assert_eq!(outcome.into_label(), "happy");
    }

    #[test]
    fn test_outcome_failure_collapses_to_unknown() {
        let outcome = EmotionOutcome::analyze(&mut Broken, &face());
        assert_eq!(outcome, EmotionOutcome::Failed);
        assert_eq!(outcome.into_label(), UNKNOWN_EMOTION);
    }

    #[test]
    fn test_outcome_through_trait_object() {
        let mut analyzer: Box<dyn EmotionAnalyzer> = Box::new(Broken);
        let outcome = EmotionOutcome::analyze(analyzer.as_mut(), &face());
        assert_eq!(outcome.into_label(), "Unknown");
    }

    #[test]
    fn test_dominant_label() {
        let scores = [0.01, 0.0, 0.02, 0.9, 0.03, 0.02, 0.02];
        assert_eq!(dominant_label(&scores).unwrap(), "happy");
    }

    #[test]
    fn test_dominant_label_errors() {
        assert!(matches!(dominant_label(&[]), Err(EmotionError::NoResult)));
        assert!(matches!(
            dominant_label(&[0.5, 0.5]),
            Err(EmotionError::MalformedResult(_))
        ));
        assert!(matches!(
            dominant_label(&[f32::NAN; 7]),
            Err(EmotionError::MalformedResult(_))
        ));
    }

    #[test]
    fn test_input_spec_nchw() {
        let spec = InputSpec::from_shape(Some(&[1, 1, 64, 64]));
        assert_eq!(spec, InputSpec { layout: Layout::Nchw, width: 64, height: 64 });
    }

    #[test]
    fn test_input_spec_nhwc_dynamic_batch() {
        let spec = InputSpec::from_shape(Some(&[-1, 48, 48, 1]));
        assert_eq!(spec, InputSpec { layout: Layout::Nhwc, width: 48, height: 48 });
    }

    #[test]
    fn test_input_spec_dynamic_spatial_falls_back() {
        let spec = InputSpec::from_shape(Some(&[1, 1, -1, -1]));
        assert_eq!((spec.width, spec.height), (48, 48));
        assert_eq!(spec.layout, Layout::Nchw);
    }

    #[test]
    fn test_input_spec_unknown_shape() {
        let spec = InputSpec::from_shape(None);
        assert_eq!(spec.layout, Layout::Nhwc);
        assert_eq!((spec.width, spec.height), (48, 48));
    }

    #[test]
    fn test_preprocess_nchw_scaling() {
        let spec = InputSpec { layout: Layout::Nchw, width: 48, height: 48 };
        let tensor = preprocess(&RgbImage::from_pixel(100, 80, Rgb([128, 128, 128])), spec);
        assert_eq!(tensor.shape(), &[1, 1, 48, 48]);
        // Resampling a uniform image may shift values by one rounding step.
        assert!(tensor.iter().all(|v| (v - 128.0 / 255.0).abs() <= 1.0 / 255.0 + 1e-6));
    }

    #[test]
    fn test_preprocess_nhwc_layout() {
        let spec = InputSpec { layout: Layout::Nhwc, width: 64, height: 32 };
        let tensor = preprocess(&RgbImage::from_pixel(20, 20, Rgb([128, 128, 128])), spec);
        assert_eq!(tensor.shape(), &[1, 32, 64, 1]);
        assert!(tensor.iter().all(|v| (v - 128.0 / 255.0).abs() <= 1.0 / 255.0 + 1e-6));
    }

    #[test]
    fn test_preprocess_is_grayscale_in_unit_range() {
        let spec = InputSpec { layout: Layout::Nchw, width: 48, height: 48 };
        let white = preprocess(&RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])), spec);
        assert!(white.iter().all(|v| (v - 1.0).abs() <= 1.0 / 255.0 + 1e-6));
        let black = preprocess(&RgbImage::from_pixel(10, 10, Rgb([0, 0, 0])), spec);
        assert!(black.iter().all(|&v| v == 0.0));
        // Pure red collapses to a single luma channel, well below full scale.
        let red = preprocess(&RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])), spec);
        assert!(red.iter().all(|&v| v > 0.0 && v < 0.5));
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxEmotionAnalyzer::load(Path::new("/nonexistent/emotion.onnx"), 1)
            .err()
            .unwrap();
        assert!(matches!(err, EmotionError::ModelNotFound(_)));
    }
}
