//! Age and gender classification via ONNX Runtime.
//!
//! Both networks are the Levi & Hassner Caffe models exported to ONNX. They
//! share one 227×227 BGR input tensor and each return a score vector.

use crate::onnx;
use crate::types::{AgeBracket, Demographics, Gender};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from the SSD detector!) ---
const CLASSIFIER_INPUT_SIZE: u32 = 227;
/// Per-channel means in BGR order. No channel swap for these networks.
const CLASSIFIER_MEAN_BGR: [f32; 3] = [78.426_34, 87.768_91, 114.895_85];

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("{network} network returned {actual} scores, expected {expected}")]
    UnexpectedScores {
        network: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Estimates age bracket and gender for a face crop.
pub trait DemographicClassifier {
    fn classify(&mut self, face: &RgbImage) -> Result<Demographics, ClassifierError>;
}

/// Age + gender classifier backed by two ONNX sessions.
pub struct CaffeNetClassifier {
    age: Session,
    gender: Session,
}

impl CaffeNetClassifier {
    /// Load the age and gender ONNX models.
    pub fn load(age_path: &Path, gender_path: &Path, intra_threads: usize) -> Result<Self, ClassifierError> {
        for path in [age_path, gender_path] {
            if !path.exists() {
                return Err(ClassifierError::ModelNotFound(path.display().to_string()));
            }
        }

        let age = onnx::open_session(age_path, intra_threads, "age")?;
        let gender = onnx::open_session(gender_path, intra_threads, "gender")?;
        onnx::require_outputs(age.outputs().len(), "age").map_err(ClassifierError::InferenceFailed)?;
        onnx::require_outputs(gender.outputs().len(), "gender").map_err(ClassifierError::InferenceFailed)?;

        Ok(Self { age, gender })
    }

    /// Resize to 227×227 and build a mean-subtracted NCHW tensor in BGR order.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = CLASSIFIER_INPUT_SIZE as usize;
        let resized = imageops::resize(
            face,
            CLASSIFIER_INPUT_SIZE,
            CLASSIFIER_INPUT_SIZE,
            FilterType::Triangle,
        );
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            // RGB → BGR
            tensor[[0, 0, y, x]] = pixel[2] as f32 - CLASSIFIER_MEAN_BGR[0];
            tensor[[0, 1, y, x]] = pixel[1] as f32 - CLASSIFIER_MEAN_BGR[1];
            tensor[[0, 2, y, x]] = pixel[0] as f32 - CLASSIFIER_MEAN_BGR[2];
        }

        tensor
    }
}

/// Run one session and return its flattened score vector.
fn scores(session: &mut Session, input: &Array4<f32>, network: &'static str) -> Result<Vec<f32>, ClassifierError> {
    let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
    let (_, raw) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| ClassifierError::InferenceFailed(format!("{network} scores: {e}")))?;
    Ok(raw.to_vec())
}

/// Pick the best-scoring class. The score vector must match the label count exactly.
fn best_index(scores: &[f32], expected: usize, network: &'static str) -> Result<usize, ClassifierError> {
    if scores.len() != expected {
        return Err(ClassifierError::UnexpectedScores {
            network,
            expected,
            actual: scores.len(),
        });
    }
    onnx::argmax(scores)
        .ok_or_else(|| ClassifierError::InferenceFailed(format!("{network} scores are all NaN")))
}

/// Map raw gender and age score vectors to labels.
fn decode_demographics(gender_scores: &[f32], age_scores: &[f32]) -> Result<Demographics, ClassifierError> {
    let gender_idx = best_index(gender_scores, Gender::ALL.len(), "gender")?;
    let age_idx = best_index(age_scores, AgeBracket::ALL.len(), "age")?;

    // Lengths were checked above, so both lookups succeed.
    Ok(Demographics {
        gender: Gender::ALL[gender_idx],
        age: AgeBracket::ALL[age_idx],
    })
}

impl DemographicClassifier for CaffeNetClassifier {
    fn classify(&mut self, face: &RgbImage) -> Result<Demographics, ClassifierError> {
        let input = Self::preprocess(face);

        let gender_scores = scores(&mut self.gender, &input, "gender")?;
        let age_scores = scores(&mut self.age, &input, "age")?;
        tracing::debug!(?gender_scores, ?age_scores, "demographic scores");

        decode_demographics(&gender_scores, &age_scores)
    }
}
