//! The per-request analysis pipeline: decode → detect → crop → classify.
//!
//! [`ModelBundle`] owns every loaded network. It is built once at startup and
//! handed to whoever serializes access to it (the daemon's engine thread, or
//! the CLI directly). Each request ends in exactly one [`Outcome`].

use crate::classifier::{CaffeNetClassifier, ClassifierError, DemographicClassifier};
use crate::crop::{self, CropError, DEFAULT_FACE_PADDING};
use crate::decode::{self, DecodeError};
use crate::detector::{DetectorError, FaceLocator, SsdFaceDetector, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::emotion::{EmotionAnalyzer, EmotionError, EmotionOutcome, OnnxEmotionAnalyzer};
use crate::types::Analysis;
use image::RgbImage;
use serde_json::json;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FACE_DETECTOR_FILE: &str = "opencv_face_detector.onnx";
pub const AGE_MODEL_FILE: &str = "age_net.onnx";
pub const GENDER_MODEL_FILE: &str = "gender_net.onnx";
pub const EMOTION_MODEL_FILE: &str = "emotion_model.onnx";

pub const BAD_INPUT_MESSAGE: &str = "No image data provided";
pub const NO_FACE_MESSAGE: &str = "No face detected";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("age/gender classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("emotion analyzer: {0}")]
    Emotion(#[from] EmotionError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("detect: {0}")]
    Detector(#[from] DetectorError),
    #[error("crop: {0}")]
    Crop(#[from] CropError),
    #[error("classify: {0}")]
    Classifier(#[from] ClassifierError),
}

/// On-disk locations of every model the bundle loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub face_detector: PathBuf,
    pub age: PathBuf,
    pub gender: PathBuf,
    pub emotion: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            face_detector: dir.join(FACE_DETECTOR_FILE),
            age: dir.join(AGE_MODEL_FILE),
            gender: dir.join(GENDER_MODEL_FILE),
            emotion: dir.join(EMOTION_MODEL_FILE),
        }
    }

    /// Every path with a short name, in load order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        [
            ("face detector", self.face_detector.as_path()),
            ("age", self.age.as_path()),
            ("gender", self.gender.as_path()),
            ("emotion", self.emotion.as_path()),
        ]
        .into_iter()
    }

    /// Paths that do not exist on disk.
    pub fn missing(&self) -> Vec<&Path> {
        self.iter().map(|(_, p)| p).filter(|p| !p.exists()).collect()
    }
}

/// Tunables applied when loading a bundle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    /// Minimum (exclusive) detector confidence for a face.
    pub confidence_threshold: f32,
    /// Pixels added on each side of the face before classification.
    pub face_padding: u32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            face_padding: DEFAULT_FACE_PADDING,
            intra_threads: 2,
        }
    }
}

/// Terminal state of one analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Missing, empty, or malformed image field.
    BadInput,
    /// Image decoded but no face passed the threshold.
    NoFace,
    Success(Analysis),
    /// Anything else. The cause has already been logged.
    InternalFailure,
}

impl Outcome {
    /// HTTP status code for this outcome. `NoFace` is deliberately a 200.
    pub fn status(&self) -> u16 {
        match self {
            Outcome::BadInput => 400,
            Outcome::NoFace | Outcome::Success(_) => 200,
            Outcome::InternalFailure => 500,
        }
    }

    /// JSON response body for this outcome.
    pub fn body(&self) -> serde_json::Value {
        match self {
            Outcome::BadInput => json!({ "error": BAD_INPUT_MESSAGE }),
            Outcome::NoFace => json!({ "error": NO_FACE_MESSAGE }),
            Outcome::Success(analysis) => json!(analysis),
            Outcome::InternalFailure => json!({ "error": INTERNAL_ERROR_MESSAGE }),
        }
    }
}

impl From<Result<Option<Analysis>, PipelineError>> for Outcome {
    fn from(result: Result<Option<Analysis>, PipelineError>) -> Self {
        match result {
            Ok(Some(analysis)) => Outcome::Success(analysis),
            Ok(None) => Outcome::NoFace,
            Err(err) => {
                tracing::error!(error = %err, "analysis failed");
                Outcome::InternalFailure
            }
        }
    }
}

/// Face locator, demographic classifier, and emotion analyzer loaded together.
pub struct ModelBundle {
    locator: Box<dyn FaceLocator + Send>,
    classifier: Box<dyn DemographicClassifier + Send>,
    emotion: Box<dyn EmotionAnalyzer + Send>,
    face_padding: u32,
}

impl ModelBundle {
    /// Assemble a bundle from already-constructed components.
    pub fn new(
        locator: Box<dyn FaceLocator + Send>,
        classifier: Box<dyn DemographicClassifier + Send>,
        emotion: Box<dyn EmotionAnalyzer + Send>,
        face_padding: u32,
    ) -> Self {
        Self {
            locator,
            classifier,
            emotion,
            face_padding,
        }
    }

    /// Load every ONNX model. Fails fast on the first missing or invalid file.
    pub fn load(paths: &ModelPaths, settings: &PipelineSettings) -> Result<Self, BundleError> {
        let locator = SsdFaceDetector::load(
            &paths.face_detector,
            settings.confidence_threshold,
            settings.intra_threads,
        )?;
        tracing::info!(
            path = %paths.face_detector.display(),
            threshold = locator.confidence_threshold(),
            "face detector loaded"
        );

        let classifier = CaffeNetClassifier::load(&paths.age, &paths.gender, settings.intra_threads)?;
        tracing::info!(
            age = %paths.age.display(),
            gender = %paths.gender.display(),
            "age/gender classifier loaded"
        );

        let emotion = OnnxEmotionAnalyzer::load(&paths.emotion, settings.intra_threads)?;
        tracing::info!(path = %paths.emotion.display(), "emotion analyzer loaded");

        Ok(Self::new(
            Box::new(locator),
            Box::new(classifier),
            Box::new(emotion),
            settings.face_padding,
        ))
    }

    /// Analyze a decoded image. `Ok(None)` means no face was found.
    pub fn run(&mut self, image: &RgbImage) -> Result<Option<Analysis>, PipelineError> {
        let faces = self.locator.locate(image)?;
        // Only the first face in detector order is analyzed.
        let Some(face) = faces.first() else {
            tracing::debug!("no face above threshold");
            return Ok(None);
        };
        tracing::debug!(
            faces = faces.len(),
            confidence = face.confidence,
            width = face.width(),
            height = face.height(),
            "first face selected"
        );

        let crop = crop::crop_face(image, face, self.face_padding)?;
        let demographics = self.classifier.classify(&crop)?;
        let emotion = EmotionOutcome::analyze(self.emotion.as_mut(), &crop).into_label();

        Ok(Some(Analysis::new(demographics, emotion)))
    }

    /// Handle one request's `image` field end to end.
    pub fn analyze(&mut self, image_field: Option<&str>) -> Outcome {
        let Some(data_url) = image_field.filter(|s| !s.is_empty()) else {
            return Outcome::BadInput;
        };

        let image = match decode::decode_data_url(data_url) {
            Ok(image) => image,
            Err(err) if err.is_malformed_input() => {
                tracing::debug!(error = %err, "rejecting image field");
                return Outcome::BadInput;
            }
            Err(err) => return Outcome::from(Err(PipelineError::from(err))),
        };

        Outcome::from(self.run(&image))
    }
}
