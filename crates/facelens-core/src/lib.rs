//! facelens-core — Face attribute analysis engine.
//!
//! Detects faces with an SSD ResNet-10 detector, estimates age bracket and
//! gender with Caffe-derived classifiers, and reads the dominant emotion from
//! a grayscale CNN, all running via ONNX Runtime for CPU inference.

pub mod classifier;
pub mod crop;
pub mod decode;
pub mod detector;
pub mod emotion;
mod onnx;
pub mod pipeline;
pub mod types;

use std::path::PathBuf;

pub use pipeline::{ModelBundle, ModelPaths, Outcome, PipelineSettings};
pub use types::{AgeBracket, Analysis, BoundingBox, Demographics, Gender};

/// Model directory used when none is configured: `./models`.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}
