//! Shared ONNX Runtime session setup.

use ort::session::Session;
use ort::value::ValueType;
use std::path::Path;

/// Open an ONNX model with a fixed intra-op thread count and log its I/O signature.
pub(crate) fn open_session(model_path: &Path, intra_threads: usize, kind: &str) -> ort::Result<Session> {
    let session = Session::builder()?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = %model_path.display(),
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded {kind} model"
    );

    Ok(session)
}

/// Reject a model that declares no outputs; inference reads output 0.
pub(crate) fn require_outputs(declared: usize, kind: &str) -> Result<(), String> {
    if declared == 0 {
        return Err(format!("{kind} model declares no outputs"));
    }
    Ok(())
}

/// Static NCHW/NHWC input shape of the first model input, if the model declares one.
pub(crate) fn input_shape(session: &Session) -> Option<Vec<i64>> {
    session.inputs().first().and_then(|input| {
        if let ValueType::Tensor { ref shape, .. } = input.dtype() {
            Some(shape.iter().copied().collect())
        } else {
            None
        }
    })
}

/// Index of the first maximum score. NaN scores never win.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            Some((_, best_score)) if score <= best_score || score.is_nan() => {}
            None if score.is_nan() => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}
