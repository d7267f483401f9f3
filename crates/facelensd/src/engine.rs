use facelens_core::pipeline::BundleError;
use facelens_core::{ModelBundle, Outcome};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests queued ahead of the one currently running.
const ENGINE_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model files not found: {}", display_paths(.0))]
    MissingModels(Vec<PathBuf>),
    #[error("model bundle: {0}")]
    Bundle(#[from] BundleError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Message sent from HTTP handlers to the engine thread.
struct AnalyzeRequest {
    image: Option<String>,
    reply: oneshot::Sender<Outcome>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<AnalyzeRequest>,
}

impl EngineHandle {
    /// Run the full pipeline on a request's `image` field.
    pub async fn analyze(&self, image: Option<String>) -> Result<Outcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AnalyzeRequest {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread takes sole ownership of `bundle`, so inference calls on the
/// ONNX sessions run one at a time in arrival order.
pub fn spawn_engine(mut bundle: ModelBundle) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<AnalyzeRequest>(ENGINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("facelens-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(AnalyzeRequest { image, reply }) = rx.blocking_recv() {
                let outcome = bundle.analyze(image.as_deref());
                tracing::debug!(status = outcome.status(), "request analyzed");
                // The handler may have gone away (client disconnect); nothing to do.
                let _ = reply.send(outcome);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Load every model and start the engine. Fails fast if any model is unavailable.
pub fn load_engine(config: &crate::config::Config) -> Result<EngineHandle, EngineError> {
    let paths = config.model_paths();
    let missing: Vec<PathBuf> = paths.missing().into_iter().map(PathBuf::from).collect();
    if !missing.is_empty() {
        return Err(EngineError::MissingModels(missing));
    }

    let bundle = ModelBundle::load(&paths, &config.pipeline_settings())?;
    tracing::info!(model_dir = %config.model_dir.display(), "all models loaded");

    spawn_engine(bundle)
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
