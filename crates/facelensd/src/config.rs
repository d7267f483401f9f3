use facelens_core::{ModelPaths, PipelineSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_BIND: &str = "127.0.0.1:5000";
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Resolved from an optional TOML file (`FACELENS_CONFIG`), then
/// `FACELENS_*` environment variables, then defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:5000).
    pub bind: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Detector confidence a face must exceed.
    pub confidence_threshold: f32,
    /// Pixels of context added around each face crop.
    pub face_padding: u32,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// ONNX Runtime intra-op threads per model.
    pub intra_threads: usize,
    /// Default to debug-level logging when `RUST_LOG` is unset.
    pub debug: bool,
}

/// Keys accepted in the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    bind: Option<String>,
    model_dir: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    face_padding: Option<u32>,
    max_body_bytes: Option<usize>,
    intra_threads: Option<usize>,
    debug: Option<bool>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("FACELENS_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    /// Layer environment lookups over file values over defaults.
    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = PipelineSettings::default();

        Self {
            bind: env("FACELENS_BIND")
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            model_dir: env("FACELENS_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or_else(facelens_core::default_model_dir),
            confidence_threshold: env_parse(&env, "FACELENS_CONFIDENCE_THRESHOLD")
                .or(file.confidence_threshold)
                .unwrap_or(defaults.confidence_threshold),
            face_padding: env_parse(&env, "FACELENS_FACE_PADDING")
                .or(file.face_padding)
                .unwrap_or(defaults.face_padding),
            max_body_bytes: env_parse(&env, "FACELENS_MAX_BODY_BYTES")
                .or(file.max_body_bytes)
                .unwrap_or(DEFAULT_MAX_BODY_BYTES),
            intra_threads: env_parse(&env, "FACELENS_INTRA_THREADS")
                .or(file.intra_threads)
                .unwrap_or(defaults.intra_threads),
            debug: env_bool(&env, "FACELENS_DEBUG")
                .or(file.debug)
                .unwrap_or(false),
        }
    }

    /// Paths of every model under `model_dir`.
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            confidence_threshold: self.confidence_threshold,
            face_padding: self.face_padding,
            intra_threads: self.intra_threads,
        }
    }
}

/// Parse an environment value, ignoring unparseable input.
fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

/// Parse a boolean environment value. Unrecognized input is ignored.
fn env_bool(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    match env(key)?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
