use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facelens_core::decode::encode_data_url;
use facelens_core::{ModelBundle, ModelPaths, Outcome, PipelineSettings};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "facelens", about = "facelens face attribute analysis CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis pipeline on a local image
    Analyze {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,
        /// Directory containing the ONNX models
        #[arg(short, long, default_value_os_t = facelens_core::default_model_dir())]
        model_dir: PathBuf,
        /// Detector confidence a face must exceed
        #[arg(short, long, default_value_t = PipelineSettings::default().confidence_threshold)]
        threshold: f32,
    },
    /// Print a base64 data URL for an image, ready for POST /analyze
    Encode {
        /// Image file to encode
        image: PathBuf,
    },
    /// Check that every model file exists and loads
    Models {
        /// Directory containing the ONNX models
        #[arg(short, long, default_value_os_t = facelens_core::default_model_dir())]
        model_dir: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            image,
            model_dir,
            threshold,
        } => {
            let data_url = read_data_url(&image)?;
            let settings = PipelineSettings {
                confidence_threshold: threshold,
                ..PipelineSettings::default()
            };
            let mut bundle = ModelBundle::load(&ModelPaths::in_dir(&model_dir), &settings)
                .with_context(|| format!("failed to load models from {}", model_dir.display()))?;

            let outcome = bundle.analyze(Some(&data_url));
            println!("{}", outcome.status());
            println!("{}", serde_json::to_string_pretty(&outcome.body())?);

            return Ok(match outcome {
                Outcome::Success(_) | Outcome::NoFace => ExitCode::SUCCESS,
                Outcome::BadInput | Outcome::InternalFailure => ExitCode::FAILURE,
            });
        }
        Commands::Encode { image } => {
            println!("{}", read_data_url(&image)?);
        }
        Commands::Models { model_dir } => {
            let paths = ModelPaths::in_dir(&model_dir);
            for (name, path) in paths.iter() {
                let state = if path.exists() { "found" } else { "MISSING" };
                println!("{name:>14}: {state:<7} {}", path.display());
            }

            match ModelBundle::load(&paths, &PipelineSettings::default()) {
                Ok(_) => println!("All models loaded"),
                Err(err) => {
                    println!("Load failed: {err}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Read an image file and wrap it as a `data:<mime>;base64,` URL.
fn read_data_url(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mime = image::guess_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    tracing::debug!(path = %path.display(), bytes = bytes.len(), mime, "encoding image");
    Ok(encode_data_url(&bytes, mime))
}
