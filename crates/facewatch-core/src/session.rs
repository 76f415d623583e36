//! ONNX Runtime session construction shared by the detector and embedder.

use ort::session::Session;
use std::path::Path;

/// Inference backend requested for model sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Cpu,
    Cuda { device_id: i32 },
}

impl Backend {
    /// Parse `cpu`, `cuda` or `cuda:<id>`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(Backend::Cpu),
            "cuda" => Some(Backend::Cuda { device_id: 0 }),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .map(|device_id| Backend::Cuda { device_id }),
        }
    }
}

/// Explicit model-runtime settings handed to every capability at load time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOptions {
    pub backend: Backend,
    pub intra_threads: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            backend: Backend::Cpu,
            intra_threads: 2,
        }
    }
}

/// Build a session for `model_path` with the requested backend.
///
/// CUDA falls back to CPU, with a warning, when the `cuda` feature is not
/// compiled in.
pub(crate) fn build_session(model_path: &Path, options: &ModelOptions) -> Result<Session, ort::Error> {
    let builder = Session::builder()?.with_intra_threads(options.intra_threads)?;

    let session = match options.backend {
        Backend::Cpu => builder,
        Backend::Cuda { device_id } => with_cuda(builder, device_id)?,
    }
    .commit_from_file(model_path)?;

    Ok(session)
}

#[cfg(feature = "cuda")]
fn with_cuda(
    builder: ort::session::builder::SessionBuilder,
    device_id: i32,
) -> Result<ort::session::builder::SessionBuilder, ort::Error> {
    use ort::execution_providers::CUDAExecutionProvider;

    tracing::info!(device_id, "registering CUDA execution provider");
    Ok(builder.with_execution_providers([CUDAExecutionProvider::default()
        .with_device_id(device_id)
        .build()])?)
}

#[cfg(not(feature = "cuda"))]
fn with_cuda(
    builder: ort::session::builder::SessionBuilder,
    device_id: i32,
) -> Result<ort::session::builder::SessionBuilder, ort::Error> {
    tracing::warn!(device_id, "built without the `cuda` feature; using CPU");
    Ok(builder)
}
