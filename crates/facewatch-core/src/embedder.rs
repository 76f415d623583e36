//! FaceNet face embedder via ONNX Runtime.
//!
//! Runs an InceptionResnetV1 (VGGFace2) export on prewhitened 160x160 crops
//! and returns the raw 512-dimensional output. Embeddings are used exactly as
//! the model emits them; no extra normalisation is applied here.

use crate::cache;
use crate::capability::{EmbedderError, FaceEmbedder};
use crate::normalizer::EMBEDDER_INPUT_SIZE;
use crate::session::{self, ModelOptions};
use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const FACENET_EMBEDDING_DIM: usize = 512;
const FACENET_MODEL_VERSION: &str = "inception_resnet_v1_vggface2";

/// FaceNet-based embedder.
pub struct FaceNetEmbedder {
    session: Session,
    model_id: String,
}

impl FaceNetEmbedder {
    /// Load the FaceNet ONNX model from the given path.
    pub fn load(model_path: &Path, options: &ModelOptions) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = session::build_session(model_path, options)?;

        tracing::info!(
            path = %model_path.display(),
            backend = ?options.backend,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FaceNet model"
        );

        Ok(Self {
            session,
            model_id: model_id(model_path)?,
        })
    }
}

impl FaceEmbedder for FaceNetEmbedder {
    fn embed(&mut self, input: &Array4<f32>) -> Result<Embedding, EmbedderError> {
        check_input_shape(input.shape())?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        check_output_dim(raw_data.len())?;

        Ok(Embedding::new(raw_data.to_vec()))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Identify the model by architecture, file name and content, so replacing
/// the weights under the same name invalidates cached galleries.
fn model_id(model_path: &Path) -> Result<String, EmbedderError> {
    let file_name = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let fingerprint = cache::file_fingerprint(model_path).map_err(|source| EmbedderError::ModelRead {
        path: model_path.display().to_string(),
        source,
    })?;
    Ok(format!("{FACENET_MODEL_VERSION}/{file_name}@{fingerprint}"))
}

fn check_input_shape(shape: &[usize]) -> Result<(), EmbedderError> {
    let expected = [1, 3, EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE];
    if shape != expected {
        return Err(EmbedderError::InferenceFailed(format!(
            "expected input shape {expected:?}, got {shape:?}"
        )));
    }
    Ok(())
}

fn check_output_dim(len: usize) -> Result<(), EmbedderError> {
    if len != FACENET_EMBEDDING_DIM {
        return Err(EmbedderError::InferenceFailed(format!(
            "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {len}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_shape_check() {
        assert!(check_input_shape(&[1, 3, 160, 160]).is_ok());
        assert!(check_input_shape(&[1, 3, 112, 112]).is_err());
        assert!(check_input_shape(&[2, 3, 160, 160]).is_err());
    }

    #[test]
    fn test_output_dim_check() {
        assert!(check_output_dim(512).is_ok());
        assert!(matches!(
            check_output_dim(128),
            Err(EmbedderError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_model_id_changes_with_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facenet-vggface2.onnx");

        std::fs::write(&path, b"weights v1").unwrap();
        let first = model_id(&path).unwrap();
        assert!(first.starts_with("inception_resnet_v1_vggface2/facenet-vggface2@"));
        assert_eq!(model_id(&path).unwrap(), first);

        std::fs::write(&path, b"weights v2").unwrap();
        assert_ne!(model_id(&path).unwrap(), first);
    }

    #[test]
    fn test_model_id_unreadable_file() {
        assert!(matches!(
            model_id(Path::new("/nonexistent/facenet.onnx")),
            Err(EmbedderError::ModelRead { .. })
        ));
    }

    #[test]
    fn test_load_missing_model() {
        let result = FaceNetEmbedder::load(Path::new("/nonexistent/facenet.onnx"), &ModelOptions::default());
        assert!(matches!(result, Err(EmbedderError::ModelNotFound(_))));
    }
}
