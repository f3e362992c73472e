//! Facenet512 face embedder via ONNX Runtime.
//!
//! Turns a cropped, resized face tensor (`[1, 160, 160, 3]`, NHWC) into a
//! 512-dimensional embedding. The output is returned as produced by the
//! network, without L2 normalization.

use crate::models::SessionConfig;
use crate::preprocess::PixelNormalization;
use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants (Facenet512 contract) ---
const FACENET_INPUT_SIZE: u32 = 160;
const FACENET_EMBEDDING_DIM: usize = 512;
const FACENET_MODEL_VERSION: &str = "facenet512";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — place facenet512.onnx in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("embedding network produced no output values")]
    EmptyOutput,
    #[error("expected {expected}-dim embedding, got {actual}")]
    UnexpectedDimension { expected: usize, actual: usize },
    #[error("embedder session lock poisoned")]
    SessionPoisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces one embedding per normalized face tensor.
pub trait FaceEmbedder: Send + Sync {
    /// Spatial input size `(width, height)` the network expects.
    fn input_size(&self) -> (u32, u32);

    /// Channel normalization the network was trained with.
    fn normalization(&self) -> PixelNormalization;

    fn embed(&self, input: &Array4<f32>) -> Result<Embedding, EmbedderError>;
}

/// Input/output contract of an embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedderConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub embedding_dim: usize,
    pub normalization: PixelNormalization,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            input_width: FACENET_INPUT_SIZE,
            input_height: FACENET_INPUT_SIZE,
            embedding_dim: FACENET_EMBEDDING_DIM,
            normalization: PixelNormalization::UnitScale,
        }
    }
}

/// Facenet-based face embedder.
pub struct FacenetEmbedder {
    session: Mutex<Session>,
    config: EmbedderConfig,
}

impl FacenetEmbedder {
    /// Load the Facenet ONNX model from the given path.
    pub fn load(
        model_path: &Path,
        config: EmbedderConfig,
        session_config: &SessionConfig,
    ) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = session_config.open(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            normalization = ?config.normalization,
            "loaded Facenet model"
        );

        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }
}

impl FaceEmbedder for FacenetEmbedder {
    fn input_size(&self) -> (u32, u32) {
        (self.config.input_width, self.config.input_height)
    }

    fn normalization(&self) -> PixelNormalization {
        self.config.normalization
    }

    fn embed(&self, input: &Array4<f32>) -> Result<Embedding, EmbedderError> {
        let expected_shape = [
            1,
            self.config.input_height as usize,
            self.config.input_width as usize,
            3,
        ];
        if input.shape() != expected_shape {
            return Err(EmbedderError::InferenceFailed(format!(
                "input tensor shape {:?} does not match model shape {expected_shape:?}",
                input.shape()
            )));
        }

        let mut session = self.session.lock().map_err(|_| EmbedderError::SessionPoisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let values = check_output(raw_data, self.config.embedding_dim)?;

        Ok(Embedding {
            values,
            model_version: Some(FACENET_MODEL_VERSION.to_string()),
        })
    }
}

/// Validate the raw output length against the model's embedding size.
fn check_output(raw: &[f32], expected: usize) -> Result<Vec<f32>, EmbedderError> {
    if raw.is_empty() {
        return Err(EmbedderError::EmptyOutput);
    }
    if raw.len() != expected {
        return Err(EmbedderError::UnexpectedDimension {
            expected,
            actual: raw.len(),
        });
    }
    Ok(raw.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_facenet512() {
        let config = EmbedderConfig::default();
        assert_eq!((config.input_width, config.input_height), (160, 160));
        assert_eq!(config.embedding_dim, 512);
        assert_eq!(config.normalization, PixelNormalization::UnitScale);
    }

    #[test]
    fn test_check_output_keeps_raw_values() {
        let raw = vec![3.0f32, -4.0];
        // not L2-normalized
        assert_eq!(check_output(&raw, 2).unwrap(), vec![3.0, -4.0]);
    }

    #[test]
    fn test_check_output_empty() {
        assert!(matches!(check_output(&[], 512), Err(EmbedderError::EmptyOutput)));
    }

    #[test]
    fn test_check_output_wrong_dimension() {
        let err = check_output(&[0.0; 128], 512).unwrap_err();
        assert!(matches!(
            err,
            EmbedderError::UnexpectedDimension { expected: 512, actual: 128 }
        ));
    }

    #[test]
    fn test_load_missing_model() {
        let err = FacenetEmbedder::load(
            Path::new("/nonexistent/facenet512.onnx"),
            EmbedderConfig::default(),
            &SessionConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, EmbedderError::ModelNotFound(_)));
    }

    #[test]
    fn test_config_deserializes_camel_case() {
        let config: EmbedderConfig = serde_json::from_str(
            r#"{"inputWidth":112,"inputHeight":112,"embeddingDim":128,"normalization":"facenet"}"#,
        )
        .unwrap();
        assert_eq!(config.input_width, 112);
        assert_eq!(config.normalization, PixelNormalization::Facenet);
    }
}
