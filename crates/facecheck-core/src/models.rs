//! Model file locations and ONNX Runtime session settings.

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DETECTOR_MODEL_FILE: &str = "yolov11n-face.onnx";
pub const EMBEDDER_MODEL_FILE: &str = "facenet512.onnx";

const DEFAULT_INTRA_THREADS: usize = 2;
const DEFAULT_INTER_THREADS: usize = 1;

/// Graph optimizations applied when a session is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OptimizationLevel {
    Disable,
    Basic,
    Extended,
    #[default]
    All,
}

impl OptimizationLevel {
    fn to_ort(self) -> GraphOptimizationLevel {
        match self {
            OptimizationLevel::Disable => GraphOptimizationLevel::Disable,
            OptimizationLevel::Basic => GraphOptimizationLevel::Level1,
            OptimizationLevel::Extended => GraphOptimizationLevel::Level2,
            OptimizationLevel::All => GraphOptimizationLevel::Level3,
        }
    }
}

/// Session tuning shared by the detector and embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Threads used inside one operator.
    pub intra_threads: usize,
    /// Threads used across independent graph nodes.
    pub inter_threads: usize,
    pub optimization_level: OptimizationLevel,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            intra_threads: DEFAULT_INTRA_THREADS,
            inter_threads: DEFAULT_INTER_THREADS,
            optimization_level: OptimizationLevel::default(),
        }
    }
}

impl SessionConfig {
    /// Build a session for `model_path` with these settings.
    pub(crate) fn open(&self, model_path: &Path) -> Result<Session, ort::Error> {
        let session = Session::builder()?
            .with_optimization_level(self.optimization_level.to_ort())?
            .with_intra_threads(self.intra_threads.max(1))?
            .with_inter_threads(self.inter_threads.max(1))?
            .commit_from_file(model_path)?;
        Ok(session)
    }
}

/// Paths of the two ONNX models a [`crate::FaceService`] loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub embedder: PathBuf,
}

impl ModelPaths {
    /// Default model file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            embedder: dir.join(EMBEDDER_MODEL_FILE),
        }
    }
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self::in_dir(default_model_dir())
    }
}

/// Model directory: `$FACECHECK_MODEL_DIR`, else
/// `$XDG_DATA_HOME/facecheck/models`, else `~/.local/share/facecheck/models`.
pub fn default_model_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FACECHECK_MODEL_DIR") {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facecheck")
        .join("models")
}
