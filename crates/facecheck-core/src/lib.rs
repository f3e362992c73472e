//! facecheck-core — Two-image face verification engine.
//!
//! Uses a YOLO face detector and a Facenet512 embedder, both running via
//! ONNX Runtime, and decides matches with one of four distance metrics.

pub mod detector;
pub mod distance;
pub mod embedder;
pub mod localizer;
pub mod models;
pub mod options;
pub mod preprocess;
pub mod service;
pub mod types;

pub use detector::{DetectorError, FaceDetector, YoloFaceDetector};
pub use distance::{decide, distance, Decision, DistanceError, DistanceMetric, Thresholds};
pub use embedder::{EmbedderConfig, EmbedderError, FaceEmbedder, FacenetEmbedder};
pub use localizer::{pad_box, select_face};
pub use models::{default_model_dir, ModelPaths, OptimizationLevel, SessionConfig};
pub use options::{
    DetectionOptions, FaceServiceOptions, OptionsError, OptionsUpdate, VerificationOptions,
};
pub use preprocess::PixelNormalization;
pub use service::{FaceService, VerificationResult, VerifyError};
pub use types::{BoundingBox, Detection, Embedding};
