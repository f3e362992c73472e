//! Two-image face verification.
//!
//! [`FaceService`] owns the long-lived detector and embedder sessions and an
//! atomically replaceable option snapshot. Each `verify` call takes one
//! snapshot up front, runs the per-image pipelines concurrently on the
//! blocking pool and compares the two embeddings.

use crate::detector::{DetectorError, FaceDetector, YoloFaceDetector};
use crate::distance::{self, DistanceError, DistanceMetric};
use crate::embedder::{EmbedderConfig, EmbedderError, FaceEmbedder, FacenetEmbedder};
use crate::localizer;
use crate::models::{ModelPaths, SessionConfig};
use crate::options::{DetectionOptions, FaceServiceOptions, OptionsError, OptionsUpdate};
use crate::preprocess;
use crate::types::{BoundingBox, Embedding};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Distance and threshold reported when a pair could not be compared.
pub const NO_FACE_SENTINEL: f64 = -1.0;
pub const NO_FACE_MESSAGE: &str = "face not detected";

const DISTANCE_DECIMALS: i32 = 6;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("face service not initialized — call initialize() first")]
    NotInitialized,
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("distance error: {0}")]
    Distance(#[from] DistanceError),
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Outcome of one verification call.
///
/// When either image has no usable face, `matched` is false, `distance` and
/// `threshold` are [`NO_FACE_SENTINEL`] and `error` explains why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    #[serde(rename = "match")]
    pub matched: bool,
    /// Rounded to six decimals; the match decision uses the exact value.
    pub distance: f64,
    pub threshold: f64,
    pub metric: DistanceMetric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face1: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face2: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    fn no_face(metric: DistanceMetric, face1: Option<BoundingBox>, face2: Option<BoundingBox>) -> Self {
        Self {
            matched: false,
            distance: NO_FACE_SENTINEL,
            threshold: NO_FACE_SENTINEL,
            metric,
            face1,
            face2,
            error: Some(NO_FACE_MESSAGE.to_string()),
        }
    }

    /// False when the images could not be compared at all.
    pub fn is_compared(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone)]
struct Backends {
    detector: Arc<dyn FaceDetector>,
    embedder: Arc<dyn FaceEmbedder>,
}

/// Per-image pipeline output.
struct FaceAnalysis {
    face: Option<BoundingBox>,
    embedding: Option<Embedding>,
}

/// Face verification service.
///
/// Cheap to share behind an `Arc`; concurrent `verify` calls share the
/// loaded sessions.
pub struct FaceService {
    options: RwLock<Arc<FaceServiceOptions>>,
    backends: RwLock<Option<Backends>>,
    embedder_config: EmbedderConfig,
    session_config: SessionConfig,
}

impl FaceService {
    /// Create an uninitialized service. Call [`initialize`](Self::initialize)
    /// before verifying.
    pub fn new(options: FaceServiceOptions) -> Result<Self, OptionsError> {
        options.validate()?;
        Ok(Self {
            options: RwLock::new(Arc::new(options)),
            backends: RwLock::new(None),
            embedder_config: EmbedderConfig::default(),
            session_config: SessionConfig::default(),
        })
    }

    /// Create a ready service around caller-provided collaborators.
    pub fn with_backends(
        detector: Arc<dyn FaceDetector>,
        embedder: Arc<dyn FaceEmbedder>,
        options: FaceServiceOptions,
    ) -> Result<Self, OptionsError> {
        let service = Self::new(options)?;
        *service.backends.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Backends { detector, embedder });
        Ok(service)
    }

    /// Input contract used for the embedding model loaded by `initialize`.
    pub fn with_embedder_config(mut self, config: EmbedderConfig) -> Self {
        self.embedder_config = config;
        self
    }

    /// ONNX Runtime settings used for both sessions by `initialize`.
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Load both ONNX sessions. Replaces any sessions already loaded.
    pub fn initialize(&self, paths: &ModelPaths) -> Result<(), VerifyError> {
        let detector = YoloFaceDetector::load(&paths.detector, &self.session_config)?;
        let embedder = FacenetEmbedder::load(&paths.embedder, self.embedder_config, &self.session_config)?;

        *self.backends.write().unwrap_or_else(PoisonError::into_inner) = Some(Backends {
            detector: Arc::new(detector),
            embedder: Arc::new(embedder),
        });

        tracing::info!(
            detector = %paths.detector.display(),
            embedder = %paths.embedder.display(),
            "face service initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Release both sessions. In-flight calls keep the sessions they
    /// already hold until they finish.
    pub fn destroy(&self) {
        let released = self
            .backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if released {
            tracing::info!("face service destroyed");
        }
    }

    /// Current option snapshot.
    pub fn options(&self) -> Arc<FaceServiceOptions> {
        Arc::clone(&self.options.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Merge `update` into the current options and swap the result in.
    ///
    /// Calls already running keep the snapshot they started with.
    pub fn update_options(&self, update: OptionsUpdate) -> Result<(), OptionsError> {
        let mut guard = self.options.write().unwrap_or_else(PoisonError::into_inner);
        let next = guard.merged(&update)?;
        *guard = Arc::new(next);

        tracing::info!(
            metric = %next.verification.distance_metric,
            threshold = next.verification.threshold(),
            confidence = next.detection.confidence_threshold,
            padding = next.detection.padding_percentage,
            "options updated"
        );
        Ok(())
    }

    /// Decide whether two encoded images show the same person.
    pub async fn verify(&self, image1: &[u8], image2: &[u8]) -> Result<VerificationResult, VerifyError> {
        let backends = self.backends()?;
        let options = self.options();
        let metric = options.verification.distance_metric;
        let detection = options.detection;

        let (first, second) = tokio::try_join!(
            run_blocking({
                let backends = backends.clone();
                let bytes = image1.to_vec();
                move || analyze(&backends, &bytes, &detection)
            }),
            run_blocking({
                let backends = backends.clone();
                let bytes = image2.to_vec();
                move || analyze(&backends, &bytes, &detection)
            }),
        )?;

        let (Some(emb1), Some(emb2)) = (&first.embedding, &second.embedding) else {
            tracing::debug!(
                face1 = first.face.is_some(),
                face2 = second.face.is_some(),
                "verify: no comparable face pair"
            );
            return Ok(VerificationResult::no_face(metric, first.face, second.face));
        };

        let raw = distance::distance(metric, &emb1.values, &emb2.values)?;
        let decision = distance::decide(metric, raw, &options.verification.thresholds);

        tracing::debug!(
            %metric,
            dim = emb1.dim(),
            distance = raw,
            threshold = decision.threshold,
            matched = decision.matched,
            "verify: decision"
        );

        Ok(VerificationResult {
            matched: decision.matched,
            distance: round_to(raw, DISTANCE_DECIMALS),
            threshold: decision.threshold,
            metric,
            face1: first.face,
            face2: second.face,
            error: None,
        })
    }

    /// Selected (padded) face box of a single image, if any.
    pub async fn detect_face(&self, image: &[u8]) -> Result<Option<BoundingBox>, VerifyError> {
        let backends = self.backends()?;
        let detection = self.options().detection;
        let bytes = image.to_vec();

        run_blocking(move || {
            let image = preprocess::decode_rgb(&bytes)?;
            locate(&backends, &image, &detection)
        })
        .await
    }

    fn backends(&self) -> Result<Backends, VerifyError> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(VerifyError::NotInitialized)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, VerifyError>
where
    F: FnOnce() -> Result<T, VerifyError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Decode, detect and select the face of one image.
fn locate(
    backends: &Backends,
    image: &image::RgbImage,
    detection: &DetectionOptions,
) -> Result<Option<BoundingBox>, VerifyError> {
    let detections = backends.detector.detect(image)?;
    tracing::debug!(count = detections.len(), "detections");

    Ok(localizer::select_face(
        &detections,
        detection.confidence_threshold,
        image.width(),
        image.height(),
        detection.padding_percentage,
    ))
}

/// Full per-image pipeline: decode → locate → crop/normalize → embed.
fn analyze(
    backends: &Backends,
    bytes: &[u8],
    detection: &DetectionOptions,
) -> Result<FaceAnalysis, VerifyError> {
    let image = preprocess::decode_rgb(bytes)?;

    let Some(face) = locate(backends, &image, detection)? else {
        return Ok(FaceAnalysis {
            face: None,
            embedding: None,
        });
    };

    let (width, height) = backends.embedder.input_size();
    let input = preprocess::face_tensor(&image, &face, width, height, backends.embedder.normalization());

    let embedding = match backends.embedder.embed(&input) {
        Ok(embedding) if !embedding.is_empty() => Some(embedding),
        Ok(_) | Err(EmbedderError::EmptyOutput) => {
            tracing::warn!(?face, "embedder produced no embedding; treating image as faceless");
            None
        }
        Err(e) => return Err(e.into()),
    };

    Ok(FaceAnalysis {
        face: Some(face),
        embedding,
    })
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
