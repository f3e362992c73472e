//! YOLO face detector via ONNX Runtime.
//!
//! Runs a single-class YOLO face model (YOLOv8/v11 "face" exports) on a
//! letterboxed RGB frame and decodes its `[1, 4 + 1, N]` output with NMS.

use crate::models::SessionConfig;
use crate::types::{BoundingBox, Detection};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_PAD_VALUE: f32 = 114.0 / 255.0;
/// Candidates below this never leave the detector; the configured
/// confidence threshold is applied later by the localizer.
const YOLO_SCORE_FLOOR: f32 = 0.01;
const YOLO_NMS_THRESHOLD: f32 = 0.45;
const YOLO_MIN_ATTRIBUTES: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place yolov11n-face.onnx in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector session lock poisoned")]
    SessionPoisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces candidate faces for one decoded image.
///
/// Implementations must be shareable across threads; verification calls
/// run the detector for both images concurrently.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Decoded box in original image space, before integer conversion.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// YOLO-based face detector.
pub struct YoloFaceDetector {
    session: Mutex<Session>,
    input_size: u32,
}

impl YoloFaceDetector {
    /// Load the YOLO face ONNX model from the given path.
    pub fn load(model_path: &Path, session_config: &SessionConfig) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = session_config.open(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded YOLO face model"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_size: YOLO_INPUT_SIZE,
        })
    }
}

impl FaceDetector for YoloFaceDetector {
    /// Detect faces in an RGB frame, returning boxes sorted by confidence.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = preprocess(image, self.input_size);

        let mut session = self.session.lock().map_err(|_| DetectorError::SessionPoisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detection output: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let candidates = decode_output(data, &dims, &letterbox, YOLO_SCORE_FLOOR)?;
        let kept = nms(candidates, YOLO_NMS_THRESHOLD);

        let detections: Vec<Detection> = kept
            .iter()
            .filter_map(|c| to_detection(c, image.width(), image.height()))
            .collect();

        tracing::debug!(count = detections.len(), "YOLO detections");
        Ok(detections)
    }
}

/// Letterbox an RGB frame into a `[1, 3, S, S]` tensor scaled to [0, 1].
fn preprocess(image: &RgbImage, input_size: u32) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = image.dimensions();
    let size = input_size as usize;

    let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, input_size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, input_size);
    let pad_x = (input_size - new_w) as f32 / 2.0;
    let pad_y = (input_size - new_h) as f32 / 2.0;

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), YOLO_PAD_VALUE);
    let x0 = pad_x.floor() as usize;
    let y0 = pad_y.floor() as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = pixel[c] as f32 / 255.0;
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Decode raw YOLO output rows `(cx, cy, w, h, score, ...)`.
///
/// Accepts both the channel-major `[1, A, N]` export and the transposed
/// `[1, N, A]` layout; the attribute axis is the shorter one that can still
/// hold a full row.
fn decode_output(
    data: &[f32],
    dims: &[usize],
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Result<Vec<Candidate>, DetectorError> {
    let &[_, d1, d2] = dims else {
        return Err(DetectorError::InferenceFailed(format!(
            "expected a rank-3 detection output, got shape {dims:?}"
        )));
    };
    let channel_major = d1 >= YOLO_MIN_ATTRIBUTES && (d1 <= d2 || d2 < YOLO_MIN_ATTRIBUTES);
    let (attrs, rows) = if channel_major { (d1, d2) } else { (d2, d1) };

    if attrs < YOLO_MIN_ATTRIBUTES || data.len() < attrs * rows {
        return Err(DetectorError::InferenceFailed(format!(
            "detection output shape {dims:?} does not hold (cx, cy, w, h, score) rows"
        )));
    }

    let at = |row: usize, attr: usize| -> f32 {
        if channel_major {
            data[attr * rows + row]
        } else {
            data[row * attrs + attr]
        }
    };

    let mut candidates = Vec::new();
    for row in 0..rows {
        let score = at(row, 4);
        if score.is_nan() || score < threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(row, 0), at(row, 1), at(row, 2), at(row, 3));

        // Map from letterboxed space to original frame space
        candidates.push(Candidate {
            x1: (cx - w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y1: (cy - h / 2.0 - letterbox.pad_y) / letterbox.scale,
            x2: (cx + w / 2.0 - letterbox.pad_x) / letterbox.scale,
            y2: (cy + h / 2.0 - letterbox.pad_y) / letterbox.scale,
            score,
        });
    }

    Ok(candidates)
}

/// Clamp a candidate to the image and round it to whole pixels.
fn to_detection(c: &Candidate, width: u32, height: u32) -> Option<Detection> {
    let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
    let x1 = clamp(c.x1, width);
    let y1 = clamp(c.y1, height);
    let x2 = clamp(c.x2, width);
    let y2 = clamp(c.y2, height);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(Detection::face(
        BoundingBox::new(x1, y1, x2 - x1, y2 - y1),
        c.score.clamp(0.0, 1.0),
    ))
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i]);

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two boxes.
fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
