//! Face selection and padding.
//!
//! Reduces a detector's candidate list to at most one face per image and
//! expands it by a percentage of its size, clamped to the image.

use crate::types::{BoundingBox, Detection};

/// Pick the most confident detection at or above `confidence_threshold` and
/// return its padded box, or `None` when no detection qualifies.
///
/// Ties on confidence keep the detection that appears first in `detections`.
pub fn select_face(
    detections: &[Detection],
    confidence_threshold: f32,
    image_width: u32,
    image_height: u32,
    padding_percentage: f64,
) -> Option<BoundingBox> {
    let mut candidates = detections
        .iter()
        .filter(|d| d.confidence >= confidence_threshold);

    let first = candidates.next()?;
    let mut best = first;
    let mut count = 1usize;
    for det in candidates {
        count += 1;
        if det.confidence > best.confidence {
            best = det;
        }
    }

    if count > 1 {
        tracing::debug!(
            faces = count,
            selected_confidence = best.confidence,
            "multiple faces detected; keeping the most confident"
        );
    }

    let Some(clipped) = clip_to_image(&best.bbox, image_width, image_height) else {
        tracing::warn!(bbox = ?best.bbox, image_width, image_height, "selected face lies outside the image");
        return None;
    };

    let face = pad_box(&clipped, image_width, image_height, padding_percentage);
    debug_assert!(face.fits_within(image_width, image_height));
    tracing::debug!(?face, confidence = best.confidence, "face selected");
    Some(face)
}

/// Grow `bbox` by `padding_percentage` percent of its width and height,
/// keeping it centred where the image edges allow.
///
/// The top-left corner never goes negative and the size is clamped so the
/// box stays inside the image. A non-positive percentage returns the box
/// unchanged.
pub fn pad_box(
    bbox: &BoundingBox,
    image_width: u32,
    image_height: u32,
    padding_percentage: f64,
) -> BoundingBox {
    if padding_percentage.is_nan() || padding_percentage <= 0.0 {
        return *bbox;
    }

    let grow = |extent: u32| -> u32 {
        let extra = (extent as f64 * padding_percentage / 100.0).floor();
        extent.saturating_add(extra.min(u32::MAX as f64) as u32)
    };

    let expanded_w = grow(bbox.width);
    let expanded_h = grow(bbox.height);

    let x = bbox.x.saturating_sub((expanded_w - bbox.width) / 2);
    let y = bbox.y.saturating_sub((expanded_h - bbox.height) / 2);

    BoundingBox {
        x,
        y,
        width: image_width.saturating_sub(x).min(expanded_w),
        height: image_height.saturating_sub(y).min(expanded_h),
    }
}

/// Intersect `bbox` with the image rectangle. `None` if nothing remains.
fn clip_to_image(bbox: &BoundingBox, image_width: u32, image_height: u32) -> Option<BoundingBox> {
    if bbox.x >= image_width || bbox.y >= image_height {
        return None;
    }
    let width = bbox.width.min(image_width - bbox.x);
    let height = bbox.height.min(image_height - bbox.y);
    if width == 0 || height == 0 {
        return None;
    }
    Some(BoundingBox::new(bbox.x, bbox.y, width, height))
}
