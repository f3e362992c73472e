//! Detection and verification options.
//!
//! Options are plain immutable values. A running [`crate::FaceService`]
//! replaces its whole snapshot on update; [`OptionsUpdate`] carries the
//! fields to change and is deep-merged over the current snapshot.

use crate::distance::{DistanceError, DistanceMetric, Thresholds};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_PADDING_PERCENTAGE: f64 = 0.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionsError {
    #[error(transparent)]
    UnknownMetric(#[from] DistanceError),
    #[error("threshold for {metric} must be a finite non-negative number, got {value}")]
    InvalidThreshold { metric: DistanceMetric, value: f64 },
    #[error("confidence threshold must be within [0, 1], got {0}")]
    InvalidConfidence(f32),
    #[error("padding percentage must be a finite non-negative number, got {0}")]
    InvalidPadding(f64),
}

/// Face localization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionOptions {
    /// Detections scoring below this are treated as no face.
    #[serde(alias = "threshold")]
    pub confidence_threshold: f32,
    /// Expand the selected face box by this percentage of its size.
    pub padding_percentage: f64,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            padding_percentage: DEFAULT_PADDING_PERCENTAGE,
        }
    }
}

/// Distance metric selection and per-metric thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationOptions {
    pub distance_metric: DistanceMetric,
    pub thresholds: Thresholds,
}

impl VerificationOptions {
    /// Threshold of the currently selected metric.
    pub fn threshold(&self) -> f64 {
        self.thresholds.get(self.distance_metric)
    }
}

/// Full option snapshot used by one verification call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FaceServiceOptions {
    pub detection: DetectionOptions,
    pub verification: VerificationOptions,
}

impl FaceServiceOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        let confidence = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(OptionsError::InvalidConfidence(confidence));
        }

        let padding = self.detection.padding_percentage;
        if !padding.is_finite() || padding < 0.0 {
            return Err(OptionsError::InvalidPadding(padding));
        }

        for metric in DistanceMetric::ALL {
            let value = self.verification.thresholds.get(metric);
            if !value.is_finite() || value < 0.0 {
                return Err(OptionsError::InvalidThreshold { metric, value });
            }
        }

        Ok(())
    }

    /// Apply `update` on top of `self`, returning the validated result.
    pub fn merged(&self, update: &OptionsUpdate) -> Result<Self, OptionsError> {
        let mut next = *self;

        if let Some(detection) = &update.detection {
            if let Some(v) = detection.confidence_threshold {
                next.detection.confidence_threshold = v;
            }
            if let Some(v) = detection.padding_percentage {
                next.detection.padding_percentage = v;
            }
        }

        if let Some(verification) = &update.verification {
            if let Some(metric) = verification.distance_metric {
                next.verification.distance_metric = metric;
            }
            if let Some(thresholds) = &verification.thresholds {
                for metric in DistanceMetric::ALL {
                    if let Some(v) = thresholds.get(metric) {
                        next.verification.thresholds.set(metric, v);
                    }
                }
            }
        }

        next.validate()?;
        Ok(next)
    }
}

/// Partial options; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionsUpdate {
    pub detection: Option<DetectionUpdate>,
    pub verification: Option<VerificationUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionUpdate {
    #[serde(alias = "threshold")]
    pub confidence_threshold: Option<f32>,
    pub padding_percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationUpdate {
    pub distance_metric: Option<DistanceMetric>,
    pub thresholds: Option<ThresholdsUpdate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThresholdsUpdate {
    pub cosine: Option<f64>,
    pub euclidean: Option<f64>,
    #[serde(rename = "euclideanL2", alias = "euclidean_l2")]
    pub euclidean_l2: Option<f64>,
    pub angular: Option<f64>,
}

impl ThresholdsUpdate {
    fn get(&self, metric: DistanceMetric) -> Option<f64> {
        match metric {
            DistanceMetric::Cosine => self.cosine,
            DistanceMetric::Euclidean => self.euclidean,
            DistanceMetric::EuclideanL2 => self.euclidean_l2,
            DistanceMetric::Angular => self.angular,
        }
    }

    fn set(&mut self, metric: DistanceMetric, value: f64) {
        let slot = match metric {
            DistanceMetric::Cosine => &mut self.cosine,
            DistanceMetric::Euclidean => &mut self.euclidean,
            DistanceMetric::EuclideanL2 => &mut self.euclidean_l2,
            DistanceMetric::Angular => &mut self.angular,
        };
        *slot = Some(value);
    }
}

impl OptionsUpdate {
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.verification.get_or_insert_with(Default::default).distance_metric = Some(metric);
        self
    }

    /// Select a metric by name, rejecting unknown names.
    pub fn with_metric_name(self, name: &str) -> Result<Self, OptionsError> {
        let metric: DistanceMetric = name.parse()?;
        Ok(self.with_metric(metric))
    }

    pub fn with_threshold(mut self, metric: DistanceMetric, value: f64) -> Self {
        self.verification
            .get_or_insert_with(Default::default)
            .thresholds
            .get_or_insert_with(Default::default)
            .set(metric, value);
        self
    }

    pub fn with_confidence_threshold(mut self, value: f32) -> Self {
        self.detection.get_or_insert_with(Default::default).confidence_threshold = Some(value);
        self
    }

    pub fn with_padding_percentage(mut self, value: f64) -> Self {
        self.detection.get_or_insert_with(Default::default).padding_percentage = Some(value);
        self
    }

    /// Layer `other` over `self`; fields set in `other` win.
    pub fn merge(mut self, other: OptionsUpdate) -> Self {
        if let Some(d) = other.detection {
            if let Some(v) = d.confidence_threshold {
                self = self.with_confidence_threshold(v);
            }
            if let Some(v) = d.padding_percentage {
                self = self.with_padding_percentage(v);
            }
        }
        if let Some(v) = other.verification {
            if let Some(metric) = v.distance_metric {
                self = self.with_metric(metric);
            }
            if let Some(t) = v.thresholds {
                for metric in DistanceMetric::ALL {
                    if let Some(value) = t.get(metric) {
                        self = self.with_threshold(metric, value);
                    }
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = FaceServiceOptions::default();
        assert_eq!(options.detection.confidence_threshold, 0.5);
        assert_eq!(options.detection.padding_percentage, 0.0);
        assert_eq!(options.verification.distance_metric, DistanceMetric::Cosine);
        assert_eq!(options.verification.threshold(), 0.30);
        assert_eq!(options.verification.thresholds.euclidean, 23.56);
        assert_eq!(options.verification.thresholds.euclidean_l2, 1.04);
        assert_eq!(options.verification.thresholds.angular, 0.35);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_merge_only_touches_given_fields() {
        let base = FaceServiceOptions::default();
        let update = OptionsUpdate::default()
            .with_metric(DistanceMetric::Angular)
            .with_threshold(DistanceMetric::Cosine, 0.01);
        let next = base.merged(&update).unwrap();

        assert_eq!(next.verification.distance_metric, DistanceMetric::Angular);
        assert_eq!(next.verification.thresholds.cosine, 0.01);
        assert_eq!(next.verification.thresholds.angular, 0.35);
        assert_eq!(next.detection, base.detection);
        // the source snapshot is untouched
        assert_eq!(base.verification.thresholds.cosine, 0.30);
    }

    #[test]
    fn test_zero_threshold_is_kept() {
        let next = FaceServiceOptions::default()
            .merged(&OptionsUpdate::default().with_threshold(DistanceMetric::Cosine, 0.0))
            .unwrap();
        assert_eq!(next.verification.threshold(), 0.0);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let base = FaceServiceOptions::default();
        assert_eq!(
            base.merged(&OptionsUpdate::default().with_confidence_threshold(1.5)),
            Err(OptionsError::InvalidConfidence(1.5))
        );
        assert!(matches!(
            base.merged(&OptionsUpdate::default().with_confidence_threshold(f32::NAN)),
            Err(OptionsError::InvalidConfidence(_))
        ));
        assert_eq!(
            base.merged(&OptionsUpdate::default().with_padding_percentage(-1.0)),
            Err(OptionsError::InvalidPadding(-1.0))
        );
        assert_eq!(
            base.merged(&OptionsUpdate::default().with_threshold(DistanceMetric::Euclidean, -2.0)),
            Err(OptionsError::InvalidThreshold {
                metric: DistanceMetric::Euclidean,
                value: -2.0
            })
        );
    }

    #[test]
    fn test_unknown_metric_name() {
        let err = OptionsUpdate::default().with_metric_name("chebyshev").unwrap_err();
        assert_eq!(
            err,
            OptionsError::UnknownMetric(DistanceError::UnknownMetric("chebyshev".into()))
        );
        let ok = OptionsUpdate::default().with_metric_name("euclideanL2").unwrap();
        assert_eq!(
            ok.verification.unwrap().distance_metric,
            Some(DistanceMetric::EuclideanL2)
        );
    }

    #[test]
    fn test_update_layering() {
        let file = OptionsUpdate::default()
            .with_metric(DistanceMetric::Euclidean)
            .with_padding_percentage(10.0);
        let flags = OptionsUpdate::default().with_metric(DistanceMetric::Angular);
        let merged = file.merge(flags);

        let next = FaceServiceOptions::default().merged(&merged).unwrap();
        assert_eq!(next.verification.distance_metric, DistanceMetric::Angular);
        assert_eq!(next.detection.padding_percentage, 10.0);
    }

    #[test]
    fn test_deserialize_partial_update() {
        let update: OptionsUpdate = serde_json::from_str(
            r#"{"detection":{"threshold":0.7},"verification":{"distanceMetric":"euclideanL2","thresholds":{"euclideanL2":0.9}}}"#,
        )
        .unwrap();
        let next = FaceServiceOptions::default().merged(&update).unwrap();
        assert_eq!(next.detection.confidence_threshold, 0.7);
        assert_eq!(next.verification.distance_metric, DistanceMetric::EuclideanL2);
        assert_eq!(next.verification.threshold(), 0.9);
    }

    #[test]
    fn test_deserialize_rejects_unknown_metric() {
        let parsed = serde_json::from_str::<OptionsUpdate>(
            r#"{"verification":{"distanceMetric":"manhattan"}}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_full_options_roundtrip_keys() {
        let json = serde_json::to_value(FaceServiceOptions::default()).unwrap();
        assert_eq!(json["detection"]["confidenceThreshold"], 0.5);
        assert_eq!(json["verification"]["distanceMetric"], "cosine");
        assert_eq!(json["verification"]["thresholds"]["euclideanL2"], 1.04);
    }
}
