//! Embedding distance metrics and threshold decisions.
//!
//! Every metric maps two equal-length vectors to a non-negative
//! dissimilarity; a pair matches when the distance does not exceed the
//! threshold configured for that metric.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistanceError {
    #[error("unknown distance metric: {0} (expected cosine, euclidean, euclideanL2 or angular)")]
    UnknownMetric(String),
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Supported distance metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    #[serde(rename = "euclideanL2", alias = "euclidean_l2")]
    EuclideanL2,
    Angular,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 4] = [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::EuclideanL2,
        DistanceMetric::Angular,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclideanL2",
            DistanceMetric::Angular => "angular",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = DistanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            "euclideanL2" | "euclidean_l2" => Ok(DistanceMetric::EuclideanL2),
            "angular" => Ok(DistanceMetric::Angular),
            other => Err(DistanceError::UnknownMetric(other.to_string())),
        }
    }
}

/// Per-metric match thresholds. Each metric is calibrated independently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    pub cosine: f64,
    pub euclidean: f64,
    #[serde(rename = "euclideanL2", alias = "euclidean_l2")]
    pub euclidean_l2: f64,
    pub angular: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cosine: 0.30,
            euclidean: 23.56,
            euclidean_l2: 1.04,
            angular: 0.35,
        }
    }
}

impl Thresholds {
    pub fn get(&self, metric: DistanceMetric) -> f64 {
        match metric {
            DistanceMetric::Cosine => self.cosine,
            DistanceMetric::Euclidean => self.euclidean,
            DistanceMetric::EuclideanL2 => self.euclidean_l2,
            DistanceMetric::Angular => self.angular,
        }
    }

    pub fn set(&mut self, metric: DistanceMetric, value: f64) {
        match metric {
            DistanceMetric::Cosine => self.cosine = value,
            DistanceMetric::Euclidean => self.euclidean = value,
            DistanceMetric::EuclideanL2 => self.euclidean_l2 = value,
            DistanceMetric::Angular => self.angular = value,
        }
    }
}

/// Outcome of comparing a distance against the metric's threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub matched: bool,
    pub threshold: f64,
}

/// Compute the distance between two embeddings under `metric`.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> Result<f64, DistanceError> {
    if a.len() != b.len() {
        return Err(DistanceError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let d = match metric {
        DistanceMetric::Cosine => match cosine_similarity(a, b) {
            Some(sim) => 1.0 - sim,
            None => 1.0,
        },
        DistanceMetric::Euclidean => euclidean(a, b),
        DistanceMetric::EuclideanL2 => euclidean(&l2_normalize(a), &l2_normalize(b)),
        DistanceMetric::Angular => match cosine_similarity(a, b) {
            Some(sim) => sim.clamp(-1.0, 1.0).acos() / std::f64::consts::PI,
            None => 1.0,
        },
    };
    Ok(d)
}

/// Compare `distance` to the threshold configured for `metric`.
pub fn decide(metric: DistanceMetric, distance: f64, thresholds: &Thresholds) -> Decision {
    let threshold = thresholds.get(metric);
    Decision {
        matched: distance <= threshold,
        threshold,
    }
}

/// Cosine similarity, or `None` when either vector has zero norm.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Scale to unit length. Zero vectors are returned unchanged.
fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|&x| (x as f64).powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 {
        v.iter().map(|&x| (x as f64 / norm) as f32).collect()
    } else {
        v.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_identical_vectors_zero_distance() {
        let a = [0.3f32, -1.2, 4.5, 0.0];
        for metric in DistanceMetric::ALL {
            let d = distance(metric, &a, &a).unwrap();
            assert!(d.abs() < 1e-4, "{metric}: {d}");
        }
        assert_eq!(distance(DistanceMetric::Euclidean, &a, &a).unwrap(), 0.0);
        assert_eq!(distance(DistanceMetric::EuclideanL2, &a, &a).unwrap(), 0.0);
    }

    #[test]
    fn test_orthogonal_unit_vectors() {
        let a = [1.0f32, 0.0, 0.0];
        let b = [0.0f32, 1.0, 0.0];
        assert!(close(distance(DistanceMetric::Cosine, &a, &b).unwrap(), 1.0, 1e-9));
        assert!(close(distance(DistanceMetric::Angular, &a, &b).unwrap(), 0.5, 1e-9));
        assert!(close(
            distance(DistanceMetric::Euclidean, &a, &b).unwrap(),
            2f64.sqrt(),
            1e-9
        ));
    }

    #[test]
    fn test_reference_values() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 2.0];
        assert!(close(distance(DistanceMetric::Cosine, &a, &b).unwrap(), 1.0, 1e-5));
        assert!(close(distance(DistanceMetric::Euclidean, &a, &b).unwrap(), 2.236068, 1e-5));
        assert!(close(distance(DistanceMetric::EuclideanL2, &a, &b).unwrap(), 1.414214, 1e-5));
        assert!(close(distance(DistanceMetric::Angular, &a, &b).unwrap(), 0.5, 1e-5));
    }

    #[test]
    fn test_opposite_vectors() {
        let a = [1.0f32, 0.0];
        let b = [-3.0f32, 0.0];
        assert!(close(distance(DistanceMetric::Cosine, &a, &b).unwrap(), 2.0, 1e-9));
        assert!(close(distance(DistanceMetric::Angular, &a, &b).unwrap(), 1.0, 1e-9));
    }

    #[test]
    fn test_zero_norm_is_max_distance() {
        let zero = [0.0f32, 0.0];
        let b = [1.0f32, 0.0];
        assert_eq!(distance(DistanceMetric::Cosine, &zero, &b).unwrap(), 1.0);
        assert_eq!(distance(DistanceMetric::Angular, &zero, &b).unwrap(), 1.0);
        // zero vector is left unnormalized: distance to a unit vector is 1
        assert!(close(distance(DistanceMetric::EuclideanL2, &zero, &b).unwrap(), 1.0, 1e-9));
    }

    #[test]
    fn test_angular_clamps_rounding_overshoot() {
        // Nearly parallel vectors can push the similarity a hair past 1.0.
        let a = [0.1f32; 512];
        let d = distance(DistanceMetric::Angular, &a, &a).unwrap();
        assert!(d.is_finite());
        assert!(d.abs() < 1e-3);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = distance(DistanceMetric::Cosine, &[1.0, 2.0], &[1.0]).unwrap_err();
        assert_eq!(err, DistanceError::DimensionMismatch { left: 2, right: 1 });
    }

    #[test]
    fn test_decide_is_inclusive_and_monotonic() {
        let mut thresholds = Thresholds::default();
        thresholds.cosine = 0.3;
        let d = 0.096;
        let hit = decide(DistanceMetric::Cosine, d, &thresholds);
        assert!(hit.matched);
        assert_eq!(hit.threshold, 0.3);

        thresholds.cosine = 0.01;
        assert!(!decide(DistanceMetric::Cosine, d, &thresholds).matched);

        thresholds.cosine = d;
        assert!(decide(DistanceMetric::Cosine, d, &thresholds).matched);
    }

    #[test]
    fn test_decide_uses_metric_threshold_only() {
        let thresholds = Thresholds {
            cosine: 0.0,
            euclidean: 10.0,
            euclidean_l2: 0.0,
            angular: 0.0,
        };
        assert!(decide(DistanceMetric::Euclidean, 5.0, &thresholds).matched);
        assert!(!decide(DistanceMetric::EuclideanL2, 0.5, &thresholds).matched);
    }

    #[test]
    fn test_metric_parse_and_display() {
        for metric in DistanceMetric::ALL {
            assert_eq!(metric.to_string().parse::<DistanceMetric>().unwrap(), metric);
        }
        assert_eq!("euclidean_l2".parse::<DistanceMetric>().unwrap(), DistanceMetric::EuclideanL2);
        assert_eq!(
            "manhattan".parse::<DistanceMetric>().unwrap_err(),
            DistanceError::UnknownMetric("manhattan".into())
        );
    }

    #[test]
    fn test_metric_serde_names() {
        let json = serde_json::to_string(&DistanceMetric::EuclideanL2).unwrap();
        assert_eq!(json, "\"euclideanL2\"");
        let parsed: DistanceMetric = serde_json::from_str("\"angular\"").unwrap();
        assert_eq!(parsed, DistanceMetric::Angular);
        assert!(serde_json::from_str::<DistanceMetric>("\"hamming\"").is_err());
    }
}
