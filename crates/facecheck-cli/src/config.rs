use anyhow::{Context, Result};
use facecheck_core::{
    EmbedderConfig, ModelPaths, OptimizationLevel, OptionsUpdate, PixelNormalization, SessionConfig,
};
use std::path::{Path, PathBuf};

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// ONNX Runtime session settings for both models.
    pub session: SessionConfig,
    /// Pixel normalization the embedding model expects.
    pub normalization: PixelNormalization,
}

impl Config {
    /// Load configuration from `FACECHECK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            model_dir: facecheck_core::default_model_dir(),
            session: session_from_env(),
            normalization: std::env::var("FACECHECK_PIXEL_NORMALIZATION")
                .ok()
                .and_then(|v| parse_normalization(&v))
                .unwrap_or_default(),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn embedder_config(&self) -> EmbedderConfig {
        EmbedderConfig {
            normalization: self.normalization,
            ..EmbedderConfig::default()
        }
    }
}

/// Read a TOML options file into a partial update.
///
/// ```toml
/// [detection]
/// confidenceThreshold = 0.6
/// paddingPercentage = 10
///
/// [verification]
/// distanceMetric = "euclideanL2"
/// thresholds = { euclideanL2 = 1.0 }
/// ```
pub fn load_options_file(path: &Path) -> Result<OptionsUpdate> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading options file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing options file {}", path.display()))
}

fn parse_normalization(value: &str) -> Option<PixelNormalization> {
    match value {
        "unitScale" | "unit" => Some(PixelNormalization::UnitScale),
        "facenet" => Some(PixelNormalization::Facenet),
        "symmetric" => Some(PixelNormalization::Symmetric),
        "raw" => Some(PixelNormalization::Raw),
        other => {
            tracing::warn!(value = other, "unknown FACECHECK_PIXEL_NORMALIZATION; using default");
            None
        }
    }
}

fn session_from_env() -> SessionConfig {
    let defaults = SessionConfig::default();
    SessionConfig {
        intra_threads: env_usize("FACECHECK_INTRA_THREADS", defaults.intra_threads),
        inter_threads: env_usize("FACECHECK_INTER_THREADS", defaults.inter_threads),
        optimization_level: std::env::var("FACECHECK_GRAPH_OPTIMIZATION")
            .ok()
            .and_then(|v| parse_optimization_level(&v))
            .unwrap_or(defaults.optimization_level),
    }
}

fn parse_optimization_level(value: &str) -> Option<OptimizationLevel> {
    match value {
        "disable" | "0" => Some(OptimizationLevel::Disable),
        "basic" | "1" => Some(OptimizationLevel::Basic),
        "extended" | "2" => Some(OptimizationLevel::Extended),
        "all" | "3" => Some(OptimizationLevel::All),
        other => {
            tracing::warn!(value = other, "unknown FACECHECK_GRAPH_OPTIMIZATION; using default");
            None
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecheck_core::{DistanceMetric, FaceServiceOptions};

    #[test]
    fn test_parse_normalization() {
        assert_eq!(parse_normalization("facenet"), Some(PixelNormalization::Facenet));
        assert_eq!(parse_normalization("unit"), Some(PixelNormalization::UnitScale));
        assert_eq!(parse_normalization("zscore"), None);
    }

    #[test]
    fn test_parse_optimization_level() {
        assert_eq!(parse_optimization_level("basic"), Some(OptimizationLevel::Basic));
        assert_eq!(parse_optimization_level("3"), Some(OptimizationLevel::All));
        assert_eq!(parse_optimization_level("max"), None);
    }

    #[test]
    fn test_options_toml() {
        let update: OptionsUpdate = toml::from_str(
            r#"
            [detection]
            threshold = 0.6
            paddingPercentage = 10.0

            [verification]
            distanceMetric = "euclidean_l2"
            thresholds = { euclideanL2 = 1.0 }
            "#,
        )
        .unwrap();

        let options = FaceServiceOptions::default().merged(&update).unwrap();
        assert_eq!(options.detection.confidence_threshold, 0.6);
        assert_eq!(options.detection.padding_percentage, 10.0);
        assert_eq!(options.verification.distance_metric, DistanceMetric::EuclideanL2);
        assert_eq!(options.verification.threshold(), 1.0);
    }

    #[test]
    fn test_options_toml_rejects_unknown_metric() {
        let parsed = toml::from_str::<OptionsUpdate>("[verification]\ndistanceMetric = \"jaccard\"\n");
        assert!(parsed.is_err());
    }
}
