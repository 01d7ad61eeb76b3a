//! Service configuration.
//!
//! Every section deserialises with `#[serde(default)]`, so a JSON file only needs to
//! name the values it overrides.

use crate::error::{ClassificationError, Result};
use crate::texture::{GaborBankConfig, MultiScaleConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default material categories, in output order.
pub const DEFAULT_CATEGORIES: [&str; 10] = [
    "metal", "wood", "fabric", "plastic", "ceramic", "stone", "glass", "leather", "concrete", "composite",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvdConfig {
    /// Number of singular triplets to extract
    pub rank: usize,
    pub power_iterations: usize,
    /// Seed for the random starting vectors
    pub seed: u64,
    pub enable_cache: bool,
    /// Maximum number of cached decompositions
    pub cache_capacity: u64,
}

impl Default for SvdConfig {
    fn default() -> Self {
        Self {
            rank: 8,
            power_iterations: 30,
            seed: 0x5eed_0001,
            enable_cache: true,
            cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    pub head_count: usize,
    pub key_dim: usize,
    pub dropout_rate: f32,
    pub temperature_scaling: f32,
    /// Size of the positional embedding table; longer sequences are rejected
    pub max_sequence_length: usize,
    pub positional_scale: f32,
    /// Evaluate heads on the rayon pool
    pub parallel_heads: bool,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            head_count: 4,
            key_dim: 16,
            dropout_rate: 0.1,
            temperature_scaling: 1.0,
            max_sequence_length: 1024,
            positional_scale: 0.1,
            parallel_heads: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub categories: Vec<String>,
    /// Length the fused vector is pooled to before scoring
    pub feature_dim: usize,
    pub use_ensemble: bool,
    pub ensemble_weights: Vec<f32>,
    /// Score ensemble members on the rayon pool
    pub parallel_ensemble: bool,
    /// Results below this confidence carry no subcategory
    pub min_confidence: f32,
    pub model_version: String,
    /// Seed used when weights are synthesised rather than loaded
    pub weight_seed: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            feature_dim: 256,
            use_ensemble: true,
            ensemble_weights: vec![0.4, 0.3, 0.3],
            parallel_ensemble: true,
            min_confidence: 0.0,
            model_version: "texture-ensemble-1.0.0".to_string(),
            weight_seed: 42,
        }
    }
}

/// Configuration for debug output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOutputConfig {
    /// Whether debug output should be saved
    pub enabled: bool,
    /// Base directory for saving debug output
    pub output_dir: Option<String>,
}

impl Default for DebugOutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub svd: SvdConfig,
    pub attention: AttentionConfig,
    pub classification: ClassificationConfig,
    /// Settings for the built-in Gabor bank
    pub gabor: GaborBankConfig,
    /// Settings for the built-in multi-scale module
    pub multi_scale: MultiScaleConfig,
    pub debug: DebugOutputConfig,
}

impl ClassifierConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ClassificationError::InvalidConfig(msg.to_string()));

        if self.svd.power_iterations == 0 {
            return invalid("svd.power_iterations must be at least 1");
        }
        if self.attention.head_count == 0 || self.attention.key_dim == 0 {
            return invalid("attention.head_count and attention.key_dim must be non-zero");
        }
        if !(0.0..1.0).contains(&self.attention.dropout_rate) {
            return invalid("attention.dropout_rate must lie in [0, 1)");
        }
        if self.attention.temperature_scaling <= 0.0 {
            return invalid("attention.temperature_scaling must be positive");
        }
        if self.attention.max_sequence_length == 0 {
            return invalid("attention.max_sequence_length must be non-zero");
        }
        if self.classification.categories.len() < 2 {
            return invalid("classification.categories needs at least two entries");
        }
        if self.classification.feature_dim == 0 {
            return invalid("classification.feature_dim must be non-zero");
        }
        if self.classification.ensemble_weights.len() != crate::classifier::ensemble::ENSEMBLE_SIZE {
            return invalid("classification.ensemble_weights must hold one weight per ensemble model");
        }
        if self.classification.ensemble_weights.iter().any(|w| *w < 0.0) {
            return invalid("classification.ensemble_weights must be non-negative");
        }
        let total: f32 = self.classification.ensemble_weights.iter().sum();
        if (total - 1.0).abs() > 1e-3 {
            return invalid("classification.ensemble_weights must sum to 1");
        }
        if !(0.0..=1.0).contains(&self.classification.min_confidence) {
            return invalid("classification.min_confidence must lie in [0, 1]");
        }
        if self.gabor.frequencies.iter().any(|f| *f <= 0.0 || *f > 0.5) {
            return invalid("gabor.frequencies must lie in (0, 0.5]");
        }
        if self.multi_scale.levels == 0 {
            return invalid("multi_scale.levels must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ClassifierConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ClassifierConfig::from_json_str(r#"{"svd": {"rank": 4}}"#).unwrap();
        assert_eq!(config.svd.rank, 4);
        assert_eq!(config.svd.power_iterations, SvdConfig::default().power_iterations);
        assert_eq!(config.classification.categories.len(), DEFAULT_CATEGORIES.len());
    }

    #[test]
    fn rejects_bad_ensemble_weights() {
        let json = r#"{"classification": {"ensemble_weights": [0.5, 0.5]}}"#;
        assert!(matches!(
            ClassifierConfig::from_json_str(json),
            Err(ClassificationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_dropout_of_one() {
        let mut config = ClassifierConfig::default();
        config.attention.dropout_rate = 1.0;
        assert!(config.validate().is_err());
    }
}
