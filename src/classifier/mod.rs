//! Material classification: feature fusion, ensemble scoring and surface properties.

pub mod ensemble;
pub mod model;
pub mod properties;
pub mod service;
pub mod weights;

pub use ensemble::{EnsembleMember, ModelEnsemble, PerturbationSignature, VotingStrategy};
pub use model::ModelExport;
pub use properties::{PatternType, SurfaceType};
pub use service::{MaterialClassificationService, ServiceBuilder};
pub use weights::{InMemoryWeights, JsonWeightFile, WeightSource, XavierWeights};

use crate::attention::DIRECTION_BUCKETS;
use crate::svd::SvdTextureFeatures;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialPrediction {
    pub category: String,
    pub probability: f32,
    pub confidence: f32,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialProperties {
    pub roughness: f32,
    pub metallicness: f32,
    /// Always `1 - roughness`
    pub glossiness: f32,
    pub transparency: f32,
    /// Resolution factor of the most informative scale
    pub texture_scale: f32,
    /// Hex colours, most common first
    pub dominant_colors: Vec<String>,
    pub pattern_type: PatternType,
    pub surface_type: SurfaceType,
}

/// Intermediate results kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureAnalysis {
    /// Empty when no Gabor energy map was available
    pub svd: SvdTextureFeatures,
    pub svd_cache_hit: bool,
    pub svd_time: Duration,
    pub gabor_energy: f32,
    pub dominant_orientation: f32,
    pub dominant_frequency: f32,
    pub texture_complexity: f32,
    /// Attention mass per direction, all zero when attention did not run
    pub texture_directions: [f32; DIRECTION_BUCKETS],
    pub attention_confidence: f32,
    /// Length of the fused vector before pooling to the classifier input
    pub fused_feature_len: usize,
    /// Feature sources that were absent or failed for this request
    pub degraded_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// All categories, most probable first
    pub predictions: Vec<MaterialPrediction>,
    pub confidence: f32,
    pub category: String,
    /// Omitted when `confidence` is below the configured minimum
    pub subcategory: Option<String>,
    pub properties: MaterialProperties,
    pub texture_analysis: TextureAnalysis,
    pub processing_time: Duration,
    pub model_version: String,
}

/// Summary of a constructed service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub version: String,
    pub categories: Vec<String>,
    pub feature_dim: usize,
    pub use_ensemble: bool,
    pub ensemble: ModelEnsemble,
    pub weight_source: String,
    pub parameter_count: usize,
    pub gabor_bank: Option<String>,
    pub multi_scale_module: Option<String>,
    pub attention_channels: Option<usize>,
}
