//! Texture-based material classification
//!
//! Classifies images of interior-design materials (metal, wood, fabric, ...) from
//! three texture feature streams and derives physical surface properties.
//!
//! ## Pipeline
//!
//! 1. **Multi-scale features** ([`texture::MultiScaleTextureModule`]): a fused
//!    per-position feature grid plus texture complexity and per-scale importance.
//! 2. **Attention** ([`attention::TextureAttentionModule`]): multi-head self-attention
//!    over the downsampled grid, producing enhanced features, a direction histogram
//!    and per-position confidence.
//! 3. **Gabor response** ([`texture::GaborFilterBank`]): per-pixel energy and the
//!    dominant orientation and frequency.
//! 4. **SVD** ([`svd::SvdFeatureExtractor`]): truncated decomposition of the Gabor
//!    energy map by power iteration, memoised in a bounded content-addressed cache.
//! 5. **Scoring** ([`classifier`]): the fused vector is L2-normalised, pooled to a
//!    fixed length and scored by a linear head, either directly or through a
//!    three-member perturbation ensemble.
//!
//! Missing or failing feature sources are logged and skipped; classification only
//! fails when no stream produced any values.
//!
//! ## Weights
//!
//! Weights come from a [`classifier::WeightSource`]. The default
//! [`classifier::XavierWeights`] are seeded and untrained, so predictions are
//! deterministic but not meaningful until real weights are loaded. A configured
//! service can be exported to JSON and imported again unchanged.
//!
//! ```no_run
//! use texture_material_classifier::{ClassifierConfig, ImageData, MaterialClassificationService};
//!
//! # fn main() -> texture_material_classifier::Result<()> {
//! let service = MaterialClassificationService::new(ClassifierConfig::default())?;
//! let image = ImageData::from_file("sample.png")?;
//! let result = service.classify_image(&image)?;
//! println!("{} ({:.2})", result.category, result.confidence);
//! # Ok(())
//! # }
//! ```

pub mod attention;
pub mod classifier;
pub mod config;
pub mod error;
pub mod image;
pub mod memory;
pub mod svd;
pub mod tensor;
pub mod texture;

pub use classifier::{
    ClassificationResult, MaterialClassificationService, MaterialPrediction, MaterialProperties, ModelExport,
    ModelInfo, TextureAnalysis,
};
pub use config::ClassifierConfig;
pub use error::{ClassificationError, Result};
pub use image::{ImageData, TestTexture};
pub use svd::{SvdFeatureExtractor, SvdTextureFeatures};
pub use tensor::TextureFeatureMap;
