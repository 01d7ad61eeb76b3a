//! Feature producers consumed by the classifier.
//!
//! The classifier only depends on the two traits here. [`FourierGaborBank`] and
//! [`PyramidTextureModule`] are the implementations shipped with the crate; hosts with
//! their own filter banks plug them in through
//! [`MaterialClassificationService::builder`](crate::classifier::MaterialClassificationService::builder).

pub mod gabor;
pub mod multiscale;

pub use gabor::{FourierGaborBank, GaborBankConfig};
pub use multiscale::{MultiScaleConfig, PyramidTextureModule};

use crate::error::Result;
use crate::tensor::TextureFeatureMap;
use serde::{Deserialize, Serialize};

/// Output of a Gabor filter bank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureResponse {
    /// Per-pixel response energy, `width * height`
    pub energy_map: Vec<f32>,
    /// Orientation of the dominant line structure, degrees in [0, 180)
    pub dominant_orientation: f32,
    /// Dominant frequency relative to Nyquist, in [0, 1]
    pub dominant_frequency: f32,
    pub texture_energy: f32,
}

/// Output of a multi-scale texture module.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiScaleFeatures {
    /// Fused per-position features over the module's own grid
    pub fused_features: TextureFeatureMap,
    /// Roughly in [0, 10]
    pub texture_complexity: f32,
    /// One weight per scale, summing to 1
    pub scale_importance: Vec<f32>,
    /// Resolution of each scale relative to the input
    pub scale_factors: Vec<f32>,
}

impl MultiScaleFeatures {
    /// Scale factor of the most important scale, 1.0 when no scales are reported.
    pub fn dominant_scale_factor(&self) -> f32 {
        crate::tensor::ops::argmax(&self.scale_importance)
            .and_then(|i| self.scale_factors.get(i).copied())
            .unwrap_or(1.0)
    }
}

pub trait GaborFilterBank: Send + Sync {
    fn name(&self) -> &str;

    fn apply_filter_bank(&self, grayscale: &[f32], width: u32, height: u32, channels: u32) -> Result<TextureResponse>;
}

pub trait MultiScaleTextureModule: Send + Sync {
    fn name(&self) -> &str;

    /// Channel count of [`MultiScaleFeatures::fused_features`]
    fn feature_channels(&self) -> u32;

    fn process_multi_scale(&self, image: &[f32], width: u32, height: u32, channels: u32) -> Result<MultiScaleFeatures>;
}
