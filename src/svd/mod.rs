//! Truncated SVD texture descriptors.

pub mod cache;
pub mod extractor;

pub use cache::CacheStats;
pub use extractor::{SvdExtraction, SvdFeatureExtractor};

use serde::{Deserialize, Serialize};

/// Top-`rank` singular triplets of a texture energy matrix.
///
/// Vectors are stored component-major: component `i` occupies
/// `left_singular_vectors[i*rows..(i+1)*rows]` and
/// `right_singular_vectors[i*cols..(i+1)*cols]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvdTextureFeatures {
    pub singular_values: Vec<f32>,
    pub left_singular_vectors: Vec<f32>,
    pub right_singular_vectors: Vec<f32>,
    /// Frobenius norm of the residual divided by sqrt(rows * cols)
    pub reconstruction_error: f32,
    pub rank: usize,
}

impl SvdTextureFeatures {
    pub fn empty() -> Self {
        Self {
            singular_values: Vec::new(),
            left_singular_vectors: Vec::new(),
            right_singular_vectors: Vec::new(),
            reconstruction_error: 0.0,
            rank: 0,
        }
    }

    /// Share of total spectral energy captured by the leading component.
    pub fn dominance(&self) -> f32 {
        let total: f32 = self.singular_values.iter().map(|s| s * s).sum();
        match self.singular_values.first() {
            Some(&first) if total > 0.0 => first * first / total,
            _ => 0.0,
        }
    }
}
