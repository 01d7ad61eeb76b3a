//! Multi-head self-attention over texture feature grids.

pub mod module;
pub mod positional;

pub use module::{AttentionWeights, TextureAttentionModule};

use serde::{Deserialize, Serialize};

pub const DIRECTION_BUCKETS: usize = 4;

/// Dominant-direction buckets, in histogram order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Horizontal = 0,
    Vertical = 1,
    /// "\" : row and column move together
    DiagonalDown = 2,
    /// "/" : row and column move in opposite directions
    DiagonalUp = 3,
}

impl Direction {
    pub const ALL: [Direction; DIRECTION_BUCKETS] = [
        Direction::Horizontal,
        Direction::Vertical,
        Direction::DiagonalDown,
        Direction::DiagonalUp,
    ];

    /// Bucket for a displacement; `None` for zero displacement.
    pub fn classify(d_row: i64, d_col: i64) -> Option<Self> {
        let (ar, ac) = (d_row.abs(), d_col.abs());
        if ac > ar {
            Some(Direction::Horizontal)
        } else if ar > ac {
            Some(Direction::Vertical)
        } else if d_row * d_col > 0 {
            Some(Direction::DiagonalDown)
        } else if d_row * d_col < 0 {
            Some(Direction::DiagonalUp)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Horizontal => "horizontal",
            Direction::Vertical => "vertical",
            Direction::DiagonalDown => "diagonal_down",
            Direction::DiagonalUp => "diagonal_up",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureAttentionOutput {
    /// Head-averaged attention, `seq x seq` row-major
    pub attention_weights: Vec<f32>,
    /// `seq x channels`
    pub enhanced_features: Vec<f32>,
    /// Attention mass per [`Direction`], normalised to 1 (all zero when nothing attended elsewhere)
    pub texture_directions: [f32; DIRECTION_BUCKETS],
    /// Per-position confidence in [0, 1]
    pub confidence_scores: Vec<f32>,
}

impl TextureAttentionOutput {
    pub fn empty() -> Self {
        Self {
            attention_weights: Vec::new(),
            enhanced_features: Vec::new(),
            texture_directions: [0.0; DIRECTION_BUCKETS],
            confidence_scores: Vec::new(),
        }
    }

    pub fn dominant_direction(&self) -> Option<Direction> {
        crate::tensor::ops::argmax(&self.texture_directions)
            .filter(|&i| self.texture_directions[i] > 0.0)
            .map(|i| Direction::ALL[i])
    }

    pub fn mean_confidence(&self) -> f32 {
        crate::tensor::ops::mean(&self.confidence_scores)
    }
}
