use super::weights::{CLASSIFIER_BIAS, CLASSIFIER_WEIGHT, WeightSource, load_checked};
use crate::error::{ClassificationError, Result};
use crate::tensor::ops::{entropy_bits, matvec, softmax};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Number of models in the scoring ensemble.
pub const ENSEMBLE_SIZE: usize = 3;

/// Deterministic input transform of one ensemble member:
/// `x[i] * (1 + amplitude * sin(frequency * i + phase))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerturbationSignature {
    pub amplitude: f32,
    pub frequency: f32,
    pub phase: f32,
}

impl PerturbationSignature {
    pub fn apply(&self, features: &[f32]) -> Vec<f32> {
        features
            .iter()
            .enumerate()
            .map(|(i, x)| x * (1.0 + self.amplitude * (self.frequency * i as f32 + self.phase).sin()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMember {
    pub name: String,
    /// Accuracy the member was declared with; informational only
    pub declared_accuracy: f32,
    pub signature: PerturbationSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingStrategy {
    /// Weighted sum of member logits followed by one softmax
    WeightedLogits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEnsemble {
    pub models: Vec<EnsembleMember>,
    pub weights: Vec<f32>,
    pub voting_strategy: VotingStrategy,
}

impl ModelEnsemble {
    /// The three built-in members with the given voting weights.
    pub fn standard(weights: &[f32]) -> Self {
        let members = [
            ("texture-primary", 0.92, 0.05, 0.37, 0.0),
            ("texture-spectral", 0.89, 0.10, 0.74, PI / 3.0),
            ("texture-structural", 0.87, 0.15, 1.11, 2.0 * PI / 3.0),
        ];
        Self {
            models: members
                .iter()
                .map(|&(name, declared_accuracy, amplitude, frequency, phase)| EnsembleMember {
                    name: name.to_string(),
                    declared_accuracy,
                    signature: PerturbationSignature {
                        amplitude,
                        frequency,
                        phase,
                    },
                })
                .collect(),
            weights: weights.to_vec(),
            voting_strategy: VotingStrategy::WeightedLogits,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.len() != self.weights.len() || self.models.is_empty() {
            return Err(ClassificationError::InvalidConfig(format!(
                "ensemble has {} models but {} weights",
                self.models.len(),
                self.weights.len()
            )));
        }
        let total: f32 = self.weights.iter().sum();
        if (total - 1.0).abs() > 1e-3 || self.weights.iter().any(|w| *w < 0.0) {
            return Err(ClassificationError::InvalidConfig(
                "ensemble weights must be non-negative and sum to 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dense `classes x dim` scoring layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearHead {
    weight: Vec<f32>,
    bias: Vec<f32>,
    classes: usize,
    dim: usize,
}

impl LinearHead {
    pub fn load(source: &dyn WeightSource, classes: usize, dim: usize) -> Result<Self> {
        let weight = load_checked(source, CLASSIFIER_WEIGHT, &[classes, dim])?;
        let bias = load_checked(source, CLASSIFIER_BIAS, &[classes])?;
        Ok(Self {
            weight,
            bias,
            classes,
            dim,
        })
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    pub fn logits(&self, features: &[f32]) -> Result<Vec<f32>> {
        if features.len() != self.dim {
            return Err(ClassificationError::DimensionMismatch {
                context: "classifier input".to_string(),
                expected: self.dim,
                actual: features.len(),
            });
        }
        let mut logits = matvec(&self.weight, self.classes, self.dim, features);
        for (l, b) in logits.iter_mut().zip(&self.bias) {
            *l += b;
        }
        Ok(logits)
    }
}

/// Single-model probabilities: `softmax(W x + b)`.
pub fn score_single(head: &LinearHead, features: &[f32]) -> Result<Vec<f32>> {
    Ok(softmax(&head.logits(features)?))
}

/// Ensemble probabilities: each member scores its own perturbation of `features`,
/// logits are combined with the ensemble weights and normalised once.
pub fn score_ensemble(head: &LinearHead, ensemble: &ModelEnsemble, features: &[f32], parallel: bool) -> Result<Vec<f32>> {
    let member_logits = |member: &EnsembleMember| head.logits(&member.signature.apply(features));
    let per_member: Vec<Vec<f32>> = if parallel {
        ensemble.models.par_iter().map(member_logits).collect::<Result<_>>()?
    } else {
        ensemble.models.iter().map(member_logits).collect::<Result<_>>()?
    };

    // Summed in member order so parallel and sequential scoring agree bit for bit
    let mut combined = vec![0.0f32; head.classes()];
    for (logits, weight) in per_member.iter().zip(&ensemble.weights) {
        for (c, l) in combined.iter_mut().zip(logits) {
            *c += weight * l;
        }
    }
    Ok(softmax(&combined))
}

/// Ranked class probabilities with per-prediction confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedScore {
    pub class_index: usize,
    pub probability: f32,
    pub confidence: f32,
}

/// Rank classes by probability and score each one.
///
/// Per-prediction confidence is `0.6 p + 0.3 margin + 0.1 (1 - H_norm)` where the
/// margin is to the next-ranked class and `H_norm` is the distribution's entropy over
/// `log2(n)`.
pub fn rank_predictions(probabilities: &[f32]) -> Vec<RankedScore> {
    let n = probabilities.len();
    let normalised_entropy = if n > 1 {
        entropy_bits(probabilities) / (n as f32).log2()
    } else {
        0.0
    };

    let mut order: Vec<usize> = (0..n).collect();
    // Stable sort keeps category order on ties
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    order
        .iter()
        .enumerate()
        .map(|(rank, &class_index)| {
            let probability = probabilities[class_index];
            let margin = order
                .get(rank + 1)
                .map_or(0.0, |&next| probability - probabilities[next]);
            let confidence = 0.6 * probability + 0.3 * margin + 0.1 * (1.0 - normalised_entropy);
            RankedScore {
                class_index,
                probability,
                confidence: confidence.clamp(0.0, 1.0),
            }
        })
        .collect()
}

/// Overall confidence: `top + 0.1 (top - second)` over prediction confidences.
pub fn overall_confidence(ranked: &[RankedScore]) -> f32 {
    match ranked {
        [] => 0.0,
        [only] => only.confidence.clamp(0.0, 1.0),
        [top, second, ..] => (top.confidence + 0.1 * (top.confidence - second.confidence)).clamp(0.0, 1.0),
    }
}
