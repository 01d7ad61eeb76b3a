use super::positional::sinusoidal_table;
use super::{DIRECTION_BUCKETS, Direction, TextureAttentionOutput};
use crate::config::AttentionConfig;
use crate::error::{ClassificationError, Result};
use crate::memory::{ScratchBuffer, ScratchPool};
use crate::tensor::TextureFeatureMap;
use crate::tensor::ops::{entropy_bits, project_rows, softmax_in_place};
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// Projection matrices of the attention block, all row-major `in x out`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionWeights {
    /// `channels x heads*key_dim`
    pub query: Vec<f32>,
    pub key: Vec<f32>,
    pub value: Vec<f32>,
    /// `heads*key_dim x channels`
    pub output: Vec<f32>,
}

impl AttentionWeights {
    /// Xavier-uniform initialisation from a seed.
    pub fn xavier(input_channels: usize, inner_dim: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut init = |fan_in: usize, fan_out: usize| -> Vec<f32> {
            let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
            (0..fan_in * fan_out).map(|_| rng.gen_range(-limit..=limit)).collect()
        };
        let query = init(input_channels, inner_dim);
        let key = init(input_channels, inner_dim);
        let value = init(input_channels, inner_dim);
        let output = init(inner_dim, input_channels);
        Self {
            query,
            key,
            value,
            output,
        }
    }

    /// Tensor names and expected lengths, in load order.
    pub fn layout(input_channels: usize, inner_dim: usize) -> [(&'static str, usize); 4] {
        let projection = input_channels * inner_dim;
        [
            ("attention.query", projection),
            ("attention.key", projection),
            ("attention.value", projection),
            ("attention.output", projection),
        ]
    }
}

/// Per-head result before heads are merged.
struct HeadOutput {
    attention: ScratchBuffer,
    context: ScratchBuffer,
}

/// Texture-aware multi-head self-attention over a 2D feature grid.
///
/// Cost is quadratic in `width * height`; callers feed a downsampled grid and
/// sequences longer than `max_sequence_length` are rejected.
#[derive(Debug)]
pub struct TextureAttentionModule {
    config: AttentionConfig,
    input_channels: usize,
    weights: AttentionWeights,
    positional: Vec<f32>,
    pool: ScratchPool,
    training: bool,
    dropout_seed: u64,
    dropout_passes: AtomicU64,
}

impl TextureAttentionModule {
    /// Module with Xavier-initialised projections.
    pub fn new(config: AttentionConfig, input_channels: usize, seed: u64) -> Self {
        let inner_dim = config.head_count * config.key_dim;
        let weights = AttentionWeights::xavier(input_channels, inner_dim, seed);
        let mut module = Self::build(config, input_channels, weights);
        module.dropout_seed = seed;
        module
    }

    /// Module with externally supplied projections; shapes are checked.
    pub fn with_weights(config: AttentionConfig, input_channels: usize, weights: AttentionWeights) -> Result<Self> {
        let inner_dim = config.head_count * config.key_dim;
        let tensors = [&weights.query, &weights.key, &weights.value, &weights.output];
        for ((name, expected), tensor) in AttentionWeights::layout(input_channels, inner_dim).iter().zip(tensors) {
            if tensor.len() != *expected {
                return Err(ClassificationError::DimensionMismatch {
                    context: name.to_string(),
                    expected: *expected,
                    actual: tensor.len(),
                });
            }
        }
        Ok(Self::build(config, input_channels, weights))
    }

    fn build(config: AttentionConfig, input_channels: usize, weights: AttentionWeights) -> Self {
        let positional = sinusoidal_table(config.max_sequence_length, input_channels);
        let pool = ScratchPool::new(config.head_count.max(1) * 2);
        debug!(
            "Attention module: {} channels, {} heads x {} dims, max sequence {}",
            input_channels, config.head_count, config.key_dim, config.max_sequence_length
        );
        Self {
            config,
            input_channels,
            weights,
            positional,
            pool,
            training: false,
            dropout_seed: 0,
            dropout_passes: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn weights(&self) -> &AttentionWeights {
        &self.weights
    }

    /// Dropout is applied to attention weights only while training.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Seed of the dropout masks. Each training pass draws a fresh stream from it.
    pub fn set_dropout_seed(&mut self, seed: u64) {
        self.dropout_seed = seed;
        self.dropout_passes.store(0, Ordering::Relaxed);
    }

    pub fn scratch_pool(&self) -> &ScratchPool {
        &self.pool
    }

    pub fn process_texture(&self, input: &TextureFeatureMap) -> Result<TextureAttentionOutput> {
        if input.channels as usize != self.input_channels {
            return Err(ClassificationError::DimensionMismatch {
                context: "attention input channels".to_string(),
                expected: self.input_channels,
                actual: input.channels as usize,
            });
        }
        let seq = input.sequence_len();
        if seq == 0 {
            return Ok(TextureAttentionOutput::empty());
        }
        if seq > self.config.max_sequence_length {
            return Err(ClassificationError::InvalidInput(format!(
                "attention sequence of {} positions exceeds the maximum of {}; downsample the feature grid first",
                seq, self.config.max_sequence_length
            )));
        }

        let channels = self.input_channels;
        let inner = self.config.head_count * self.config.key_dim;

        // Sequence with positional information
        let mut x = self.pool.get_or_create_buffer(seq * channels);
        for (i, value) in x.iter_mut().enumerate() {
            *value = input.features[i] + self.config.positional_scale * self.positional[i];
        }

        let mut q = self.pool.get_or_create_buffer(seq * inner);
        let mut k = self.pool.get_or_create_buffer(seq * inner);
        let mut v = self.pool.get_or_create_buffer(seq * inner);
        project_rows(&x, seq, channels, &self.weights.query, inner, &mut q);
        project_rows(&x, seq, channels, &self.weights.key, inner, &mut k);
        project_rows(&x, seq, channels, &self.weights.value, inner, &mut v);

        let pass = if self.training {
            self.dropout_passes.fetch_add(1, Ordering::Relaxed)
        } else {
            0
        };
        let heads: Vec<HeadOutput> = if self.config.parallel_heads {
            (0..self.config.head_count)
                .into_par_iter()
                .map(|h| self.attend_head(h, &q, &k, &v, seq, pass))
                .collect()
        } else {
            (0..self.config.head_count)
                .map(|h| self.attend_head(h, &q, &k, &v, seq, pass))
                .collect()
        };

        // Concatenate heads and average their attention maps
        let dk = self.config.key_dim;
        let mut context = self.pool.get_or_create_buffer(seq * inner);
        let mut attention_weights = vec![0.0f32; seq * seq];
        let head_share = 1.0 / self.config.head_count as f32;
        for (h, head) in heads.into_iter().enumerate() {
            for i in 0..seq {
                context[i * inner + h * dk..i * inner + (h + 1) * dk]
                    .copy_from_slice(&head.context[i * dk..(i + 1) * dk]);
            }
            for (combined, &a) in attention_weights.iter_mut().zip(head.attention.iter()) {
                *combined += a * head_share;
            }
            self.pool.return_buffer_to_pool(head.attention);
            self.pool.return_buffer_to_pool(head.context);
        }

        let mut enhanced_features = vec![0.0f32; seq * channels];
        project_rows(&context, seq, inner, &self.weights.output, channels, &mut enhanced_features);

        for buffer in [x, q, k, v, context] {
            self.pool.return_buffer_to_pool(buffer);
        }

        let texture_directions = direction_histogram(&attention_weights, input.width as usize, seq);
        let confidence_scores = row_confidence(&attention_weights, seq);

        Ok(TextureAttentionOutput {
            attention_weights,
            enhanced_features,
            texture_directions,
            confidence_scores,
        })
    }

    /// Scaled dot-product attention for one head.
    ///
    /// The returned attention map is the softmax output; dropout only touches the
    /// copy used for the context.
    fn attend_head(&self, head: usize, q: &[f32], k: &[f32], v: &[f32], seq: usize, pass: u64) -> HeadOutput {
        let dk = self.config.key_dim;
        let inner = self.config.head_count * dk;
        let offset = head * dk;
        let scale = 1.0 / ((dk as f32).sqrt() * self.config.temperature_scaling);

        let mut attention = self.pool.get_or_create_buffer(seq * seq);
        for i in 0..seq {
            let qi = &q[i * inner + offset..i * inner + offset + dk];
            let row = &mut attention[i * seq..(i + 1) * seq];
            for (j, score) in row.iter_mut().enumerate() {
                let kj = &k[j * inner + offset..j * inner + offset + dk];
                *score = qi.iter().zip(kj).map(|(a, b)| a * b).sum::<f32>() * scale;
            }
            softmax_in_place(row);
        }

        let dropped = if self.training && self.config.dropout_rate > 0.0 {
            let rate = self.config.dropout_rate;
            let keep_scale = 1.0 / (1.0 - rate);
            let mut rng = ChaCha8Rng::seed_from_u64(self.dropout_seed);
            rng.set_stream(pass.wrapping_mul(self.config.head_count as u64).wrapping_add(head as u64));
            let mut dropped = self.pool.get_or_create_buffer(seq * seq);
            for (d, &a) in dropped.iter_mut().zip(attention.iter()) {
                *d = if rng.r#gen::<f32>() < rate { 0.0 } else { a * keep_scale };
            }
            Some(dropped)
        } else {
            None
        };
        let weights: &[f32] = dropped.as_deref().unwrap_or(&attention[..]);

        let mut context = self.pool.get_or_create_buffer(seq * dk);
        for i in 0..seq {
            let out = &mut context[i * dk..(i + 1) * dk];
            for j in 0..seq {
                let a = weights[i * seq + j];
                if a == 0.0 {
                    continue;
                }
                let vj = &v[j * inner + offset..j * inner + offset + dk];
                for (o, &x) in out.iter_mut().zip(vj) {
                    *o += a * x;
                }
            }
        }

        if let Some(dropped) = dropped {
            self.pool.return_buffer_to_pool(dropped);
        }
        HeadOutput { attention, context }
    }
}

/// Accumulate attention mass by the spatial displacement between query and key.
fn direction_histogram(attention: &[f32], width: usize, seq: usize) -> [f32; DIRECTION_BUCKETS] {
    let mut buckets = [0.0f32; DIRECTION_BUCKETS];
    let width = width.max(1);
    for i in 0..seq {
        let (ri, ci) = ((i / width) as i64, (i % width) as i64);
        for j in 0..seq {
            let weight = attention[i * seq + j];
            if weight <= 0.0 {
                continue;
            }
            let dr = (j / width) as i64 - ri;
            let dc = (j % width) as i64 - ci;
            if let Some(direction) = Direction::classify(dr, dc) {
                buckets[direction as usize] += weight;
            }
        }
    }
    let total: f32 = buckets.iter().sum();
    if total > 0.0 {
        for b in buckets.iter_mut() {
            *b /= total;
        }
    }
    buckets
}

/// `1 - H(row) / log2(seq)`, clamped to [0, 1].
fn row_confidence(attention: &[f32], seq: usize) -> Vec<f32> {
    if seq <= 1 {
        return vec![1.0; seq];
    }
    let max_entropy = (seq as f32).log2();
    attention
        .chunks_exact(seq)
        .map(|row| (1.0 - entropy_bits(row) / max_entropy).clamp(0.0, 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid(width: u32, height: u32, channels: u32) -> TextureFeatureMap {
        let n = (width * height * channels) as usize;
        let features = (0..n).map(|i| ((i as f32) * 0.37).sin()).collect();
        TextureFeatureMap::new(features, width, height, channels).unwrap()
    }

    fn module(channels: usize) -> TextureAttentionModule {
        TextureAttentionModule::new(AttentionConfig::default(), channels, 11)
    }

    #[test]
    fn attention_rows_are_distributions() {
        let out = module(6).process_texture(&grid(5, 4, 6)).unwrap();
        let seq = 20;
        assert_eq!(out.attention_weights.len(), seq * seq);
        for row in out.attention_weights.chunks(seq) {
            assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
            assert!(row.iter().all(|&a| (0.0..=1.0).contains(&a)));
        }
    }

    #[test]
    fn outputs_have_expected_shapes() {
        let out = module(3).process_texture(&grid(4, 4, 3)).unwrap();
        assert_eq!(out.enhanced_features.len(), 16 * 3);
        assert_eq!(out.confidence_scores.len(), 16);
        assert!(out.confidence_scores.iter().all(|&c| (0.0..=1.0).contains(&c)));
        assert_abs_diff_eq!(out.texture_directions.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn single_row_grid_is_purely_horizontal() {
        let out = module(2).process_texture(&grid(6, 1, 2)).unwrap();
        assert_abs_diff_eq!(out.texture_directions[Direction::Horizontal as usize], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn single_position_has_full_confidence_and_no_direction() {
        let out = module(2).process_texture(&grid(1, 1, 2)).unwrap();
        assert_eq!(out.attention_weights, vec![1.0]);
        assert_eq!(out.confidence_scores, vec![1.0]);
        assert_eq!(out.texture_directions, [0.0; DIRECTION_BUCKETS]);
    }

    #[test]
    fn rejects_channel_mismatch_and_long_sequences() {
        let attention = module(4);
        assert!(attention.process_texture(&grid(2, 2, 3)).is_err());

        let config = AttentionConfig {
            max_sequence_length: 8,
            ..AttentionConfig::default()
        };
        let small = TextureAttentionModule::new(config, 1, 3);
        assert!(matches!(
            small.process_texture(&grid(3, 3, 1)),
            Err(ClassificationError::InvalidInput(_))
        ));
    }

    #[test]
    fn parallel_heads_match_sequential() {
        let input = grid(4, 3, 5);
        let sequential = module(5).process_texture(&input).unwrap();
        let config = AttentionConfig {
            parallel_heads: true,
            ..AttentionConfig::default()
        };
        let parallel = TextureAttentionModule::new(config, 5, 11).process_texture(&input).unwrap();
        assert_eq!(sequential.attention_weights, parallel.attention_weights);
        assert_eq!(sequential.enhanced_features, parallel.enhanced_features);
    }

    #[test]
    fn training_dropout_only_changes_the_context() {
        let input = grid(4, 4, 3);
        let eval = module(3).process_texture(&input).unwrap();

        let config = AttentionConfig {
            dropout_rate: 0.5,
            ..AttentionConfig::default()
        };
        let training = || {
            let mut m = TextureAttentionModule::new(config.clone(), 3, 11);
            m.set_training(true);
            m.process_texture(&input).unwrap()
        };
        let first = training();

        for row in first.attention_weights.chunks(16) {
            assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(first.texture_directions.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        assert_eq!(first.attention_weights, eval.attention_weights);
        assert_eq!(first.texture_directions, eval.texture_directions);
        assert_eq!(first.confidence_scores, eval.confidence_scores);
        assert_ne!(first.enhanced_features, eval.enhanced_features);

        // same seed, same masks
        assert_eq!(training().enhanced_features, first.enhanced_features);

        let mut reseeded = TextureAttentionModule::new(config.clone(), 3, 11);
        reseeded.set_training(true);
        reseeded.set_dropout_seed(12);
        assert_ne!(reseeded.process_texture(&input).unwrap().enhanced_features, first.enhanced_features);
    }

    #[test]
    fn scratch_buffers_are_recycled() {
        let attention = module(3);
        attention.process_texture(&grid(3, 3, 3)).unwrap();
        let (idle, _) = attention.scratch_pool().get_pool_statistics();
        assert!(idle > 0);
        attention.process_texture(&grid(3, 3, 3)).unwrap();
        assert_eq!(attention.scratch_pool().get_pool_statistics().0, idle);
    }

    #[test]
    fn with_weights_checks_shapes() {
        let config = AttentionConfig::default();
        let mut weights = AttentionWeights::xavier(3, config.head_count * config.key_dim, 1);
        weights.output.pop();
        assert!(TextureAttentionModule::with_weights(config, 3, weights).is_err());
    }

    #[test]
    fn sharp_attention_has_high_confidence() {
        let flat = [0.25f32; 4];
        let sharp = [1.0f32, 0.0, 0.0, 0.0];
        let mut attention = flat.to_vec();
        attention.extend_from_slice(&sharp);
        attention.extend_from_slice(&flat);
        attention.extend_from_slice(&flat);
        let confidence = row_confidence(&attention, 4);
        assert_abs_diff_eq!(confidence[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(confidence[1], 1.0, epsilon = 1e-6);
    }
}
