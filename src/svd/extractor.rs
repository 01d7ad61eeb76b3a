use super::SvdTextureFeatures;
use super::cache::{CacheKeyParts, CacheStats, SvdCache};
use crate::config::SvdConfig;
use crate::error::{ClassificationError, Result};
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Norms below this are treated as zero and skip normalisation.
const DEGENERATE_NORM: f32 = 1e-10;

/// A decomposition together with where it came from.
#[derive(Debug, Clone)]
pub struct SvdExtraction {
    pub features: Arc<SvdTextureFeatures>,
    pub cache_hit: bool,
}

/// Truncated SVD by power iteration with deflation.
///
/// Each component starts from a seeded random right vector, so a given matrix always
/// produces the same triplets. Results are memoised in a bounded LRU keyed by a
/// full-content hash of the input.
#[derive(Debug)]
pub struct SvdFeatureExtractor {
    config: SvdConfig,
    cache: Option<SvdCache>,
}

impl SvdFeatureExtractor {
    pub fn new(config: SvdConfig) -> Self {
        let cache = config.enable_cache.then(|| SvdCache::new(config.cache_capacity));
        Self { config, cache }
    }

    pub fn config(&self) -> &SvdConfig {
        &self.config
    }

    /// Top-`rank` singular triplets of a row-major `rows x cols` matrix.
    pub fn perform_svd(&self, matrix: &[f32], rows: usize, cols: usize) -> Result<SvdTextureFeatures> {
        Ok(self.extract(matrix, rows, cols)?.features.as_ref().clone())
    }

    /// Same as [`perform_svd`](Self::perform_svd) but shares the cached result and
    /// reports whether it was a cache hit.
    pub fn extract(&self, matrix: &[f32], rows: usize, cols: usize) -> Result<SvdExtraction> {
        if matrix.len() != rows * cols {
            return Err(ClassificationError::DimensionMismatch {
                context: "svd input matrix".to_string(),
                expected: rows * cols,
                actual: matrix.len(),
            });
        }

        let Some(cache) = &self.cache else {
            return Ok(SvdExtraction {
                features: Arc::new(self.decompose(matrix, rows, cols)),
                cache_hit: false,
            });
        };

        let key = SvdCache::key(&CacheKeyParts {
            matrix,
            rows,
            cols,
            rank: self.config.rank,
            power_iterations: self.config.power_iterations,
            seed: self.config.seed,
        });

        if let Some(features) = cache.get(&key) {
            debug!("SVD cache hit for {}x{} matrix", rows, cols);
            return Ok(SvdExtraction {
                features,
                cache_hit: true,
            });
        }

        let features = Arc::new(self.decompose(matrix, rows, cols));
        cache.insert(key, Arc::clone(&features));
        Ok(SvdExtraction {
            features,
            cache_hit: false,
        })
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(SvdCache::stats)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    fn decompose(&self, matrix: &[f32], rows: usize, cols: usize) -> SvdTextureFeatures {
        let rank = self.config.rank.min(rows).min(cols);
        if rank == 0 {
            return SvdTextureFeatures::empty();
        }

        // Center by the global mean
        let mean = matrix.iter().sum::<f32>() / matrix.len() as f32;
        let mut residual: Vec<f32> = matrix.iter().map(|&x| x - mean).collect();

        let mut singular_values = Vec::with_capacity(rank);
        let mut left_singular_vectors = Vec::with_capacity(rank * rows);
        let mut right_singular_vectors = Vec::with_capacity(rank * cols);

        let mut av = vec![0.0f32; rows];
        let mut atav = vec![0.0f32; cols];

        for component in 0..rank {
            let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(component as u64));
            let mut v: Vec<f32> = (0..cols).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            normalize(&mut v);

            for _ in 0..self.config.power_iterations {
                multiply(&residual, rows, cols, &v, &mut av);
                multiply_transposed(&residual, rows, cols, &av, &mut atav);
                v.copy_from_slice(&atav);
                orthogonalize(&mut v, &right_singular_vectors, cols);
                normalize(&mut v);
            }

            multiply(&residual, rows, cols, &v, &mut av);
            let sigma = av.iter().map(|x| x * x).sum::<f32>().sqrt();
            let u: Vec<f32> = if sigma >= DEGENERATE_NORM {
                av.iter().map(|x| x / sigma).collect()
            } else {
                vec![0.0; rows]
            };

            // Deflate: A <- A - sigma * u * v^T
            if sigma >= DEGENERATE_NORM {
                for (r, &ur) in u.iter().enumerate() {
                    let scaled = sigma * ur;
                    let row = &mut residual[r * cols..(r + 1) * cols];
                    for (a, &vc) in row.iter_mut().zip(&v) {
                        *a -= scaled * vc;
                    }
                }
            }

            singular_values.push(sigma);
            left_singular_vectors.extend_from_slice(&u);
            right_singular_vectors.extend_from_slice(&v);
        }

        // Deflation with inexact convergence can leave a later component stronger
        let mut order: Vec<usize> = (0..rank).collect();
        order.sort_by(|&a, &b| singular_values[b].total_cmp(&singular_values[a]));
        if order.iter().enumerate().any(|(i, &o)| i != o) {
            singular_values = order.iter().map(|&i| singular_values[i]).collect();
            left_singular_vectors = order
                .iter()
                .flat_map(|&i| left_singular_vectors[i * rows..(i + 1) * rows].iter().copied())
                .collect();
            right_singular_vectors = order
                .iter()
                .flat_map(|&i| right_singular_vectors[i * cols..(i + 1) * cols].iter().copied())
                .collect();
        }

        let frobenius = residual.iter().map(|x| x * x).sum::<f32>().sqrt();
        let reconstruction_error = frobenius / ((rows * cols) as f32).sqrt();

        debug!(
            "SVD {}x{} rank {}: leading sigma {:.4}, reconstruction error {:.6}",
            rows, cols, rank, singular_values[0], reconstruction_error
        );

        SvdTextureFeatures {
            singular_values,
            left_singular_vectors,
            right_singular_vectors,
            reconstruction_error,
            rank,
        }
    }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm >= DEGENERATE_NORM {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Remove the components of `v` along each earlier right vector.
fn orthogonalize(v: &mut [f32], previous: &[f32], cols: usize) {
    for basis in previous.chunks_exact(cols) {
        let dot: f32 = v.iter().zip(basis).map(|(a, b)| a * b).sum();
        for (x, &b) in v.iter_mut().zip(basis) {
            *x -= dot * b;
        }
    }
}

/// out = A v
fn multiply(a: &[f32], rows: usize, cols: usize, v: &[f32], out: &mut [f32]) {
    for (r, o) in out.iter_mut().enumerate().take(rows) {
        *o = a[r * cols..(r + 1) * cols].iter().zip(v).map(|(x, y)| x * y).sum();
    }
}

/// out = A^T w
fn multiply_transposed(a: &[f32], rows: usize, cols: usize, w: &[f32], out: &mut [f32]) {
    out.fill(0.0);
    for (r, &wr) in w.iter().enumerate().take(rows) {
        for (o, &x) in out.iter_mut().zip(&a[r * cols..(r + 1) * cols]) {
            *o += wr * x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn extractor(rank: usize, enable_cache: bool) -> SvdFeatureExtractor {
        SvdFeatureExtractor::new(SvdConfig {
            rank,
            enable_cache,
            ..SvdConfig::default()
        })
    }

    /// Sum of two separable patterns with clearly separated strengths.
    fn structured_matrix(rows: usize, cols: usize) -> Vec<f32> {
        let mut m = vec![0.0; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                let a = (r as f32 * 0.7).sin() * (c as f32 * 0.3).cos();
                let b = (r as f32 * 1.9).cos() * (c as f32 * 1.1).sin();
                m[r * cols + c] = 5.0 * a + 1.5 * b + 0.05 * ((r * 31 + c * 17) % 7) as f32;
            }
        }
        m
    }

    /// Sum of zero-mean orthogonal cosine outer products with strengths 8, 4, 2, 1.
    fn spectral_matrix(rows: usize, cols: usize) -> Vec<f32> {
        let tau = std::f32::consts::TAU;
        let mut m = vec![0.0; rows * cols];
        for (k, strength) in [8.0f32, 4.0, 2.0, 1.0].iter().enumerate() {
            let freq = (k + 1) as f32;
            for r in 0..rows {
                let u = (tau * freq * r as f32 / rows as f32).cos();
                for c in 0..cols {
                    let v = (tau * freq * c as f32 / cols as f32).cos();
                    m[r * cols + c] += strength * u * v;
                }
            }
        }
        m
    }

    #[test]
    fn rank_is_clamped_to_matrix_shape() {
        let features = extractor(8, false).perform_svd(&structured_matrix(3, 5), 3, 5).unwrap();
        assert_eq!(features.rank, 3);
        assert_eq!(features.singular_values.len(), 3);
        assert_eq!(features.left_singular_vectors.len(), 3 * 3);
        assert_eq!(features.right_singular_vectors.len(), 3 * 5);
    }

    #[test]
    fn singular_values_non_negative_and_ordered() {
        let features = extractor(4, false).perform_svd(&spectral_matrix(16, 12), 16, 12).unwrap();
        assert_eq!(features.singular_values.len(), 4);
        // cosine vectors of length n have squared norm n/2
        let scale = (8.0f32 * 6.0).sqrt();
        for (sigma, strength) in features.singular_values.iter().zip([8.0f32, 4.0, 2.0, 1.0]) {
            assert_abs_diff_eq!(*sigma, strength * scale, epsilon = 1e-2);
        }
        for pair in features.singular_values.windows(2) {
            assert!(pair[0] >= 0.0 && pair[1] >= 0.0);
            assert!(pair[0] + 1e-4 >= pair[1], "{:?}", features.singular_values);
        }
    }

    fn assert_non_increasing(values: &[f32]) {
        for pair in values.windows(2) {
            assert!(pair[0] >= pair[1], "{values:?}");
        }
    }

    #[test]
    fn gabor_energy_of_noise_gives_ordered_singular_values() {
        use crate::image::{ImageData, TestTexture};
        use crate::texture::{FourierGaborBank, GaborFilterBank};

        let bank = FourierGaborBank::default();
        let svd = SvdFeatureExtractor::new(SvdConfig {
            enable_cache: false,
            ..SvdConfig::default()
        });
        for seed in 0..20 {
            let gray = ImageData::create_test_texture(64, TestTexture::Noise { seed }).to_grayscale();
            let response = bank.apply_filter_bank(&gray.data, 64, 64, 1).unwrap();
            let features = svd.perform_svd(&response.energy_map, 64, 64).unwrap();
            assert_non_increasing(&features.singular_values);
        }
    }

    #[test]
    fn noise_matrix_gives_ordered_singular_values() {
        for seed in 0..10u64 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let m: Vec<f32> = (0..32 * 24).map(|_| rng.r#gen::<f32>()).collect();
            let features = extractor(8, false).perform_svd(&m, 32, 24).unwrap();
            assert_non_increasing(&features.singular_values);
        }
    }

    #[test]
    fn rank_one_matrix_is_reconstructed() {
        let (rows, cols) = (6, 4);
        let u = [1.0, -2.0, 0.5, 3.0, -1.0, 1.5];
        // v sums to zero, so the outer product is already centered
        let v = [2.0, -1.0, 0.5, -1.5];
        let mut m: Vec<f32> = Vec::new();
        for ur in u {
            for vc in v {
                m.push(ur * vc);
            }
        }

        let features = extractor(1, false).perform_svd(&m, rows, cols).unwrap();
        let expected: f32 = m.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert_abs_diff_eq!(features.singular_values[0], expected, epsilon = 1e-3);
        assert!(features.reconstruction_error < 1e-3);
    }

    #[test]
    fn reconstruction_error_does_not_grow_with_rank() {
        let m = structured_matrix(20, 20);
        let mut previous = f32::INFINITY;
        for k in 1..=6 {
            let error = extractor(k, false).perform_svd(&m, 20, 20).unwrap().reconstruction_error;
            assert!(error >= 0.0);
            assert!(error <= previous + 1e-6, "k={} error={} previous={}", k, error, previous);
            previous = error;
        }
    }

    #[test]
    fn constant_matrix_is_degenerate() {
        let features = extractor(3, false).perform_svd(&[2.0; 12], 3, 4).unwrap();
        assert!(features.singular_values.iter().all(|&s| s == 0.0));
        assert_eq!(features.reconstruction_error, 0.0);
    }

    #[test]
    fn empty_matrix_has_rank_zero() {
        let features = extractor(3, false).perform_svd(&[], 0, 4).unwrap();
        assert_eq!(features.rank, 0);
        assert!(features.singular_values.is_empty());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(extractor(2, false).perform_svd(&[1.0; 5], 2, 3).is_err());
    }

    #[test]
    fn cache_returns_identical_result() {
        let svd = extractor(4, true);
        let m = structured_matrix(10, 10);
        let first = svd.extract(&m, 10, 10).unwrap();
        let second = svd.extract(&m, 10, 10).unwrap();
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.features.singular_values, second.features.singular_values);

        let stats = svd.cache_stats().unwrap();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn matrices_sharing_a_prefix_do_not_collide() {
        let svd = extractor(2, true);
        let a = structured_matrix(12, 12);
        let mut b = a.clone();
        b[143] += 10.0;
        let fa = svd.extract(&a, 12, 12).unwrap();
        let fb = svd.extract(&b, 12, 12).unwrap();
        assert!(!fb.cache_hit);
        assert_ne!(fa.features.singular_values, fb.features.singular_values);
    }
}
