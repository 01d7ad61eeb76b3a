//! Small dense vector helpers shared by the attention and classification stages.

/// Numerically stable softmax (max subtraction).
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let mut out = scores.to_vec();
    softmax_in_place(&mut out);
    out
}

pub fn softmax_in_place(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

/// L2 normalisation; vectors with norm below 1e-10 are left untouched.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-10 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Population variance; 0 for empty input.
pub fn variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32
}

/// Shannon entropy in bits, skipping zero entries.
pub fn entropy_bits(distribution: &[f32]) -> f32 {
    distribution
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.log2())
        .sum()
}

/// Index of the largest value (first one on ties).
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Row-major `rows x cols` matrix times a vector of length `cols`.
pub fn matvec(matrix: &[f32], rows: usize, cols: usize, vector: &[f32]) -> Vec<f32> {
    debug_assert_eq!(matrix.len(), rows * cols);
    debug_assert_eq!(vector.len(), cols);
    matrix
        .chunks_exact(cols)
        .map(|row| row.iter().zip(vector).map(|(a, b)| a * b).sum())
        .collect()
}

/// Project `n` row vectors of width `in_dim` through a row-major `in_dim x out_dim`
/// matrix, writing `n x out_dim` values into `out`.
pub fn project_rows(input: &[f32], n: usize, in_dim: usize, weights: &[f32], out_dim: usize, out: &mut [f32]) {
    debug_assert_eq!(input.len(), n * in_dim);
    debug_assert_eq!(weights.len(), in_dim * out_dim);
    debug_assert_eq!(out.len(), n * out_dim);
    out.fill(0.0);
    for row in 0..n {
        let x = &input[row * in_dim..(row + 1) * in_dim];
        let y = &mut out[row * out_dim..(row + 1) * out_dim];
        for (i, &xi) in x.iter().enumerate() {
            if xi == 0.0 {
                continue;
            }
            let w = &weights[i * out_dim..(i + 1) * out_dim];
            for (yj, &wj) in y.iter_mut().zip(w) {
                *yj += xi * wj;
            }
        }
    }
}

/// Average-pool a vector of any non-zero length onto exactly `target` buckets.
///
/// When the input is shorter than `target`, buckets repeat the nearest input value.
pub fn adaptive_average_pool(values: &[f32], target: usize) -> Vec<f32> {
    let n = values.len();
    if n == 0 || target == 0 {
        return vec![0.0; target];
    }
    if n == target {
        return values.to_vec();
    }
    (0..target)
        .map(|i| {
            let start = i * n / target;
            let end = ((i + 1) * n / target).max(start + 1).min(n);
            mean(&values[start..end])
        })
        .collect()
}
