//! 2D Fourier transforms over row-major real grids, built from 1D `rustfft` passes.

use crate::error::{ClassificationError, Result};
use rustfft::{FftDirection, FftPlanner, num_complex::Complex};

fn check_len(len: usize, width: usize, height: usize) -> Result<()> {
    if len != width * height {
        return Err(ClassificationError::DimensionMismatch {
            context: "fft input".to_string(),
            expected: width * height,
            actual: len,
        });
    }
    Ok(())
}

/// Run a 2D transform in place: rows, transpose, columns, transpose back.
fn transform_2d(
    planner: &mut FftPlanner<f32>,
    data: &mut [Complex<f32>],
    width: usize,
    height: usize,
    direction: FftDirection,
) {
    if width == 0 || height == 0 {
        return;
    }

    let fft_width = planner.plan_fft(width, direction);
    data.chunks_exact_mut(width).for_each(|row| fft_width.process(row));

    // Transpose for vertical processing
    let mut transposed = vec![Complex::new(0.0, 0.0); width * height];
    (0..height).flat_map(|y| (0..width).map(move |x| (y, x))).for_each(|(y, x)| {
        transposed[x * height + y] = data[y * width + x];
    });

    let fft_height = planner.plan_fft(height, direction);
    transposed.chunks_exact_mut(height).for_each(|col| fft_height.process(col));

    // Transpose back
    (0..height).flat_map(|y| (0..width).map(move |x| (y, x))).for_each(|(y, x)| {
        data[y * width + x] = transposed[x * height + y];
    });
}

/// Compute 2D FFT of real data
pub fn fft_2d_real(planner: &mut FftPlanner<f32>, data: &[f32], width: usize, height: usize) -> Result<Vec<Complex<f32>>> {
    check_len(data.len(), width, height)?;
    let mut complex_data: Vec<Complex<f32>> = data.iter().map(|&x| Complex::new(x, 0.0)).collect();
    transform_2d(planner, &mut complex_data, width, height, FftDirection::Forward);
    Ok(complex_data)
}

/// Compute normalised 2D inverse FFT, keeping the complex result
pub fn ifft_2d_complex(
    planner: &mut FftPlanner<f32>,
    data: &[Complex<f32>],
    width: usize,
    height: usize,
) -> Result<Vec<Complex<f32>>> {
    check_len(data.len(), width, height)?;
    let mut complex_data = data.to_vec();
    transform_2d(planner, &mut complex_data, width, height, FftDirection::Inverse);

    let normalisation = (width * height) as f32;
    complex_data.iter_mut().for_each(|c| *c /= normalisation);
    Ok(complex_data)
}

/// Signed frequency (cycles per sample) of FFT bin `index` for a transform of length `n`
pub fn bin_frequency(index: usize, n: usize) -> f32 {
    if index <= n / 2 {
        index as f32 / n as f32
    } else {
        index as f32 / n as f32 - 1.0
    }
}
