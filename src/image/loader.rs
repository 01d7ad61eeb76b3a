use crate::error::{ClassificationError, Result};
use crate::tensor::feature_map::checked_len;
use image::{DynamicImage, GenericImageView, ImageBuffer};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::Path;

/// Synthetic textures for tests, demos and benchmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestTexture {
    /// Flat colour at the given gray level in [0,1]
    Uniform(f32),
    /// Sinusoidal stripes; `angle` in degrees, 0 means the stripes vary along x
    Stripes { period: f32, angle: f32 },
    Checkerboard { cell: u32 },
    /// Uniform random noise
    Noise { seed: u64 },
}

/// Interleaved image samples normalised to [0,1].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl ImageData {
    /// Wrap a raw interleaved buffer. Buffers whose maximum exceeds 1 are taken to be
    /// on a 0-255 scale and are rescaled.
    pub fn from_raw(data: Vec<f32>, width: u32, height: u32, channels: u32) -> Result<Self> {
        if channels == 0 {
            return Err(ClassificationError::InvalidInput("image must have at least one channel".to_string()));
        }
        let expected = checked_len(width, height, channels, "image")?;
        if data.len() != expected {
            return Err(ClassificationError::DimensionMismatch {
                context: "image buffer".to_string(),
                expected,
                actual: data.len(),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ClassificationError::InvalidInput("image contains non-finite samples".to_string()));
        }

        let max_val = data.iter().cloned().fold(0.0f32, f32::max);
        let data = if max_val > 1.0 {
            data.into_iter().map(|v| (v / 255.0).clamp(0.0, 1.0)).collect()
        } else {
            data.into_iter().map(|v| v.max(0.0)).collect()
        };

        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Load image from file and convert to normalised float data
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let img = image::open(path)?;
        Self::from_dynamic_image(img)
    }

    /// Convert DynamicImage to normalised float data, keeping colour
    pub fn from_dynamic_image(img: DynamicImage) -> Result<Self> {
        let (width, height) = img.dimensions();

        match img {
            DynamicImage::ImageLuma8(img) => {
                let data = img.pixels().map(|pixel| pixel[0] as f32 / 255.0).collect();
                Ok(Self {
                    data,
                    width,
                    height,
                    channels: 1,
                })
            }
            DynamicImage::ImageRgb8(img) => {
                let data = img
                    .pixels()
                    .flat_map(|pixel| pixel.0.map(|c| c as f32 / 255.0))
                    .collect();
                Ok(Self {
                    data,
                    width,
                    height,
                    channels: 3,
                })
            }
            _ => {
                // Alpha and high bit depth formats go through RGB8
                let rgb_img = img.to_rgb8();
                Self::from_dynamic_image(DynamicImage::ImageRgb8(rgb_img))
            }
        }
    }

    /// Create a synthetic RGB texture
    pub fn create_test_texture(size: u32, texture: TestTexture) -> Self {
        let mut gray = vec![0.0f32; size as usize * size as usize];

        match texture {
            TestTexture::Uniform(level) => gray.fill(level.clamp(0.0, 1.0)),
            TestTexture::Stripes { period, angle } => {
                let (sin_a, cos_a) = angle.to_radians().sin_cos();
                let period = period.max(1.0);
                for y in 0..size {
                    for x in 0..size {
                        let t = x as f32 * cos_a + y as f32 * sin_a;
                        gray[(y * size + x) as usize] = 0.5 + 0.5 * (std::f32::consts::TAU * t / period).sin();
                    }
                }
            }
            TestTexture::Checkerboard { cell } => {
                let cell = cell.max(1);
                for y in 0..size {
                    for x in 0..size {
                        if ((x / cell) + (y / cell)) % 2 == 0 {
                            gray[(y * size + x) as usize] = 1.0;
                        }
                    }
                }
            }
            TestTexture::Noise { seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                for value in gray.iter_mut() {
                    *value = rng.r#gen::<f32>();
                }
            }
        }

        Self {
            data: gray.iter().flat_map(|&g| [g, g, g]).collect(),
            width: size,
            height: size,
            channels: 3,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Single-channel luminance copy
    pub fn to_grayscale(&self) -> ImageData {
        let c = self.channels as usize;
        let data = match c {
            1 => self.data.clone(),
            // luma + alpha
            2 => self.data.chunks_exact(2).map(|p| p[0]).collect(),
            _ => self
                .data
                .chunks_exact(c)
                .map(|p| 0.299 * p[0] + 0.587 * p[1] + 0.114 * p[2])
                .collect(),
        };
        ImageData {
            data,
            width: self.width,
            height: self.height,
            channels: 1,
        }
    }

    /// Separable Gaussian blur applied to every channel
    pub fn gaussian_blur(&mut self, sigma: f32) {
        if sigma <= 0.0 || self.data.is_empty() {
            return;
        }

        let kernel_size = ((sigma * 6.0) as usize).max(3) | 1; // Ensure odd
        let kernel = Self::generate_gaussian_kernel(kernel_size, sigma);
        let weight_sum: f32 = kernel.iter().sum();
        let (w, h, c) = (self.width as i32, self.height as i32, self.channels as usize);
        let half = kernel_size as i32 / 2;

        // Horizontal pass
        let original_data = self.data.clone();
        (0..h).flat_map(|y| (0..w).map(move |x| (y, x))).for_each(|(y, x)| {
            for ch in 0..c {
                let mut sum = 0.0;
                for (i, &weight) in kernel.iter().enumerate() {
                    let sample_x = (x + i as i32 - half).clamp(0, w - 1);
                    sum += original_data[(y * w + sample_x) as usize * c + ch] * weight;
                }
                self.data[(y * w + x) as usize * c + ch] = sum / weight_sum;
            }
        });

        // Vertical pass
        let horizontal_result = self.data.clone();
        (0..h).flat_map(|y| (0..w).map(move |x| (y, x))).for_each(|(y, x)| {
            for ch in 0..c {
                let mut sum = 0.0;
                for (i, &weight) in kernel.iter().enumerate() {
                    let sample_y = (y + i as i32 - half).clamp(0, h - 1);
                    sum += horizontal_result[(sample_y * w + x) as usize * c + ch] * weight;
                }
                self.data[(y * w + x) as usize * c + ch] = sum / weight_sum;
            }
        });
    }

    fn generate_gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
        let mut kernel = vec![0.0; size];
        let centre = size / 2;
        let variance = sigma * sigma;

        for (i, value) in kernel.iter_mut().enumerate().take(size) {
            let x = i as i32 - centre as i32;
            *value = (-(x * x) as f32 / (2.0 * variance)).exp();
        }

        kernel
    }

    /// Save to file (grayscale or RGB depending on channel count)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let to_byte = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;

        if self.channels >= 3 {
            let mut img_buffer = ImageBuffer::new(self.width, self.height);
            let c = self.channels as usize;
            for (x, y, pixel) in img_buffer.enumerate_pixels_mut() {
                let base = (y * self.width + x) as usize * c;
                *pixel = image::Rgb([
                    to_byte(self.data[base]),
                    to_byte(self.data[base + 1]),
                    to_byte(self.data[base + 2]),
                ]);
            }
            img_buffer.save(path)?;
        } else {
            let gray = self.to_grayscale();
            let mut img_buffer = ImageBuffer::new(self.width, self.height);
            for (x, y, pixel) in img_buffer.enumerate_pixels_mut() {
                *pixel = image::Luma([to_byte(gray.data[(y * self.width + x) as usize])]);
            }
            img_buffer.save(path)?;
        }
        Ok(())
    }

    /// Compresses the image by reducing its size, averaging pixels in blocks.
    ///
    /// The factor is clamped so that both dimensions stay at least 1.
    pub fn compress(&self, factor: u32) -> ImageData {
        let factor = factor.min(self.width).min(self.height).max(1);
        if factor == 1 {
            return self.clone();
        }

        let c = self.channels as usize;
        let new_width = self.width / factor;
        let new_height = self.height / factor;
        let mut compressed_data = vec![0.0f32; new_width as usize * new_height as usize * c];

        for ny in 0..new_height {
            for nx in 0..new_width {
                let mut count = 0u32;
                let new_idx = (ny * new_width + nx) as usize * c;

                for fy in 0..factor {
                    for fx in 0..factor {
                        let orig_x = nx * factor + fx;
                        let orig_y = ny * factor + fy;

                        if orig_x < self.width && orig_y < self.height {
                            let orig_idx = (orig_y * self.width + orig_x) as usize * c;
                            for ch in 0..c {
                                compressed_data[new_idx + ch] += self.data[orig_idx + ch];
                            }
                            count += 1;
                        }
                    }
                }

                if count > 0 {
                    for value in &mut compressed_data[new_idx..new_idx + c] {
                        *value /= count as f32;
                    }
                }
            }
        }

        ImageData {
            data: compressed_data,
            width: new_width,
            height: new_height,
            channels: self.channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn from_raw_rescales_byte_range() {
        let image = ImageData::from_raw(vec![0.0, 127.5, 255.0, 51.0], 2, 2, 1).unwrap();
        assert_eq!(image.data, vec![0.0, 0.5, 1.0, 0.2]);
    }

    #[test]
    fn from_raw_rejects_dimensions_that_overflow() {
        // larger than any buffer, but the product still fits in usize
        assert!(matches!(
            ImageData::from_raw(Vec::new(), 70_000, 70_000, 3),
            Err(ClassificationError::DimensionMismatch { expected: 14_700_000_000, actual: 0, .. })
        ));
        assert!(matches!(
            ImageData::from_raw(Vec::new(), u32::MAX, u32::MAX, u32::MAX),
            Err(ClassificationError::InvalidInput(_))
        ));
    }

    #[test]
    fn from_raw_checks_length() {
        assert!(ImageData::from_raw(vec![0.0; 11], 2, 2, 3).is_err());
        assert!(ImageData::from_raw(vec![f32::NAN; 4], 2, 2, 1).is_err());
    }

    #[test]
    fn grayscale_weights_rgb() {
        let image = ImageData::from_raw(vec![1.0, 0.0, 0.0], 1, 1, 3).unwrap();
        assert_abs_diff_eq!(image.to_grayscale().data[0], 0.299, epsilon = 1e-6);
    }

    #[test]
    fn compress_averages_blocks_per_channel() {
        let data = vec![
            0.0, 1.0, 0.2, 1.0, //
            0.4, 1.0, 0.6, 1.0,
        ];
        let image = ImageData::from_raw(data, 2, 2, 2).unwrap();
        let small = image.compress(2);
        assert_eq!((small.width, small.height), (1, 1));
        assert_abs_diff_eq!(small.data[0], 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(small.data[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn compress_never_reaches_zero_size() {
        let image = ImageData::create_test_texture(3, TestTexture::Uniform(0.5));
        let small = image.compress(8);
        assert_eq!((small.width, small.height), (1, 1));
    }

    #[test]
    fn blur_keeps_uniform_image() {
        let mut image = ImageData::create_test_texture(8, TestTexture::Uniform(0.4));
        image.gaussian_blur(1.0);
        assert!(image.data.iter().all(|&v| (v - 0.4).abs() < 1e-5));
    }

    #[test]
    fn test_textures_are_rgb_in_range() {
        for texture in [
            TestTexture::Stripes { period: 8.0, angle: 45.0 },
            TestTexture::Checkerboard { cell: 4 },
            TestTexture::Noise { seed: 3 },
        ] {
            let image = ImageData::create_test_texture(16, texture);
            assert_eq!(image.data.len(), 16 * 16 * 3);
            assert!(image.data.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }
}
