use super::{MultiScaleFeatures, MultiScaleTextureModule};
use crate::error::Result;
use crate::image::ImageData;
use crate::tensor::TextureFeatureMap;
use image::GrayImage;
use imageproc::gradients::sobel_gradients;
use log::debug;
use serde::{Deserialize, Serialize};

/// Largest Sobel magnitude an 8-bit image can produce (4 * 255 * sqrt 2).
const MAX_SOBEL_MAGNITUDE: f32 = 1442.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiScaleConfig {
    /// Pyramid levels, each half the resolution of the previous one
    pub levels: usize,
    /// The fused grid is the input resolution divided by this
    pub grid_reduction: u32,
    /// Blur applied before each 2x reduction
    pub blur_sigma: f32,
}

impl Default for MultiScaleConfig {
    fn default() -> Self {
        Self {
            levels: 3,
            grid_reduction: 4,
            blur_sigma: 0.8,
        }
    }
}

/// Gaussian pyramid texture descriptor.
///
/// Every level contributes two channels to the fused grid: mean intensity and mean
/// Sobel gradient magnitude over the grid cell.
#[derive(Debug, Clone, Default)]
pub struct PyramidTextureModule {
    config: MultiScaleConfig,
}

impl PyramidTextureModule {
    pub fn new(config: MultiScaleConfig) -> Self {
        Self { config }
    }

    fn gradient_magnitude(level: &ImageData) -> Vec<f32> {
        let bytes: Vec<u8> = level
            .data
            .iter()
            .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();
        match GrayImage::from_raw(level.width, level.height, bytes) {
            Some(gray) => sobel_gradients(&gray)
                .pixels()
                .map(|p| p[0] as f32 / MAX_SOBEL_MAGNITUDE)
                .collect(),
            None => vec![0.0; level.pixel_count()],
        }
    }
}

/// Average a `sw x sh` map onto a `tw x th` grid; cells always cover at least one sample.
fn adaptive_pool_2d(values: &[f32], sw: u32, sh: u32, tw: u32, th: u32) -> Vec<f32> {
    let mut out = Vec::with_capacity(tw as usize * th as usize);
    for ty in 0..th {
        let y0 = ty * sh / th;
        let y1 = ((ty + 1) * sh / th).max(y0 + 1).min(sh);
        for tx in 0..tw {
            let x0 = tx * sw / tw;
            let x1 = ((tx + 1) * sw / tw).max(x0 + 1).min(sw);
            let mut sum = 0.0;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += values[(y * sw + x) as usize];
                }
            }
            out.push(sum / ((y1 - y0) * (x1 - x0)) as f32);
        }
    }
    out
}

impl MultiScaleTextureModule for PyramidTextureModule {
    fn name(&self) -> &str {
        "gaussian-pyramid"
    }

    fn feature_channels(&self) -> u32 {
        (self.config.levels * 2) as u32
    }

    fn process_multi_scale(&self, image: &[f32], width: u32, height: u32, channels: u32) -> Result<MultiScaleFeatures> {
        let gray = ImageData::from_raw(image.to_vec(), width, height, channels.max(1))?.to_grayscale();
        let levels = self.config.levels.max(1);
        let feature_channels = self.feature_channels() as usize;

        if gray.pixel_count() == 0 {
            return Ok(MultiScaleFeatures {
                fused_features: TextureFeatureMap::zeros(0, 0, feature_channels as u32),
                texture_complexity: 0.0,
                scale_importance: vec![1.0 / levels as f32; levels],
                scale_factors: (0..levels).map(|l| 0.5f32.powi(l as i32)).collect(),
            });
        }

        let reduction = self.config.grid_reduction.max(1);
        let grid_w = (width / reduction).max(1);
        let grid_h = (height / reduction).max(1);
        let cells = grid_w as usize * grid_h as usize;

        let mut fused = vec![0.0f32; cells * feature_channels];
        let mut detail = Vec::with_capacity(levels);
        let mut scale_factors = Vec::with_capacity(levels);

        let mut level = gray;
        for l in 0..levels {
            if l > 0 {
                level.gaussian_blur(self.config.blur_sigma);
                level = level.compress(2);
            }
            scale_factors.push(level.width as f32 / width as f32);

            let gradient = Self::gradient_magnitude(&level);
            detail.push(crate::tensor::ops::mean(&gradient));

            let intensity_grid = adaptive_pool_2d(&level.data, level.width, level.height, grid_w, grid_h);
            let gradient_grid = adaptive_pool_2d(&gradient, level.width, level.height, grid_w, grid_h);
            for cell in 0..cells {
                fused[cell * feature_channels + 2 * l] = intensity_grid[cell];
                fused[cell * feature_channels + 2 * l + 1] = gradient_grid[cell];
            }
        }

        let total_detail: f32 = detail.iter().sum();
        let scale_importance = if total_detail > 1e-9 {
            detail.iter().map(|d| d / total_detail).collect()
        } else {
            vec![1.0 / levels as f32; levels]
        };
        let texture_complexity = (20.0 * crate::tensor::ops::mean(&detail)).min(10.0);

        debug!(
            "Multi-scale {}x{} -> {}x{}x{} grid, complexity {:.3}",
            width, height, grid_w, grid_h, feature_channels, texture_complexity
        );

        Ok(MultiScaleFeatures {
            fused_features: TextureFeatureMap::new(fused, grid_w, grid_h, feature_channels as u32)?,
            texture_complexity,
            scale_importance,
            scale_factors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::TestTexture;
    use approx::assert_abs_diff_eq;

    fn process(texture: TestTexture, size: u32) -> MultiScaleFeatures {
        let image = ImageData::create_test_texture(size, texture);
        PyramidTextureModule::default()
            .process_multi_scale(&image.data, image.width, image.height, image.channels)
            .unwrap()
    }

    #[test]
    fn grid_is_quarter_resolution_with_two_channels_per_level() {
        let features = process(TestTexture::Checkerboard { cell: 4 }, 32);
        assert_eq!(features.fused_features.width, 8);
        assert_eq!(features.fused_features.height, 8);
        assert_eq!(features.fused_features.channels, 6);
        assert_eq!(features.scale_factors, vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn flat_image_has_zero_complexity_and_even_importance() {
        let features = process(TestTexture::Uniform(0.5), 32);
        assert_eq!(features.texture_complexity, 0.0);
        for importance in &features.scale_importance {
            assert_abs_diff_eq!(*importance, 1.0 / 3.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn busy_texture_is_more_complex_than_flat() {
        let busy = process(TestTexture::Noise { seed: 9 }, 32);
        assert!(busy.texture_complexity > 1.0);
        assert_abs_diff_eq!(busy.scale_importance.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn tiny_images_still_produce_a_grid() {
        let features = process(TestTexture::Noise { seed: 1 }, 2);
        assert_eq!((features.fused_features.width, features.fused_features.height), (1, 1));
    }

    #[test]
    fn pooling_handles_upsampling() {
        let pooled = adaptive_pool_2d(&[1.0, 2.0], 2, 1, 4, 2);
        assert_eq!(pooled, vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]);
    }
}
