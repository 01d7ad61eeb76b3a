use super::{GaborFilterBank, TextureResponse};
use crate::error::Result;
use crate::image::ImageData;
use crate::image::fft::{bin_frequency, fft_2d_real, ifft_2d_complex};
use log::debug;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaborBankConfig {
    /// Wave-vector orientations in degrees
    pub orientations: Vec<f32>,
    /// Centre frequencies in cycles per pixel, at most 0.5
    pub frequencies: Vec<f32>,
    /// Gaussian bandwidth as a fraction of the centre frequency
    pub relative_bandwidth: f32,
}

impl Default for GaborBankConfig {
    fn default() -> Self {
        Self {
            orientations: vec![0.0, 45.0, 90.0, 135.0],
            frequencies: vec![0.05, 0.1, 0.2, 0.35],
            relative_bandwidth: 0.4,
        }
    }
}

/// Gabor filter bank evaluated in the frequency domain.
///
/// Each filter is a one-sided Gaussian pass band centred on its wave vector, so the
/// inverse transform is the analytic response and its magnitude is the local
/// envelope. Intensities are scaled to 0-255 before filtering.
#[derive(Debug, Clone, Default)]
pub struct FourierGaborBank {
    config: GaborBankConfig,
}

impl FourierGaborBank {
    pub fn new(config: GaborBankConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GaborBankConfig {
        &self.config
    }

    fn transfer_function(&self, orientation: f32, frequency: f32, width: usize, height: usize) -> Vec<f32> {
        let (sin_t, cos_t) = orientation.to_radians().sin_cos();
        let (fu, fv) = (frequency * cos_t, frequency * sin_t);
        let sigma = (self.config.relative_bandwidth * frequency).max(0.02);
        let denom = 2.0 * sigma * sigma;

        let mut transfer = vec![0.0f32; width * height];
        for y in 0..height {
            let v = bin_frequency(y, height);
            for x in 0..width {
                let u = bin_frequency(x, width);
                let d2 = (u - fu) * (u - fu) + (v - fv) * (v - fv);
                transfer[y * width + x] = (-d2 / denom).exp();
            }
        }
        // No DC response
        transfer[0] = 0.0;
        transfer
    }
}

impl GaborFilterBank for FourierGaborBank {
    fn name(&self) -> &str {
        "fourier-gabor"
    }

    fn apply_filter_bank(&self, grayscale: &[f32], width: u32, height: u32, channels: u32) -> Result<TextureResponse> {
        let gray = ImageData::from_raw(grayscale.to_vec(), width, height, channels.max(1))?.to_grayscale();
        let (w, h) = (width as usize, height as usize);
        let filter_count = self.config.orientations.len() * self.config.frequencies.len();
        if w * h == 0 || filter_count == 0 {
            return Ok(TextureResponse {
                energy_map: vec![0.0; w * h],
                ..TextureResponse::default()
            });
        }

        let mean = gray.data.iter().sum::<f32>() / gray.data.len() as f32;
        let centred: Vec<f32> = gray.data.iter().map(|v| (v - mean) * 255.0).collect();

        let mut planner = FftPlanner::new();
        let spectrum = fft_2d_real(&mut planner, &centred, w, h)?;

        let mut energy_map = vec![0.0f32; w * h];
        let mut best: Option<(f32, f32, f32)> = None; // (energy, orientation, frequency)
        let mut texture_energy = 0.0f32;
        let mut filtered = vec![Complex::new(0.0f32, 0.0); w * h];

        for &orientation in &self.config.orientations {
            for &frequency in &self.config.frequencies {
                let transfer = self.transfer_function(orientation, frequency, w, h);
                for ((out, s), t) in filtered.iter_mut().zip(&spectrum).zip(&transfer) {
                    *out = *s * *t;
                }
                let response = ifft_2d_complex(&mut planner, &filtered, w, h)?;

                let mut filter_energy = 0.0f32;
                for (e, r) in energy_map.iter_mut().zip(&response) {
                    let magnitude = r.norm();
                    *e += magnitude / filter_count as f32;
                    filter_energy += magnitude;
                }
                filter_energy /= (w * h) as f32;
                texture_energy += filter_energy;

                if best.is_none_or(|(e, _, _)| filter_energy > e) {
                    best = Some((filter_energy, orientation, frequency));
                }
            }
        }

        let (dominant_orientation, dominant_frequency) = match best {
            Some((energy, orientation, frequency)) if energy > 1e-6 => {
                // Lines run perpendicular to the wave vector
                ((orientation + 90.0).rem_euclid(180.0), (frequency / 0.5).clamp(0.0, 1.0))
            }
            _ => (0.0, 0.0),
        };

        debug!(
            "Gabor bank {}x{}: energy {:.3}, orientation {:.1}, frequency {:.3}",
            w, h, texture_energy, dominant_orientation, dominant_frequency
        );

        Ok(TextureResponse {
            energy_map,
            dominant_orientation,
            dominant_frequency,
            texture_energy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::TestTexture;

    fn respond(texture: TestTexture) -> TextureResponse {
        let image = ImageData::create_test_texture(32, texture);
        FourierGaborBank::default()
            .apply_filter_bank(&image.data, image.width, image.height, image.channels)
            .unwrap()
    }

    #[test]
    fn flat_image_has_no_energy() {
        let response = respond(TestTexture::Uniform(0.5));
        assert!(response.texture_energy < 1e-3);
        assert_eq!(response.dominant_frequency, 0.0);
        assert_eq!(response.energy_map.len(), 32 * 32);
    }

    #[test]
    fn stripes_varying_along_x_read_as_vertical_lines() {
        let response = respond(TestTexture::Stripes { period: 8.0, angle: 0.0 });
        assert!(response.texture_energy > 1.0);
        assert_eq!(response.dominant_orientation, 90.0);
        // 1/8 cycles per pixel is nearest the 0.1 cycles/pixel filter, reported as 0.2 of Nyquist
        assert!((response.dominant_frequency - 0.2).abs() < 1e-6);
    }

    #[test]
    fn empty_image_is_not_an_error() {
        let response = FourierGaborBank::default().apply_filter_bank(&[], 0, 0, 1).unwrap();
        assert!(response.energy_map.is_empty());
    }
}
