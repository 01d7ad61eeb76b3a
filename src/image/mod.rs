pub mod fft;
pub mod loader;

use crate::config::DebugOutputConfig;
use image::GrayImage;
use std::path::Path;

/// Render a scalar map as an 8-bit grayscale image, stretched to its own min/max.
pub fn scalar_map_to_gray_image(values: &[f32], width: u32, height: u32) -> GrayImage {
    let min_val = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max_val = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = if max_val > min_val { max_val - min_val } else { 1.0 };

    let mut image = GrayImage::new(width, height);
    for (i, pixel) in image.pixels_mut().enumerate() {
        let value = values.get(i).map_or(0.0, |v| (v - min_val) / range);
        *pixel = image::Luma([(value.clamp(0.0, 1.0) * 255.0) as u8]);
    }
    image
}

/// Save a scalar map (energy map, confidence grid) when debug output is enabled.
///
/// Returns `true` when a file was written.
pub fn save_debug_output<P: AsRef<Path>>(
    values: &[f32],
    width: u32,
    height: u32,
    filename: P,
    label: &str,
    config: &DebugOutputConfig,
) -> crate::error::Result<bool> {
    if !config.enabled || width == 0 || height == 0 {
        return Ok(false);
    }

    let path = match config.output_dir {
        Some(ref dir) => Path::new(dir).join(filename.as_ref()),
        None => filename.as_ref().to_path_buf(),
    };

    scalar_map_to_gray_image(values, width, height).save(&path)?;
    log::info!("Debug output saved: {} ({}, {}x{})", path.display(), label, width, height);
    Ok(true)
}

pub use loader::{ImageData, TestTexture};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_image_stretches_range() {
        let image = scalar_map_to_gray_image(&[2.0, 4.0, 3.0, 2.0], 2, 2);
        assert_eq!(image.as_raw(), &vec![0, 255, 127, 0]);
    }

    #[test]
    fn disabled_debug_output_writes_nothing() {
        let config = DebugOutputConfig::default();
        let written = save_debug_output(&[0.0; 4], 2, 2, "unused.png", "energy", &config).unwrap();
        assert!(!written);
    }

    #[test]
    fn enabled_debug_output_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let config = DebugOutputConfig {
            enabled: true,
            output_dir: Some(dir.path().to_string_lossy().into_owned()),
        };
        let written = save_debug_output(&[0.0, 1.0, 0.5, 0.25], 2, 2, "energy.png", "energy", &config).unwrap();
        assert!(written);
        assert!(dir.path().join("energy.png").exists());
    }
}
