// Shared helpers for integration tests
#![allow(dead_code)]

use texture_material_classifier::{ClassifierConfig, ImageData, TestTexture};

/// Set to true to write Gabor energy and attention confidence PNGs from the
/// pipeline tests into the system temp directory
pub const DEBUG_OUTPUT: bool = false;

pub fn test_config() -> ClassifierConfig {
    let mut config = ClassifierConfig::default();
    if DEBUG_OUTPUT {
        config.debug.enabled = true;
        config.debug.output_dir = Some(std::env::temp_dir().to_string_lossy().into_owned());
    }
    config
}

pub fn flat_gray(size: u32) -> ImageData {
    ImageData::create_test_texture(size, TestTexture::Uniform(0.5))
}

pub fn noise(size: u32, seed: u64) -> ImageData {
    ImageData::create_test_texture(size, TestTexture::Noise { seed })
}
