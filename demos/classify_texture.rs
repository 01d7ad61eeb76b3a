//! Classify an image file, or a set of synthetic textures when no path is given.
//!
//! ```text
//! cargo run --example classify_texture -- path/to/sample.png [config.json]
//! ```
//!
//! Debug maps (Gabor energy, attention confidence) are written to the working
//! directory.

use std::time::Instant;
use texture_material_classifier::{ClassifierConfig, ImageData, MaterialClassificationService, TestTexture};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = match args.get(1) {
        Some(path) => ClassifierConfig::from_json_file(path)?,
        None => ClassifierConfig::default(),
    };
    config.debug.enabled = true;

    let service = MaterialClassificationService::new(config)?;

    let images: Vec<(String, ImageData)> = match args.first() {
        Some(path) => vec![(path.clone(), ImageData::from_file(path)?)],
        None => vec![
            ("flat".to_string(), ImageData::create_test_texture(64, TestTexture::Uniform(0.6))),
            (
                "stripes".to_string(),
                ImageData::create_test_texture(64, TestTexture::Stripes { period: 6.0, angle: 0.0 }),
            ),
            (
                "checkerboard".to_string(),
                ImageData::create_test_texture(64, TestTexture::Checkerboard { cell: 8 }),
            ),
            ("noise".to_string(), ImageData::create_test_texture(64, TestTexture::Noise { seed: 1 })),
        ],
    };

    for (name, image) in &images {
        let start_time = Instant::now();
        let result = service.classify_image(image)?;
        let elapsed_time = start_time.elapsed();

        println!(
            "{name}: {} / {} (confidence {:.3}) in {:.2?}",
            result.category,
            result.subcategory.as_deref().unwrap_or("-"),
            result.confidence,
            elapsed_time
        );
        println!(
            "  roughness {:.3}, pattern {}, surface {}, colours {:?}",
            result.properties.roughness,
            result.properties.pattern_type,
            result.properties.surface_type,
            result.properties.dominant_colors
        );
        for prediction in result.predictions.iter().take(3) {
            println!("  {:<10} {:.4}  {}", prediction.category, prediction.probability, prediction.reasoning);
        }
    }

    if let Some(stats) = service.cache_stats() {
        println!("SVD cache: {}", serde_json::to_string(&stats)?);
    }
    println!("{}", serde_json::to_string_pretty(&service.model_info())?);

    Ok(())
}
