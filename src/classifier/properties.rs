//! Physical surface properties derived from the feature streams.

use super::MaterialProperties;
use crate::image::ImageData;
use crate::tensor::ops::variance;
use crate::texture::{MultiScaleFeatures, TextureResponse};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Number of leading fused features that feed metallicness.
const METALLIC_WINDOW: usize = 100;
/// Quantisation levels per colour channel for the dominant-colour histogram.
const COLOR_LEVELS: u32 = 4;
const DOMINANT_COLORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Uniform,
    Fine,
    Horizontal,
    Vertical,
    Diagonal,
}

impl PatternType {
    /// From the Gabor dominant frequency (relative to Nyquist) and line orientation in degrees.
    pub fn from_gabor(frequency: f32, orientation: f32) -> Self {
        if frequency < 0.1 {
            return PatternType::Uniform;
        }
        if frequency > 0.5 {
            return PatternType::Fine;
        }
        let orientation = orientation.rem_euclid(180.0);
        if !(22.5..157.5).contains(&orientation) {
            PatternType::Horizontal
        } else if (67.5..112.5).contains(&orientation) {
            PatternType::Vertical
        } else {
            PatternType::Diagonal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Uniform => "uniform",
            PatternType::Fine => "fine",
            PatternType::Horizontal => "horizontal",
            PatternType::Vertical => "vertical",
            PatternType::Diagonal => "diagonal",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceType {
    BrushedMetal,
    PolishedMetal,
    Rough,
    Smooth,
    Textured,
}

impl SurfaceType {
    pub fn from_scalars(metallicness: f32, roughness: f32) -> Self {
        match (metallicness, roughness) {
            (m, r) if m > 0.5 && r > 0.5 => SurfaceType::BrushedMetal,
            (m, _) if m > 0.5 => SurfaceType::PolishedMetal,
            (_, r) if r > 0.7 => SurfaceType::Rough,
            (_, r) if r < 0.3 => SurfaceType::Smooth,
            _ => SurfaceType::Textured,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SurfaceType::BrushedMetal => "brushed_metal",
            SurfaceType::PolishedMetal => "polished_metal",
            SurfaceType::Rough => "rough",
            SurfaceType::Smooth => "smooth",
            SurfaceType::Textured => "textured",
        }
    }
}

impl fmt::Display for SurfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn roughness(gabor_energy: f32, complexity: f32) -> f32 {
    0.6 * (gabor_energy / 100.0).clamp(0.0, 1.0) + 0.4 * (complexity / 10.0).clamp(0.0, 1.0)
}

pub fn metallicness(fused: &[f32]) -> f32 {
    let window = &fused[..fused.len().min(METALLIC_WINDOW)];
    if window.is_empty() {
        return 0.0;
    }
    (window.iter().map(|v| v.abs()).sum::<f32>() / window.len() as f32).clamp(0.0, 1.0)
}

pub fn transparency(fused: &[f32]) -> f32 {
    (1.0 - 10.0 * variance(fused)).clamp(0.0, 1.0)
}

/// The `DOMINANT_COLORS` most populated cells of a quantised RGB histogram, as
/// `#rrggbb` averages of the pixels in each cell.
pub fn dominant_colors(image: &ImageData) -> Vec<String> {
    let c = image.channels as usize;
    if c == 0 || image.data.is_empty() {
        return Vec::new();
    }

    // cell -> (pixel count, channel sums)
    let mut cells: HashMap<u32, (u32, [f32; 3])> = HashMap::new();
    for pixel in image.data.chunks_exact(c) {
        let rgb = if c >= 3 {
            [pixel[0], pixel[1], pixel[2]]
        } else {
            [pixel[0]; 3]
        };
        let cell = rgb.iter().fold(0u32, |acc, v| {
            acc * COLOR_LEVELS + ((v.clamp(0.0, 1.0) * COLOR_LEVELS as f32) as u32).min(COLOR_LEVELS - 1)
        });
        let entry = cells.entry(cell).or_insert((0, [0.0; 3]));
        entry.0 += 1;
        for (sum, v) in entry.1.iter_mut().zip(rgb) {
            *sum += v;
        }
    }

    let mut ranked: Vec<(u32, (u32, [f32; 3]))> = cells.into_iter().collect();
    ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(DOMINANT_COLORS)
        .map(|(_, (count, sums))| {
            let [r, g, b] = sums.map(|s| ((s / count as f32).clamp(0.0, 1.0) * 255.0).round() as u8);
            format!("#{:02x}{:02x}{:02x}", r, g, b)
        })
        .collect()
}

/// Derive all surface properties.
///
/// Absent streams contribute neutral values: no Gabor response means zero energy and
/// a uniform pattern, no multi-scale features means zero complexity and scale 1.
pub fn derive_properties(
    gabor: Option<&TextureResponse>,
    multi_scale: Option<&MultiScaleFeatures>,
    fused: &[f32],
    image: &ImageData,
) -> MaterialProperties {
    let energy = gabor.map_or(0.0, |g| g.texture_energy);
    let complexity = multi_scale.map_or(0.0, |m| m.texture_complexity);

    let roughness = roughness(energy, complexity);
    let metallicness = metallicness(fused);
    let pattern_type = gabor.map_or(PatternType::Uniform, |g| {
        PatternType::from_gabor(g.dominant_frequency, g.dominant_orientation)
    });

    MaterialProperties {
        roughness,
        metallicness,
        glossiness: 1.0 - roughness,
        transparency: transparency(fused),
        texture_scale: multi_scale.map_or(1.0, |m| m.dominant_scale_factor().clamp(0.0, 1.0)),
        dominant_colors: dominant_colors(image),
        pattern_type,
        surface_type: SurfaceType::from_scalars(metallicness, roughness),
    }
}

/// Subcategory for a winning category; categories without a rule get `standard`.
pub fn subcategory_for(category: &str, properties: &MaterialProperties) -> String {
    let sub = match category {
        "metal" => properties.surface_type.as_str(),
        "fabric" => match properties.pattern_type {
            PatternType::Fine => "fine_weave",
            PatternType::Uniform => "plain_weave",
            _ => "coarse_weave",
        },
        "wood" => match properties.texture_scale {
            s if s >= 0.75 => "fine_grain",
            s if s <= 0.3 => "wide_grain",
            _ => "medium_grain",
        },
        "plastic" if properties.glossiness > 0.6 => "glossy",
        "plastic" => "matte",
        _ => "standard",
    };
    sub.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::TestTexture;

    fn properties(texture_scale: f32, pattern_type: PatternType, roughness: f32) -> MaterialProperties {
        MaterialProperties {
            roughness,
            metallicness: 0.1,
            glossiness: 1.0 - roughness,
            transparency: 0.5,
            texture_scale,
            dominant_colors: Vec::new(),
            pattern_type,
            surface_type: SurfaceType::from_scalars(0.1, roughness),
        }
    }

    #[test]
    fn roughness_saturates_each_term() {
        assert_eq!(roughness(0.0, 0.0), 0.0);
        assert_eq!(roughness(500.0, 50.0), 1.0);
        assert!((roughness(50.0, 5.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn pattern_buckets() {
        assert_eq!(PatternType::from_gabor(0.05, 90.0), PatternType::Uniform);
        assert_eq!(PatternType::from_gabor(0.8, 90.0), PatternType::Fine);
        assert_eq!(PatternType::from_gabor(0.3, 170.0), PatternType::Horizontal);
        assert_eq!(PatternType::from_gabor(0.3, 10.0), PatternType::Horizontal);
        assert_eq!(PatternType::from_gabor(0.3, 90.0), PatternType::Vertical);
        assert_eq!(PatternType::from_gabor(0.3, 45.0), PatternType::Diagonal);
    }

    #[test]
    fn surface_rule_table() {
        assert_eq!(SurfaceType::from_scalars(0.6, 0.6), SurfaceType::BrushedMetal);
        assert_eq!(SurfaceType::from_scalars(0.6, 0.2), SurfaceType::PolishedMetal);
        assert_eq!(SurfaceType::from_scalars(0.1, 0.8), SurfaceType::Rough);
        assert_eq!(SurfaceType::from_scalars(0.1, 0.2), SurfaceType::Smooth);
        assert_eq!(SurfaceType::from_scalars(0.1, 0.5), SurfaceType::Textured);
    }

    #[test]
    fn subcategory_rules() {
        assert_eq!(subcategory_for("wood", &properties(1.0, PatternType::Vertical, 0.4)), "fine_grain");
        assert_eq!(subcategory_for("wood", &properties(0.25, PatternType::Vertical, 0.4)), "wide_grain");
        assert_eq!(subcategory_for("fabric", &properties(1.0, PatternType::Fine, 0.4)), "fine_weave");
        assert_eq!(subcategory_for("plastic", &properties(1.0, PatternType::Uniform, 0.1)), "glossy");
        assert_eq!(subcategory_for("plastic", &properties(1.0, PatternType::Uniform, 0.9)), "matte");
        assert_eq!(subcategory_for("metal", &properties(1.0, PatternType::Uniform, 0.1)), "smooth");
        assert_eq!(subcategory_for("glass", &properties(1.0, PatternType::Uniform, 0.1)), "standard");
    }

    #[test]
    fn dominant_colors_of_flat_image() {
        let image = ImageData::create_test_texture(8, TestTexture::Uniform(0.5));
        assert_eq!(dominant_colors(&image), vec!["#808080".to_string()]);
    }

    #[test]
    fn dominant_colors_rank_by_population() {
        let mut data = vec![1.0, 0.0, 0.0].repeat(3);
        data.extend([0.0, 0.0, 1.0]);
        let image = ImageData::from_raw(data, 2, 2, 3).unwrap();
        assert_eq!(dominant_colors(&image), vec!["#ff0000".to_string(), "#0000ff".to_string()]);
    }

    #[test]
    fn missing_streams_give_neutral_properties() {
        let image = ImageData::create_test_texture(4, TestTexture::Uniform(0.2));
        let props = derive_properties(None, None, &[0.5, 0.5], &image);
        assert_eq!(props.roughness, 0.0);
        assert_eq!(props.glossiness, 1.0);
        assert_eq!(props.texture_scale, 1.0);
        assert_eq!(props.pattern_type, PatternType::Uniform);
        assert_eq!(props.transparency, 1.0);
    }
}
