pub mod feature_map;
pub mod ops;

pub use feature_map::TextureFeatureMap;
