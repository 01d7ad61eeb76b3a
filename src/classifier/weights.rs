//! Named weight tensors and where they come from.

use super::model::ModelExport;
use crate::error::{ClassificationError, Result};
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CLASSIFIER_WEIGHT: &str = "classifier.weight";
pub const CLASSIFIER_BIAS: &str = "classifier.bias";

/// Supplies weight tensors by name.
///
/// `shape` is `[rows, cols]` for matrices and `[len]` for vectors; the returned
/// tensor must hold exactly `shape.iter().product()` values.
pub trait WeightSource: Send + Sync {
    /// Short description used in logs and [`ModelInfo`](super::ModelInfo).
    fn describe(&self) -> String;

    fn load(&self, key: &str, shape: &[usize]) -> Result<Vec<f32>>;
}

/// Load a tensor and check its length, wrapping any failure with the key.
pub fn load_checked(source: &dyn WeightSource, key: &str, shape: &[usize]) -> Result<Vec<f32>> {
    let expected: usize = shape.iter().product();
    let tensor = source
        .load(key, shape)
        .map_err(|e| ClassificationError::weight_load(key, e))?;
    if tensor.len() != expected {
        return Err(ClassificationError::weight_load(
            key,
            ClassificationError::DimensionMismatch {
                context: key.to_string(),
                expected,
                actual: tensor.len(),
            },
        ));
    }
    if tensor.iter().any(|v| !v.is_finite()) {
        return Err(ClassificationError::weight_load(
            key,
            ClassificationError::InvalidInput("tensor contains non-finite values".to_string()),
        ));
    }
    debug!("Loaded weight '{}' {:?} from {}", key, shape, source.describe());
    Ok(tensor)
}

/// Seeded Xavier-uniform weights.
///
/// These are untrained: predictions made with them are deterministic but carry no
/// knowledge about materials. Matrices are drawn from `U(-l, l)` with
/// `l = sqrt(6 / (rows + cols))`; vectors are zero.
#[derive(Debug, Clone)]
pub struct XavierWeights {
    seed: u64,
}

impl XavierWeights {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Each key gets its own stream so tensors do not depend on load order.
    fn key_seed(&self, key: &str) -> u64 {
        let hash = blake3::hash(key.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        self.seed ^ u64::from_le_bytes(bytes)
    }
}

impl WeightSource for XavierWeights {
    fn describe(&self) -> String {
        format!("xavier(seed={})", self.seed)
    }

    fn load(&self, key: &str, shape: &[usize]) -> Result<Vec<f32>> {
        match shape {
            [len] => Ok(vec![0.0; *len]),
            [rows, cols] => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.key_seed(key));
                let limit = (6.0 / (rows + cols).max(1) as f32).sqrt();
                Ok((0..rows * cols).map(|_| rng.gen_range(-limit..=limit)).collect())
            }
            _ => Err(ClassificationError::InvalidInput(format!(
                "unsupported weight shape {:?} for '{}'",
                shape, key
            ))),
        }
    }
}

/// Weight tensors held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWeights {
    tensors: BTreeMap<String, Vec<f32>>,
    origin: String,
}

impl InMemoryWeights {
    pub fn new(tensors: BTreeMap<String, Vec<f32>>) -> Self {
        Self {
            tensors,
            origin: "memory".to_string(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, tensor: Vec<f32>) {
        self.tensors.insert(key.into(), tensor);
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn into_tensors(self) -> BTreeMap<String, Vec<f32>> {
        self.tensors
    }
}

impl WeightSource for InMemoryWeights {
    fn describe(&self) -> String {
        format!("{} ({} tensors)", self.origin, self.tensors.len())
    }

    fn load(&self, key: &str, _shape: &[usize]) -> Result<Vec<f32>> {
        self.tensors
            .get(key)
            .cloned()
            .ok_or_else(|| ClassificationError::WeightNotFound(key.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WeightFileContents {
    Model(Box<ModelExport>),
    Tensors(BTreeMap<String, Vec<f32>>),
}

/// Weights read from a JSON file.
///
/// Accepts either a full model export or a bare `{ "key": [values] }` object. The
/// file is parsed once, on [`open`](Self::open).
#[derive(Debug, Clone)]
pub struct JsonWeightFile {
    path: PathBuf,
    tensors: InMemoryWeights,
}

impl JsonWeightFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let json = std::fs::read_to_string(&path)?;
        let tensors = match serde_json::from_str::<WeightFileContents>(&json)? {
            WeightFileContents::Model(export) => export.weights,
            WeightFileContents::Tensors(tensors) => tensors,
        };
        info!("Read {} weight tensors from {}", tensors.len(), path.display());
        let origin = path.display().to_string();
        Ok(Self {
            path,
            tensors: InMemoryWeights::new(tensors).with_origin(origin),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WeightSource for JsonWeightFile {
    fn describe(&self) -> String {
        self.tensors.describe()
    }

    fn load(&self, key: &str, shape: &[usize]) -> Result<Vec<f32>> {
        self.tensors.load(key, shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xavier_is_deterministic_per_key_and_bounded() {
        let source = XavierWeights::new(7);
        let a = source.load("classifier.weight", &[10, 6]).unwrap();
        let b = source.load("classifier.weight", &[10, 6]).unwrap();
        let other = source.load("attention.query", &[10, 6]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, other);

        let limit = (6.0f32 / 16.0).sqrt();
        assert!(a.iter().all(|w| w.abs() <= limit));
        assert_eq!(source.load("classifier.bias", &[10]).unwrap(), vec![0.0; 10]);
    }

    #[test]
    fn missing_key_is_wrapped_with_its_name() {
        let source = InMemoryWeights::default();
        let err = load_checked(&source, "classifier.bias", &[3]).unwrap_err();
        match err {
            ClassificationError::WeightLoad { key, source } => {
                assert_eq!(key, "classifier.bias");
                assert!(matches!(*source, ClassificationError::WeightNotFound(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn wrong_length_is_a_dimension_mismatch() {
        let mut source = InMemoryWeights::default();
        source.insert("classifier.bias", vec![0.0; 2]);
        let err = load_checked(&source, "classifier.bias", &[3]).unwrap_err();
        assert!(matches!(
            err,
            ClassificationError::WeightLoad { ref source, .. }
                if matches!(**source, ClassificationError::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn json_file_accepts_bare_tensor_maps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        std::fs::write(&path, r#"{"classifier.bias": [0.5, -0.5]}"#).unwrap();

        let source = JsonWeightFile::open(&path).unwrap();
        assert_eq!(source.load("classifier.bias", &[2]).unwrap(), vec![0.5, -0.5]);
        assert!(source.describe().contains("1 tensors"));
    }

    #[test]
    fn unreadable_json_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonWeightFile::open(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ClassificationError::IoError(_)));
    }
}
