use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Serialisation error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Weight not found: {0}")]
    WeightNotFound(String),

    #[error("Failed to load weights for '{key}'")]
    WeightLoad {
        key: String,
        #[source]
        source: Box<ClassificationError>,
    },

    #[error("Feature source '{source_name}' failed: {message}")]
    FeatureSource { source_name: String, message: String },

    #[error("Fused feature vector is empty")]
    EmptyFeatures,

    #[error("Classification failed: {message}")]
    Classification {
        message: String,
        #[source]
        source: Box<ClassificationError>,
    },

    #[error("Worker task failed: {0}")]
    TaskJoin(String),
}

impl ClassificationError {
    /// Wrap a failure that happened while loading a named weight tensor.
    pub fn weight_load(key: impl Into<String>, source: ClassificationError) -> Self {
        Self::WeightLoad {
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an underlying cause as a classification failure.
    pub fn classification(message: impl Into<String>, source: ClassificationError) -> Self {
        Self::Classification {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassificationError>;
