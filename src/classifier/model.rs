//! Serialisable snapshot of a configured service.

use super::ensemble::ModelEnsemble;
use crate::config::ClassifierConfig;
use crate::error::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Everything needed to rebuild a service: configuration, every weight tensor by
/// name, the ensemble description and the model version.
///
/// Tensors live in a `BTreeMap` so that serialisation is key ordered and exporting
/// an imported model reproduces the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExport {
    pub version: String,
    pub config: ClassifierConfig,
    pub ensemble: ModelEnsemble,
    pub weights: BTreeMap<String, Vec<f32>>,
}

impl ModelExport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        info!(
            "Saved model {} ({} tensors) to {}",
            self.version,
            self.weights.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let export = Self::from_json(&json)?;
        info!("Loaded model {} from {}", export.version, path.as_ref().display());
        Ok(export)
    }

    /// Total number of weight values across all tensors.
    pub fn parameter_count(&self) -> usize {
        self.weights.values().map(Vec::len).sum()
    }
}
