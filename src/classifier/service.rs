use super::ensemble::{LinearHead, ModelEnsemble, overall_confidence, rank_predictions, score_ensemble, score_single};
use super::model::ModelExport;
use super::properties::{derive_properties, subcategory_for};
use super::weights::{CLASSIFIER_BIAS, CLASSIFIER_WEIGHT, InMemoryWeights, WeightSource, XavierWeights, load_checked};
use super::{ClassificationResult, MaterialPrediction, MaterialProperties, ModelInfo, TextureAnalysis};
use crate::attention::module::AttentionWeights;
use crate::attention::{DIRECTION_BUCKETS, TextureAttentionModule, TextureAttentionOutput};
use crate::config::ClassifierConfig;
use crate::error::{ClassificationError, Result};
use crate::image::{ImageData, save_debug_output};
use crate::svd::{CacheStats, SvdFeatureExtractor, SvdTextureFeatures};
use crate::tensor::TextureFeatureMap;
use crate::tensor::ops::{adaptive_average_pool, l2_normalize};
use crate::texture::{
    FourierGaborBank, GaborFilterBank, MultiScaleFeatures, MultiScaleTextureModule, PyramidTextureModule,
    TextureResponse,
};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Configures collaborators and weights for a [`MaterialClassificationService`].
///
/// By default the service uses [`FourierGaborBank`], [`PyramidTextureModule`] and
/// seeded [`XavierWeights`].
pub struct ServiceBuilder {
    config: ClassifierConfig,
    gabor: Option<Box<dyn GaborFilterBank>>,
    multi_scale: Option<Box<dyn MultiScaleTextureModule>>,
    weights: Option<Box<dyn WeightSource>>,
    ensemble: Option<ModelEnsemble>,
}

impl ServiceBuilder {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            gabor: Some(Box::new(FourierGaborBank::new(config.gabor.clone()))),
            multi_scale: Some(Box::new(PyramidTextureModule::new(config.multi_scale.clone()))),
            weights: None,
            ensemble: None,
            config,
        }
    }

    /// Start from an exported model: its configuration, ensemble and weight tensors.
    pub fn from_export(export: ModelExport) -> Self {
        let origin = format!("import:{}", export.version);
        let mut builder = Self::new(export.config);
        builder.ensemble = Some(export.ensemble);
        builder.weights = Some(Box::new(InMemoryWeights::new(export.weights).with_origin(origin)));
        builder
    }

    pub fn gabor_bank(mut self, bank: impl GaborFilterBank + 'static) -> Self {
        self.gabor = Some(Box::new(bank));
        self
    }

    pub fn without_gabor_bank(mut self) -> Self {
        self.gabor = None;
        self
    }

    pub fn multi_scale_module(mut self, module: impl MultiScaleTextureModule + 'static) -> Self {
        self.multi_scale = Some(Box::new(module));
        self
    }

    /// Without a multi-scale module the attention stream is disabled as well.
    pub fn without_multi_scale_module(mut self) -> Self {
        self.multi_scale = None;
        self
    }

    pub fn weight_source(mut self, source: impl WeightSource + 'static) -> Self {
        self.weights = Some(Box::new(source));
        self
    }

    pub fn ensemble(mut self, ensemble: ModelEnsemble) -> Self {
        self.ensemble = Some(ensemble);
        self
    }

    pub fn build(self) -> Result<MaterialClassificationService> {
        let config = self.config;
        config.validate()?;

        let ensemble = self
            .ensemble
            .unwrap_or_else(|| ModelEnsemble::standard(&config.classification.ensemble_weights));
        ensemble.validate()?;

        let weights: Box<dyn WeightSource> = match self.weights {
            Some(weights) => weights,
            None => Box::new(XavierWeights::new(config.classification.weight_seed)),
        };

        let head = LinearHead::load(
            weights.as_ref(),
            config.classification.categories.len(),
            config.classification.feature_dim,
        )?;

        let attention = match &self.multi_scale {
            Some(module) => Some(load_attention(&config, module.feature_channels() as usize, weights.as_ref())?),
            None => None,
        };

        let service = MaterialClassificationService {
            svd: SvdFeatureExtractor::new(config.svd.clone()),
            attention,
            gabor: self.gabor,
            multi_scale: self.multi_scale,
            head,
            ensemble,
            weight_source: weights.describe(),
            requests: AtomicU64::new(0),
            config,
        };

        info!(
            "Material classifier {} ready: {} categories, ensemble {}, weights {}, gabor {}, multi-scale {}",
            service.config.classification.model_version,
            service.config.classification.categories.len(),
            service.config.classification.use_ensemble,
            service.weight_source,
            service.gabor.as_ref().map_or("none", |g| g.name()),
            service.multi_scale.as_ref().map_or("none", |m| m.name()),
        );
        Ok(service)
    }
}

fn load_attention(config: &ClassifierConfig, channels: usize, source: &dyn WeightSource) -> Result<TextureAttentionModule> {
    let inner = config.attention.head_count * config.attention.key_dim;
    let [(query, _), (key, _), (value, _), (output, _)] = AttentionWeights::layout(channels, inner);
    let weights = AttentionWeights {
        query: load_checked(source, query, &[channels, inner])?,
        key: load_checked(source, key, &[channels, inner])?,
        value: load_checked(source, value, &[channels, inner])?,
        output: load_checked(source, output, &[inner, channels])?,
    };
    TextureAttentionModule::with_weights(config.attention.clone(), channels, weights)
}

/// Feature sources that did not contribute to a request.
#[derive(Default)]
struct Degradation {
    sources: Vec<String>,
    last_error: Option<ClassificationError>,
}

impl Degradation {
    fn failed(&mut self, stage: &str, source_name: &str, error: ClassificationError) {
        warn!("{} source '{}' failed, continuing without it: {}", stage, source_name, error);
        self.sources.push(stage.to_string());
        self.last_error = Some(ClassificationError::FeatureSource {
            source_name: source_name.to_string(),
            message: error.to_string(),
        });
    }

    fn absent(&mut self, stage: &str) {
        warn!("No {} source configured, stream omitted", stage);
        self.sources.push(stage.to_string());
    }
}

/// Attention result with the grid it was computed over.
struct AttentionStage {
    output: TextureAttentionOutput,
    grid_width: u32,
    grid_height: u32,
}

/// Orchestrates feature extraction, fusion, scoring and property derivation.
///
/// The service is `Send + Sync`; share it behind an `Arc` for concurrent use. The
/// SVD cache, scratch buffers and weight tables live as long as the service.
pub struct MaterialClassificationService {
    config: ClassifierConfig,
    svd: SvdFeatureExtractor,
    attention: Option<TextureAttentionModule>,
    gabor: Option<Box<dyn GaborFilterBank>>,
    multi_scale: Option<Box<dyn MultiScaleTextureModule>>,
    head: LinearHead,
    ensemble: ModelEnsemble,
    weight_source: String,
    requests: AtomicU64,
}

impl fmt::Debug for MaterialClassificationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialClassificationService")
            .field("version", &self.config.classification.model_version)
            .field("weight_source", &self.weight_source)
            .field("gabor", &self.gabor.as_ref().map(|g| g.name().to_string()))
            .field("multi_scale", &self.multi_scale.as_ref().map(|m| m.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl MaterialClassificationService {
    /// Service with the built-in collaborators and seeded weights.
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClassifierConfig) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub async fn classify_material(
        &self,
        image_data: &[f32],
        width: u32,
        height: u32,
        channels: u32,
    ) -> Result<ClassificationResult> {
        self.classify_material_blocking(image_data, width, height, channels)
    }

    pub fn classify_image(&self, image: &ImageData) -> Result<ClassificationResult> {
        self.classify_material_blocking(&image.data, image.width, image.height, image.channels)
    }

    /// Classify an interleaved image buffer. Samples may be in [0,1] or 0-255.
    pub fn classify_material_blocking(
        &self,
        image_data: &[f32],
        width: u32,
        height: u32,
        channels: u32,
    ) -> Result<ClassificationResult> {
        let start = Instant::now();
        let request = self.requests.fetch_add(1, Ordering::Relaxed);
        let image = ImageData::from_raw(image_data.to_vec(), width, height, channels)?;
        let mut degradation = Degradation::default();

        let multi_scale = self.run_multi_scale(&image, &mut degradation);
        let attention = match (&self.attention, &multi_scale) {
            (Some(module), Some(features)) => self.run_attention(module, &features.fused_features, &mut degradation),
            _ => None,
        };
        let gabor = self.run_gabor(&image, &mut degradation);

        let (svd, svd_cache_hit, svd_time) = self.run_svd(gabor.as_ref(), &image)?;

        let mut fused = Vec::new();
        if let Some(features) = &multi_scale {
            fused.extend_from_slice(&features.fused_features.features);
        }
        if let Some(stage) = attention.as_ref().filter(|s| !s.output.enhanced_features.is_empty()) {
            fused.extend_from_slice(&stage.output.enhanced_features);
            fused.extend_from_slice(&stage.output.texture_directions);
        }
        if let Some(response) = &gabor {
            fused.extend_from_slice(&response.energy_map);
        }
        if fused.is_empty() {
            let cause = degradation.last_error.take().unwrap_or(ClassificationError::EmptyFeatures);
            return Err(ClassificationError::classification("no feature stream produced values", cause));
        }
        l2_normalize(&mut fused);
        debug!("Fused {} features, degraded sources: {:?}", fused.len(), degradation.sources);

        let classifier_input = adaptive_average_pool(&fused, self.config.classification.feature_dim);
        let probabilities = if self.config.classification.use_ensemble {
            score_ensemble(
                &self.head,
                &self.ensemble,
                &classifier_input,
                self.config.classification.parallel_ensemble,
            )
        } else {
            score_single(&self.head, &classifier_input)
        }
        .map_err(|e| ClassificationError::classification("scoring failed", e))?;

        let properties = derive_properties(gabor.as_ref(), multi_scale.as_ref(), &fused, &image);
        let ranked = rank_predictions(&probabilities);
        let confidence = overall_confidence(&ranked);
        let categories = &self.config.classification.categories;

        let dominant_direction = attention
            .as_ref()
            .and_then(|stage| stage.output.dominant_direction())
            .map(|d| d.name());
        let predictions: Vec<MaterialPrediction> = ranked
            .iter()
            .map(|score| MaterialPrediction {
                category: categories[score.class_index].clone(),
                probability: score.probability,
                confidence: score.confidence,
                reasoning: reasoning(score.probability, &properties, dominant_direction),
            })
            .collect();

        let category = predictions
            .first()
            .map(|p| p.category.clone())
            .unwrap_or_default();
        let subcategory = if confidence < self.config.classification.min_confidence {
            warn!(
                "Confidence {:.3} for '{}' is below the minimum {:.3}; subcategory omitted",
                confidence, category, self.config.classification.min_confidence
            );
            None
        } else {
            Some(subcategory_for(&category, &properties))
        };

        self.save_debug_maps(request, &image, gabor.as_ref(), attention.as_ref());

        let texture_analysis = TextureAnalysis {
            svd,
            svd_cache_hit,
            svd_time,
            gabor_energy: gabor.as_ref().map_or(0.0, |g| g.texture_energy),
            dominant_orientation: gabor.as_ref().map_or(0.0, |g| g.dominant_orientation),
            dominant_frequency: gabor.as_ref().map_or(0.0, |g| g.dominant_frequency),
            texture_complexity: multi_scale.as_ref().map_or(0.0, |m| m.texture_complexity),
            texture_directions: attention
                .as_ref()
                .map_or([0.0; DIRECTION_BUCKETS], |stage| stage.output.texture_directions),
            attention_confidence: attention.as_ref().map_or(0.0, |stage| stage.output.mean_confidence()),
            fused_feature_len: fused.len(),
            degraded_sources: degradation.sources,
        };

        let processing_time = start.elapsed();
        info!(
            "Classified {}x{} image as {} ({:.3}) in {:.2?}",
            width, height, category, confidence, processing_time
        );

        Ok(ClassificationResult {
            predictions,
            confidence,
            category,
            subcategory,
            properties,
            texture_analysis,
            processing_time,
            model_version: self.config.classification.model_version.clone(),
        })
    }

    /// Classify many images, at most `max_concurrency` at a time on the blocking pool.
    ///
    /// Results are returned in input order; one failure does not affect the others.
    pub async fn classify_batch(
        self: Arc<Self>,
        images: Vec<ImageData>,
        max_concurrency: usize,
    ) -> Vec<Result<ClassificationResult>> {
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(images.len());

        for image in images {
            let service = Arc::clone(&self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ClassificationError::TaskJoin(e.to_string()))?;
                tokio::task::spawn_blocking(move || service.classify_image(&image))
                    .await
                    .map_err(|e| ClassificationError::TaskJoin(e.to_string()))?
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(ClassificationError::TaskJoin(e.to_string())),
            });
        }
        results
    }

    /// `None` when caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.svd.cache_stats()
    }

    pub fn clear_cache(&self) {
        self.svd.clear_cache();
        if let Some(attention) = &self.attention {
            attention.scratch_pool().clear_buffer_pool();
        }
        info!("Cleared SVD cache and scratch buffers");
    }

    pub fn model_info(&self) -> ModelInfo {
        let parameter_count = self.head.weight().len()
            + self.head.bias().len()
            + self.attention.as_ref().map_or(0, |a| {
                let w = a.weights();
                w.query.len() + w.key.len() + w.value.len() + w.output.len()
            });
        ModelInfo {
            version: self.config.classification.model_version.clone(),
            categories: self.config.classification.categories.clone(),
            feature_dim: self.config.classification.feature_dim,
            use_ensemble: self.config.classification.use_ensemble,
            ensemble: self.ensemble.clone(),
            weight_source: self.weight_source.clone(),
            parameter_count,
            gabor_bank: self.gabor.as_ref().map(|g| g.name().to_string()),
            multi_scale_module: self.multi_scale.as_ref().map(|m| m.name().to_string()),
            attention_channels: self.attention.as_ref().map(TextureAttentionModule::input_channels),
        }
    }

    pub fn export_model(&self) -> ModelExport {
        let mut weights = BTreeMap::new();
        weights.insert(CLASSIFIER_WEIGHT.to_string(), self.head.weight().to_vec());
        weights.insert(CLASSIFIER_BIAS.to_string(), self.head.bias().to_vec());
        if let Some(attention) = &self.attention {
            let w = attention.weights();
            let inner = self.config.attention.head_count * self.config.attention.key_dim;
            let layout = AttentionWeights::layout(attention.input_channels(), inner);
            for ((name, _), tensor) in layout.iter().zip([&w.query, &w.key, &w.value, &w.output]) {
                weights.insert(name.to_string(), tensor.clone());
            }
        }
        ModelExport {
            version: self.config.classification.model_version.clone(),
            config: self.config.clone(),
            ensemble: self.ensemble.clone(),
            weights,
        }
    }

    /// Rebuild a service from an export, using the built-in collaborators.
    pub fn import_model(export: ModelExport) -> Result<Self> {
        ServiceBuilder::from_export(export).build()
    }

    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.export_model().save(path)
    }

    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::import_model(ModelExport::load(path)?)
    }

    fn run_multi_scale(&self, image: &ImageData, degradation: &mut Degradation) -> Option<MultiScaleFeatures> {
        let Some(module) = &self.multi_scale else {
            degradation.absent("multi_scale");
            return None;
        };
        match module.process_multi_scale(&image.data, image.width, image.height, image.channels) {
            Ok(features) => Some(features),
            Err(e) => {
                degradation.failed("multi_scale", module.name(), e);
                None
            }
        }
    }

    /// The fused grid is halved once, then again until it fits the positional table.
    fn attention_grid(&self, fused: &TextureFeatureMap) -> TextureFeatureMap {
        let max_len = self.config.attention.max_sequence_length;
        let mut grid = fused.downsample();
        while grid.sequence_len() > max_len && (grid.width > 1 || grid.height > 1) {
            grid = grid.downsample();
        }
        grid
    }

    fn run_attention(
        &self,
        module: &TextureAttentionModule,
        fused: &TextureFeatureMap,
        degradation: &mut Degradation,
    ) -> Option<AttentionStage> {
        let grid = self.attention_grid(fused);
        if grid.sequence_len() == 0 {
            debug!("Empty feature grid, skipping attention");
            return None;
        }
        match module.process_texture(&grid) {
            Ok(output) => Some(AttentionStage {
                output,
                grid_width: grid.width,
                grid_height: grid.height,
            }),
            Err(e) => {
                degradation.failed("attention", "texture-attention", e);
                None
            }
        }
    }

    fn run_gabor(&self, image: &ImageData, degradation: &mut Degradation) -> Option<TextureResponse> {
        let Some(bank) = &self.gabor else {
            degradation.absent("gabor");
            return None;
        };
        let gray = image.to_grayscale();
        match bank.apply_filter_bank(&gray.data, gray.width, gray.height, 1) {
            Ok(response) => Some(response),
            Err(e) => {
                degradation.failed("gabor", bank.name(), e);
                None
            }
        }
    }

    fn run_svd(
        &self,
        gabor: Option<&TextureResponse>,
        image: &ImageData,
    ) -> Result<(SvdTextureFeatures, bool, Duration)> {
        let Some(response) = gabor else {
            return Ok((SvdTextureFeatures::empty(), false, Duration::ZERO));
        };
        if response.energy_map.len() != image.pixel_count() {
            warn!(
                "Gabor energy map holds {} values for a {}x{} image, skipping SVD",
                response.energy_map.len(),
                image.width,
                image.height
            );
            return Ok((SvdTextureFeatures::empty(), false, Duration::ZERO));
        }
        if response.energy_map.is_empty() {
            return Ok((SvdTextureFeatures::empty(), false, Duration::ZERO));
        }

        let start = Instant::now();
        let extraction = self
            .svd
            .extract(&response.energy_map, image.height as usize, image.width as usize)?;
        let elapsed = start.elapsed();
        debug!(
            "SVD rank {} in {:.2?} (cache hit: {})",
            extraction.features.rank, elapsed, extraction.cache_hit
        );
        Ok((extraction.features.as_ref().clone(), extraction.cache_hit, elapsed))
    }

    fn save_debug_maps(
        &self,
        request: u64,
        image: &ImageData,
        gabor: Option<&TextureResponse>,
        attention: Option<&AttentionStage>,
    ) {
        if !self.config.debug.enabled {
            return;
        }
        if let Some(response) = gabor
            && let Err(e) = save_debug_output(
                &response.energy_map,
                image.width,
                image.height,
                format!("request_{request}_gabor_energy.png"),
                "gabor energy",
                &self.config.debug,
            )
        {
            warn!("Failed to save Gabor energy map: {}", e);
        }
        if let Some(stage) = attention
            && let Err(e) = save_debug_output(
                &stage.output.confidence_scores,
                stage.grid_width,
                stage.grid_height,
                format!("request_{request}_attention_confidence.png"),
                "attention confidence",
                &self.config.debug,
            )
        {
            warn!("Failed to save attention confidence map: {}", e);
        }
    }
}

fn reasoning(probability: f32, properties: &MaterialProperties, direction: Option<&str>) -> String {
    let mut text = format!(
        "p={:.3}; {} pattern, {} surface, roughness {:.2}",
        probability, properties.pattern_type, properties.surface_type, properties.roughness
    );
    if let Some(direction) = direction {
        text.push_str(&format!(", attention favours {} structure", direction));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::TestTexture;

    struct FailingGabor;

    impl GaborFilterBank for FailingGabor {
        fn name(&self) -> &str {
            "failing"
        }

        fn apply_filter_bank(&self, _: &[f32], _: u32, _: u32, _: u32) -> Result<TextureResponse> {
            Err(ClassificationError::InvalidInput("filter bank offline".to_string()))
        }
    }

    fn small_config() -> ClassifierConfig {
        let mut config = ClassifierConfig::default();
        config.classification.feature_dim = 64;
        config
    }

    #[test]
    fn attention_grid_is_halved_until_it_fits() {
        let mut config = small_config();
        config.attention.max_sequence_length = 10;
        let service = MaterialClassificationService::new(config).unwrap();
        let grid = service.attention_grid(&TextureFeatureMap::zeros(16, 16, 6));
        assert_eq!((grid.width, grid.height), (2, 2));
    }

    #[test]
    fn failing_source_is_recorded_and_skipped() {
        let service = MaterialClassificationService::builder(small_config())
            .gabor_bank(FailingGabor)
            .build()
            .unwrap();
        let image = ImageData::create_test_texture(16, TestTexture::Checkerboard { cell: 2 });
        let result = service.classify_image(&image).unwrap();
        assert_eq!(result.texture_analysis.degraded_sources, vec!["gabor".to_string()]);
        assert_eq!(result.texture_analysis.svd.rank, 0);
    }

    #[test]
    fn failure_of_every_source_reports_the_last_cause() {
        let service = MaterialClassificationService::builder(small_config())
            .gabor_bank(FailingGabor)
            .without_multi_scale_module()
            .build()
            .unwrap();
        let image = ImageData::create_test_texture(8, TestTexture::Uniform(0.3));
        match service.classify_image(&image).unwrap_err() {
            ClassificationError::Classification { source, .. } => {
                assert!(matches!(*source, ClassificationError::FeatureSource { ref source_name, .. } if source_name == "failing"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn low_confidence_drops_subcategory() {
        let mut config = small_config();
        config.classification.min_confidence = 1.0;
        let service = MaterialClassificationService::new(config).unwrap();
        let image = ImageData::create_test_texture(16, TestTexture::Noise { seed: 5 });
        let result = service.classify_image(&image).unwrap();
        assert!(result.subcategory.is_none());
        assert!(!result.category.is_empty());
    }

    #[test]
    fn model_info_counts_every_tensor() {
        let service = MaterialClassificationService::new(small_config()).unwrap();
        let info = service.model_info();
        assert_eq!(info.parameter_count, service.export_model().parameter_count());
        assert_eq!(info.attention_channels, Some(6));
        assert_eq!(info.gabor_bank.as_deref(), Some("fourier-gabor"));
    }

    #[test]
    fn debug_maps_are_written_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.debug.enabled = true;
        config.debug.output_dir = Some(dir.path().to_string_lossy().into_owned());
        let service = MaterialClassificationService::new(config).unwrap();
        let image = ImageData::create_test_texture(16, TestTexture::Stripes { period: 4.0, angle: 0.0 });
        service.classify_image(&image).unwrap();
        assert!(dir.path().join("request_0_gabor_energy.png").exists());
        assert!(dir.path().join("request_0_attention_confidence.png").exists());
    }
}
