use std::path::Path;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::{Config, EmbeddingConfig, GeneratorConfig};
use crate::describe::{is_configured_key, DescriptionGenerator, OpenAiGenerator};
use crate::semantic::{Embedder, EmbeddingError, EmbeddingModel};

use super::RecommendationEngine;

/// Builds the process-wide engine from configuration.
///
/// Load failures never abort: they produce a not-loaded engine so the
/// status endpoint keeps answering.
pub struct EngineFactory;

impl EngineFactory {
    /// Build with the fastembed model named in the config.
    pub fn from_config(config: &Config) -> RecommendationEngine {
        Self::build(config, |embedding, cache_dir| {
            let model = EmbeddingModel::new(&embedding.model, cache_dir.to_path_buf())?;
            Ok(Arc::new(model) as Arc<dyn Embedder>)
        })
    }

    /// Build with a caller-supplied embedder loader.
    pub fn build<F>(config: &Config, load_embedder: F) -> RecommendationEngine
    where
        F: FnOnce(&EmbeddingConfig, &Path) -> Result<Arc<dyn Embedder>, EmbeddingError>,
    {
        let describer = Self::describer(&config.generator);

        let embeddings_path = config.resolve(&config.catalog.embeddings_path);
        let records_path = config.resolve(&config.catalog.records_path);

        log::info!(
            "loading catalog from {} and {}",
            records_path.display(),
            embeddings_path.display()
        );

        let catalog = match Catalog::load(&embeddings_path, &records_path) {
            Ok(catalog) => catalog,
            Err(err) => {
                log::error!("catalog not loaded: {err}");
                return RecommendationEngine::not_loaded(err.to_string(), describer);
            }
        };

        let cache_dir = config.resolve(&config.embedding.cache_dir);
        let embedder = match load_embedder(&config.embedding, &cache_dir) {
            Ok(embedder) => embedder,
            Err(err) => {
                log::error!("embedding model not loaded: {err}");
                return RecommendationEngine::not_loaded(err.to_string(), describer);
            }
        };

        let size = catalog.size();
        match RecommendationEngine::new(Arc::new(catalog), embedder, describer) {
            Ok(engine) => {
                log::info!("Loaded {size} products successfully");
                engine
            }
            Err(err) => {
                log::error!("catalog not loaded: {err}");
                // describer moved into the failed constructor; rebuild it
                let describer = Self::describer(&config.generator);
                RecommendationEngine::not_loaded(err.to_string(), describer)
            }
        }
    }

    /// Generator-backed descriptions when a usable API key is configured.
    pub fn describer(config: &GeneratorConfig) -> DescriptionGenerator {
        let api_key = match config.api_key.as_deref() {
            Some(key) if is_configured_key(Some(key)) => key,
            _ => {
                log::info!("no generator API key configured; using template descriptions");
                return DescriptionGenerator::template_only();
            }
        };

        let settings = config.settings();
        match OpenAiGenerator::new(
            api_key.to_string(),
            config.model.clone(),
            config.endpoint.clone(),
            settings.timeout,
        ) {
            Ok(generator) => DescriptionGenerator::with_generator(Arc::new(generator), settings),
            Err(err) => {
                log::warn!("generator client unavailable, using template descriptions: {err}");
                DescriptionGenerator::template_only()
            }
        }
    }
}
