//! Recommendation engine.
//!
//! Owns the loaded catalog, the query embedder, the ranker and the description
//! generator, and turns a free-text query into an ordered list of products.
//! Built once by `EngineFactory` and shared read-only between requests.

mod factory;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::catalog::{Catalog, IndexError, LoadError, ProductRecord};
use crate::describe::{fallback_description, DescriptionGenerator};
use crate::semantic::{Embedder, EmbeddingError, RankError, SimilarityRanker};

pub use factory::EngineFactory;

/// Number of results when the caller does not ask for a specific count.
pub const DEFAULT_RECOMMENDATIONS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("recommendation engine not loaded")]
    NotLoaded,

    #[error("number of recommendations must be at least 1")]
    InvalidCount,

    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("ranking failed: {0}")]
    Ranking(#[from] RankError),

    #[error("catalog lookup failed: {0}")]
    Catalog(#[from] IndexError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A recommended product with its score and generated copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResult {
    #[serde(flatten)]
    pub product: ProductRecord,
    pub similarity_score: f32,
    pub ai_description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub query: String,
    pub recommendations: Vec<RecommendationResult>,
    pub message: String,
}

impl RecommendationResponse {
    pub fn new(query: &str, recommendations: Vec<RecommendationResult>) -> Self {
        Self {
            message: format!(
                "Found {} recommendations for '{}'",
                recommendations.len(),
                query
            ),
            query: query.to_string(),
            recommendations,
        }
    }
}

/// Health summary; available whether or not loading succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub status: String,
    pub message: String,
    pub total_products: usize,
    pub ready: bool,
    pub ai_descriptions: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Loaded {
    catalog: Arc<Catalog>,
    embedder: Arc<dyn Embedder>,
}

pub struct RecommendationEngine {
    loaded: Option<Loaded>,
    load_error: Option<String>,
    ranker: SimilarityRanker,
    describer: Arc<DescriptionGenerator>,
}

impl RecommendationEngine {
    /// A ready engine. The catalog width must match the embedder.
    pub fn new(
        catalog: Arc<Catalog>,
        embedder: Arc<dyn Embedder>,
        describer: DescriptionGenerator,
    ) -> Result<Self, LoadError> {
        catalog.ensure_dimensions(embedder.dimensions())?;

        Ok(Self {
            loaded: Some(Loaded { catalog, embedder }),
            load_error: None,
            ranker: SimilarityRanker::new(),
            describer: Arc::new(describer),
        })
    }

    /// An engine that answers status queries but refuses to recommend.
    pub fn not_loaded(reason: impl Into<String>, describer: DescriptionGenerator) -> Self {
        Self {
            loaded: None,
            load_error: Some(reason.into()),
            ranker: SimilarityRanker::new(),
            describer: Arc::new(describer),
        }
    }

    /// Loaded with at least one product.
    pub fn is_ready(&self) -> bool {
        self.loaded
            .as_ref()
            .map(|l| !l.catalog.is_empty())
            .unwrap_or(false)
    }

    fn ready(&self) -> Result<&Loaded, EngineError> {
        self.loaded
            .as_ref()
            .filter(|l| !l.catalog.is_empty())
            .ok_or(EngineError::NotLoaded)
    }

    /// Top `k` products for `query`, best first.
    pub async fn recommend(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RecommendationResult>, EngineError> {
        let loaded = self.ready()?;
        if k == 0 {
            return Err(EngineError::InvalidCount);
        }

        let embedder = loaded.embedder.clone();
        let text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| EngineError::Internal(format!("embedding task failed: {e}")))??;

        let ranked = self.ranker.rank(&vector, &loaded.catalog, k)?;
        log::debug!("query={query:?} k={k} ranked={}", ranked.len());

        let products = ranked
            .iter()
            .map(|hit| loaded.catalog.get(hit.index).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        let descriptions = self.describe_all(&products).await;

        Ok(products
            .into_iter()
            .zip(ranked)
            .zip(descriptions)
            .map(|((product, hit), ai_description)| RecommendationResult {
                product,
                similarity_score: hit.score,
                ai_description,
            })
            .collect())
    }

    /// `recommend` wrapped with the query echo and count message.
    pub async fn respond(
        &self,
        query: &str,
        k: usize,
    ) -> Result<RecommendationResponse, EngineError> {
        let recommendations = self.recommend(query, k).await?;
        Ok(RecommendationResponse::new(query, recommendations))
    }

    /// Generate descriptions concurrently, keeping input order.
    async fn describe_all(&self, products: &[ProductRecord]) -> Vec<String> {
        let mut tasks = JoinSet::new();
        for (position, product) in products.iter().enumerate() {
            let describer = self.describer.clone();
            let product = product.clone();
            tasks.spawn(async move { (position, describer.describe(&product).await) });
        }

        let mut descriptions: Vec<Option<String>> = vec![None; products.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, text)) => descriptions[position] = Some(text),
                Err(err) => log::error!("description task failed: {err}"),
            }
        }

        descriptions
            .into_iter()
            .zip(products)
            .map(|(text, product)| text.unwrap_or_else(|| fallback_description(product)))
            .collect()
    }

    pub fn status(&self) -> EngineStatus {
        let total_products = self
            .loaded
            .as_ref()
            .map(|l| l.catalog.size())
            .unwrap_or(0);

        let message = if self.is_ready() {
            "Furniture Recommendation API is running".to_string()
        } else {
            "Furniture Recommendation API is running, catalog not loaded".to_string()
        };

        EngineStatus {
            status: "online".to_string(),
            message,
            total_products,
            ready: self.is_ready(),
            ai_descriptions: self.describer.is_generative(),
            error: self.load_error.clone(),
        }
    }

    /// Every catalog product in catalog order. Same readiness rule as `recommend`.
    pub fn products(&self) -> Result<&[ProductRecord], EngineError> {
        self.ready().map(|l| l.catalog.records())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_message() {
        let response = RecommendationResponse::new("oak table", vec![]);
        assert_eq!(response.message, "Found 0 recommendations for 'oak table'");
        assert_eq!(response.query, "oak table");
    }

    #[test]
    fn test_not_loaded_status() {
        let engine = RecommendationEngine::not_loaded(
            "failed to read models/product_data.json",
            DescriptionGenerator::template_only(),
        );

        let status = engine.status();
        assert_eq!(status.status, "online");
        assert!(!status.ready);
        assert_eq!(status.total_products, 0);
        assert!(!status.ai_descriptions);
        assert!(status.error.unwrap().contains("product_data.json"));
        assert!(matches!(engine.products(), Err(EngineError::NotLoaded)));
    }

    #[tokio::test]
    async fn test_not_loaded_refuses_every_query() {
        let engine =
            RecommendationEngine::not_loaded("missing", DescriptionGenerator::template_only());

        for query in ["", "sofa", "mid-century walnut sideboard"] {
            assert!(matches!(
                engine.recommend(query, 5).await,
                Err(EngineError::NotLoaded)
            ));
        }
    }
}
