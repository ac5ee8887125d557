//! Semantic matching between free-text queries and catalog products.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed for query embedding generation
//! - `ranker`: Cosine similarity top-K over the catalog matrix

pub mod embeddings;
mod ranker;

pub use embeddings::{Embedder, EmbeddingError, EmbeddingModel};
pub use ranker::{RankError, Ranked, SimilarityRanker};

/// Default embedding model name; the bundled catalogs are embedded with it.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
