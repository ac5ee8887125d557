//! Crate-level tests: catalog files on disk, the engine end to end with fake
//! embedders and generators, the factory's degrade paths, and the HTTP routes.


use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::catalog::{encode_npy, Catalog, EmbeddingMatrix, ProductRecord};
use crate::describe::{CopyRequest, GeneratorError, TextGenerator};
use crate::semantic::{Embedder, EmbeddingError};

/// Words the fake embedder knows; one dimension each.
pub const VOCABULARY: [&str; 6] = ["chair", "oak", "wooden", "table", "lamp", "sofa"];

/// Bag-of-words embedder over `VOCABULARY`. Deterministic and instant.
pub struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn dimensions(&self) -> usize {
        VOCABULARY.len()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(keyword_vector(text))
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split(|c: char| !c.is_alphanumeric()).collect();
    VOCABULARY
        .iter()
        .map(|term| words.iter().filter(|w| *w == term).count() as f32)
        .collect()
}

pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn dimensions(&self) -> usize {
        VOCABULARY.len()
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::EmbeddingFailed("model crashed".into()))
    }
}

/// Returns the same text for every request and remembers the prompts.
pub struct StaticGenerator {
    pub text: String,
    pub requests: Mutex<Vec<CopyRequest>>,
}

impl StaticGenerator {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            requests: Mutex::new(vec![]),
        }
    }
}

#[async_trait::async_trait]
impl TextGenerator for StaticGenerator {
    async fn complete(&self, request: &CopyRequest) -> Result<String, GeneratorError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.text.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

pub struct FailingGenerator;

#[async_trait::async_trait]
impl TextGenerator for FailingGenerator {
    async fn complete(&self, _request: &CopyRequest) -> Result<String, GeneratorError> {
        Err(GeneratorError::Status {
            status: 429,
            body: "quota exceeded".into(),
        })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

pub struct SlowGenerator(pub Duration);

#[async_trait::async_trait]
impl TextGenerator for SlowGenerator {
    async fn complete(&self, _request: &CopyRequest) -> Result<String, GeneratorError> {
        tokio::time::sleep(self.0).await;
        Ok("too late".into())
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

/// Answers with whitespace only.
pub struct BlankGenerator;

#[async_trait::async_trait]
impl TextGenerator for BlankGenerator {
    async fn complete(&self, _request: &CopyRequest) -> Result<String, GeneratorError> {
        Ok(" \n\t ".into())
    }

    fn name(&self) -> &'static str {
        "blank"
    }
}

/// Tracks how many calls are in flight at once.
pub struct CountingGenerator {
    pub delay: Duration,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl TextGenerator for CountingGenerator {
    async fn complete(&self, _request: &CopyRequest) -> Result<String, GeneratorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok("Counted copy.".into())
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

pub struct PanickingGenerator;

#[async_trait::async_trait]
impl TextGenerator for PanickingGenerator {
    async fn complete(&self, _request: &CopyRequest) -> Result<String, GeneratorError> {
        panic!("generator bug")
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}

pub fn product(id: &str, title: &str, description: &str) -> ProductRecord {
    ProductRecord {
        uniq_id: id.to_string(),
        title: title.to_string(),
        brand: "Acme".to_string(),
        description: description.to_string(),
        price: 120.0,
        categories: "['Home & Kitchen', 'Furniture']".to_string(),
        images: format!("https://img.example/{id}.jpg"),
        material: None,
        color: None,
    }
}

pub fn oak_chair() -> ProductRecord {
    ProductRecord {
        material: Some("Oak".into()),
        color: Some("Brown".into()),
        ..product("oak-chair", "Oak Chair", "A sturdy chair for dining rooms.")
    }
}

/// A small furniture catalog embedded with `KeywordEmbedder`.
pub fn furniture_catalog() -> Catalog {
    let records = vec![
        oak_chair(),
        product("glass-table", "Glass Table", "Modern table with a glass top."),
        product("floor-lamp", "Floor Lamp", "Tall lamp for reading corners."),
        product("oak-table", "Oak Table", "Solid oak dining table."),
        product("sofa", "Sofa", "Three-seat sofa."),
    ];
    let rows = records
        .iter()
        .map(|r| keyword_vector(&format!("{} {}", r.title, r.description)))
        .collect();
    Catalog::from_parts(records, EmbeddingMatrix::from_rows(rows).unwrap()).unwrap()
}

pub fn write_records_json(path: &Path, records: &[ProductRecord]) {
    std::fs::write(path, serde_json::to_vec_pretty(records).unwrap()).unwrap();
}

pub fn write_npy(path: &Path, rows: &[Vec<f32>]) {
    std::fs::write(path, encode_npy(rows)).unwrap();
}

/// Catalog files for `records`, embedded with `KeywordEmbedder`.
/// `drop_rows` removes that many trailing matrix rows.
pub fn write_catalog_files(
    dir: &Path,
    records: &[ProductRecord],
    drop_rows: usize,
) -> (PathBuf, PathBuf) {
    let records_path = dir.join("product_data.json");
    let embeddings_path = dir.join("sentence_embeddings.npy");

    let rows: Vec<Vec<f32>> = records
        .iter()
        .map(|r| keyword_vector(&format!("{} {}", r.title, r.description)))
        .take(records.len().saturating_sub(drop_rows))
        .collect();

    write_records_json(&records_path, records);
    write_npy(&embeddings_path, &rows);
    (embeddings_path, records_path)
}

pub fn keyword_embedder() -> Arc<dyn Embedder> {
    Arc::new(KeywordEmbedder)
}
