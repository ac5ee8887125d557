//! Marketing copy for recommended products.
//!
//! A configured `TextGenerator` writes the copy; when there is none, or when the
//! call fails in any way, a templated description built from the record is used.
//! `DescriptionGenerator::describe` never fails.

mod openai;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::catalog::ProductRecord;

pub use openai::{OpenAiGenerator, DEFAULT_ENDPOINT};

/// Credential value shipped in sample env files; treated as unset.
pub const PLACEHOLDER_API_KEY: &str = "your_openai_api_key_here";

pub const SYSTEM_PROMPT: &str =
    "You are a creative furniture product copywriter. Write engaging, concise product descriptions.";

const PREFIX: &str = "✨";
const ELLIPSIS: &str = "...";
/// Description characters kept when no generator is configured
const TEMPLATE_EXCERPT_CHARS: usize = 100;
/// Description characters kept when the generator call failed
const FALLBACK_EXCERPT_CHARS: usize = 150;

/// Errors from a generator call. Never leave this module's `describe`.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("generator request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed generator response: {0}")]
    Malformed(String),

    #[error("generator timed out after {0:?}")]
    Timeout(Duration),

    #[error("no generator configured")]
    Disabled,
}

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// External text-completion capability.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: &CopyRequest) -> Result<String, GeneratorError>;

    /// Name for logging
    fn name(&self) -> &'static str;
}

/// Knobs for the generated copy.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Generator calls allowed in flight at once, across all requests
    pub max_concurrent: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_tokens: 100,
            temperature: 0.7,
            max_concurrent: 4,
        }
    }
}

/// Produces a description for every product, generated or templated.
pub struct DescriptionGenerator {
    generator: Option<Arc<dyn TextGenerator>>,
    settings: GenerationSettings,
    permits: Semaphore,
}

impl DescriptionGenerator {
    /// Templates only, no external calls.
    pub fn template_only() -> Self {
        let settings = GenerationSettings::default();
        Self {
            generator: None,
            permits: Semaphore::new(settings.max_concurrent),
            settings,
        }
    }

    pub fn with_generator(generator: Arc<dyn TextGenerator>, settings: GenerationSettings) -> Self {
        Self {
            generator: Some(generator),
            permits: Semaphore::new(settings.max_concurrent.max(1)),
            settings,
        }
    }

    pub fn is_generative(&self) -> bool {
        self.generator.is_some()
    }

    /// The prompt sent for `product`.
    pub fn copy_request(&self, product: &ProductRecord) -> CopyRequest {
        CopyRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: format!(
                "Write a creative 2-sentence description for: {}. Category: {}. Material: {}. Color: {}.",
                product.title,
                product.categories,
                product.material.as_deref().unwrap_or("N/A"),
                product.color.as_deref().unwrap_or("N/A"),
            ),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }

    /// Ask the generator for copy, bounded by the configured timeout.
    ///
    /// Waits for a free slot first; at most `max_concurrent` calls run at once.
    pub async fn generate(&self, product: &ProductRecord) -> Result<String, GeneratorError> {
        let generator = self.generator.as_ref().ok_or(GeneratorError::Disabled)?;
        let request = self.copy_request(product);

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GeneratorError::Disabled)?;

        let text = tokio::time::timeout(self.settings.timeout, generator.complete(&request))
            .await
            .map_err(|_| GeneratorError::Timeout(self.settings.timeout))??;

        let text = text.trim();
        if text.is_empty() {
            return Err(GeneratorError::Malformed("empty completion".into()));
        }

        Ok(text.to_string())
    }

    /// Description for `product`. Generator failures fall back to a template.
    pub async fn describe(&self, product: &ProductRecord) -> String {
        let Some(generator) = &self.generator else {
            return template_description(product);
        };

        match self.generate(product).await {
            Ok(text) => text,
            Err(err) => {
                log::warn!(
                    "generator={} product={} outcome=fallback err={err}",
                    generator.name(),
                    product.uniq_id
                );
                fallback_description(product)
            }
        }
    }
}

/// Description used when no generator is configured.
pub fn template_description(product: &ProductRecord) -> String {
    format!(
        "{PREFIX} {} - A beautiful {} piece in {}. {}{ELLIPSIS}",
        product.title,
        product.material_or_empty(),
        product.color_or_empty(),
        truncate_chars(&product.description, TEMPLATE_EXCERPT_CHARS),
    )
}

/// Description used when the generator call failed.
pub fn fallback_description(product: &ProductRecord) -> String {
    format!(
        "{PREFIX} {} - {}{ELLIPSIS}",
        product.title,
        truncate_chars(&product.description, FALLBACK_EXCERPT_CHARS),
    )
}

/// First `max` characters of `s`, ignoring word boundaries.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Whether `api_key` is a usable credential.
pub fn is_configured_key(api_key: Option<&str>) -> bool {
    match api_key.map(str::trim) {
        Some(key) => !key.is_empty() && key != PLACEHOLDER_API_KEY,
        None => false,
    }
}
