use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::describe::GenerationSettings;

const CONFIG_FILE: &str = "config.yaml";

/// Environment variable overriding `generator.api_key`
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_EMBEDDINGS_PATH: &str = "models/sentence_embeddings.npy";
const DEFAULT_RECORDS_PATH: &str = "models/product_data.json";
const DEFAULT_MODEL_CACHE_DIR: &str = ".fastembed_cache";
const DEFAULT_GENERATOR_MODEL: &str = "gpt-3.5-turbo";
/// Default generator timeout in seconds
const DEFAULT_GENERATOR_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_TOKENS: u32 = 100;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;
const DEFAULT_LISTEN: &str = "0.0.0.0:8000";

/// Locations of the prebuilt catalog files. Relative paths resolve against the base path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_embeddings_path")]
    pub embeddings_path: PathBuf,

    #[serde(default = "default_records_path")]
    pub records_path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            embeddings_path: default_embeddings_path(),
            records_path: default_records_path(),
        }
    }
}

fn default_embeddings_path() -> PathBuf {
    PathBuf::from(DEFAULT_EMBEDDINGS_PATH)
}

fn default_records_path() -> PathBuf {
    PathBuf::from(DEFAULT_RECORDS_PATH)
}

/// Configuration for the query embedding model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name; must be the model the catalog embeddings were built with
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Where downloaded model files are kept
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_embedding_model() -> String {
    crate::semantic::DEFAULT_MODEL.to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_CACHE_DIR)
}

/// Configuration for generated product descriptions
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// API key; unset, empty or the sample placeholder disables generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_generator_model")]
    pub model: String,

    /// Chat completions URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Upper bound for one generator call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Generator calls allowed in flight at once
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_generator_model(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl GeneratorConfig {
    pub fn settings(&self) -> GenerationSettings {
        GenerationSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_concurrent: self.max_concurrent_requests,
        }
    }
}

fn default_generator_model() -> String {
    DEFAULT_GENERATOR_MODEL.to_string()
}

fn default_endpoint() -> String {
    crate::describe::DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_GENERATOR_TIMEOUT_SECS
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_concurrent_requests() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Browser origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let generator = &self.generator;
        if generator.timeout_secs == 0 {
            bail!("generator.timeout_secs must be greater than 0");
        }
        if generator.max_tokens == 0 {
            bail!("generator.max_tokens must be greater than 0");
        }
        if !(0.0..=2.0).contains(&generator.temperature) {
            bail!(
                "generator.temperature must be between 0.0 and 2.0, got {}",
                generator.temperature
            );
        }
        if generator.max_concurrent_requests == 0 {
            bail!("generator.max_concurrent_requests must be greater than 0");
        }
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if absent.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        Self::load_with_env(base_path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(base_path: &Path, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("failed to create {}", base_path.display()))?;
            let defaults = serde_yml::to_string(&Self::default())?;
            std::fs::write(&path, defaults)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("config is malformed: {}", path.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave before env overrides so the key never lands on disk
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        config.apply_env(env);

        Ok(config)
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = env(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            log::debug!("{API_KEY_ENV} set; overriding generator.api_key");
            self.generator.api_key = Some(key);
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a configured path against the base path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    /// Config rooted at `base_path` without touching the filesystem.
    #[cfg(test)]
    pub fn for_base_path(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            ..Default::default()
        }
    }
}
