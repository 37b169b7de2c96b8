use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// OpenAI-compatible API key. May be empty: semantic search is then
    /// disabled and the cache runs metadata-only.
    #[serde(rename = "open_api_key")]
    #[serde(default)]
    pub openai_key: String,
    #[serde(rename = "api_base")]
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(rename = "embedding_model")]
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(rename = "image_model")]
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            openai_key: String::new(),
            api_base: default_api_base(),
            embedding_model: default_embedding_model(),
            image_model: default_image_model(),
            cache: CacheSettings::default(),
        }
    }
}

/// Tuning knobs for the semantic image cache, passed once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Minimum similarity for a cached candidate to count as a hit.
    /// 0.85 maximizes reuse; 0.65 maximizes variety.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Chance of bypassing the cache entirely to force a fresh image.
    #[serde(default = "default_skip_probability")]
    pub skip_probability: f64,
    /// Nearest neighbors fetched per lookup.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Root directory for the metadata file and vector index.
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// Where freshly generated images are written.
    #[serde(default = "default_images_dir")]
    pub images_dir: String,
    /// Opt-in for deserializing a previously saved local vector index.
    #[serde(default = "default_allow_persisted_index")]
    pub allow_persisted_index: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            similarity_threshold: default_similarity_threshold(),
            skip_probability: default_skip_probability(),
            top_k: default_top_k(),
            store_path: default_store_path(),
            images_dir: default_images_dir(),
            allow_persisted_index: default_allow_persisted_index(),
        }
    }
}

fn default_allow_persisted_index() -> bool {
    true
}

fn default_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_image_model() -> String {
    "gpt-image-1.5".to_string()
}

fn default_similarity_threshold() -> f64 {
    0.65
}

fn default_skip_probability() -> f64 {
    0.30
}

fn default_top_k() -> usize {
    3
}

fn default_store_path() -> String {
    "image_cache".to_string()
}

fn default_images_dir() -> String {
    "generated_images".to_string()
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)?;

        if config.cache.similarity_threshold <= 0.0 || config.cache.similarity_threshold > 1.0 {
            anyhow::bail!("config.json: similarity_threshold must be in (0, 1]");
        }
        if !(0.0..=1.0).contains(&config.cache.skip_probability) {
            anyhow::bail!("config.json: skip_probability must be in [0, 1]");
        }
        if config.cache.top_k == 0 {
            anyhow::bail!("config.json: top_k must be at least 1");
        }

        Ok(config)
    }
}
