use crate::config::Config;
use crate::logw;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

/// Seam between the cache and whatever turns text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct OpenAiEmbeddings {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddings {
    /// Returns `None` when no API key is configured; the cache then runs
    /// metadata-only and every lookup is a miss.
    pub fn from_config(cfg: &Config) -> Result<Option<Self>> {
        if cfg.openai_key.is_empty() {
            return Ok(None);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Some(OpenAiEmbeddings {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.openai_key.clone(),
            model: cfg.embedding_model.clone(),
        }))
    }
}

fn extract_embedding(resp_json: &str) -> Option<Vec<f32>> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error") {
        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            logw(format!("Embedding error message: {}", msg));
        }
        if let Some(typ) = err.get("type").and_then(|v| v.as_str()) {
            logw(format!("Embedding error type: {}", typ));
        }
        return None;
    }

    let data = root.get("data")?.as_array()?;
    let first = data.first()?;
    let values = first.get("embedding")?.as_array()?;

    let mut out = Vec::with_capacity(values.len());
    for value in values {
        out.push(value.as_f64()? as f32);
    }
    Some(out)
}

#[async_trait]
impl Embedder for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("embedding request failed")?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            logw(format!("Embedding HTTP {}", status.as_u16()));
            if !raw.is_empty() {
                let snippet = raw.chars().take(800).collect::<String>();
                logw(format!("Embedding raw body: {}", snippet));
            }
            anyhow::bail!("embedding request returned HTTP {}", status.as_u16());
        }

        match extract_embedding(&raw) {
            Some(vector) if !vector.is_empty() => Ok(vector),
            _ => anyhow::bail!("embedding response contained no vector"),
        }
    }
}
