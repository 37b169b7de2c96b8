use crate::config::Config;
use crate::generator::ImageGenerator;
use crate::logw;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine;
use reqwest::Client;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub struct OpenAiImages {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    images_dir: PathBuf,
}

impl OpenAiImages {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        if cfg.openai_key.is_empty() {
            anyhow::bail!("image generation requires open_api_key in config.json");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;

        Ok(OpenAiImages {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            api_key: cfg.openai_key.clone(),
            model: cfg.image_model.clone(),
            images_dir: PathBuf::from(&cfg.cache.images_dir),
        })
    }
}

fn extract_b64_image(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error") {
        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            logw(format!("Image API error message: {}", msg));
        }
        return None;
    }

    let data = root.get("data")?.as_array()?;
    let first = data.first()?;
    first
        .get("b64_json")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

async fn write_image_bytes(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create dir {}", dir.display()))?;

    let out_path = dir.join(format!("{filename}.jpg"));
    fs::write(&out_path, bytes)
        .await
        .with_context(|| format!("write image: {}", out_path.display()))?;
    Ok(out_path)
}

#[async_trait]
impl ImageGenerator for OpenAiImages {
    async fn generate(&self, prompt: &str, filename: &str) -> Result<PathBuf> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
            "output_format": "jpeg",
        });

        let resp = self
            .client
            .post(format!("{}/v1/images/generations", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("image generation request failed")?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            logw(format!("Image API HTTP {}", status.as_u16()));
            if !raw.is_empty() {
                let snippet = raw.chars().take(800).collect::<String>();
                logw(format!("Image API raw body: {}", snippet));
            }
            anyhow::bail!("image generation returned HTTP {}", status.as_u16());
        }

        let b64 = extract_b64_image(&raw)
            .context("image generation response missing b64_json payload")?;
        let bytes = general_purpose::STANDARD
            .decode(b64.as_bytes())
            .context("failed to decode base64 image payload")?;

        write_image_bytes(&self.images_dir, filename, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_b64_image_reads_payload() {
        let raw = r#"{"data": [{"b64_json": "aGVsbG8="}]}"#;
        assert_eq!(extract_b64_image(raw), Some("aGVsbG8=".to_string()));
    }

    #[test]
    fn extract_b64_image_rejects_error_body() {
        let raw = r#"{"error": {"message": "content policy"}}"#;
        assert_eq!(extract_b64_image(raw), None);
    }

    #[tokio::test]
    async fn write_image_bytes_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image_bytes(dir.path(), "story_test_ab12cd34", b"jpegdata")
            .await
            .unwrap();
        assert!(path.ends_with("story_test_ab12cd34.jpg"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"jpegdata");
    }
}
