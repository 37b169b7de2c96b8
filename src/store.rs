//! Per-image metadata, persisted as one JSON object keyed by content-hash id.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub prompt: String,
    pub image_path: String,
    pub tags: Vec<String>,
    pub story_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub usage_count: u64,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

/// Deterministic content-hash id for a prompt+tag combination. Tags are
/// sorted first, so the same combination always maps to the same id
/// regardless of tag order.
pub fn generate_image_id(prompt: &str, tags: &[String]) -> String {
    let mut sorted = tags.to_vec();
    sorted.sort();
    let content = format!("{}_{}", prompt, sorted.join(","));
    blake3::hash(content.as_bytes()).to_hex()[..12].to_string()
}

pub struct MetadataStore {
    path: PathBuf,
    records: HashMap<String, ImageRecord>,
}

impl MetadataStore {
    /// Loads the metadata file at `path`; a missing or unreadable file
    /// yields an empty store rather than an error.
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();

        let records = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(err) => {
                    warn!("could not parse metadata file {}: {err}", path.display());
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        MetadataStore { path, records }
    }

    pub async fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)
            .context("failed to encode image metadata")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("write metadata: {}", self.path.display()))?;
        Ok(())
    }

    pub fn get(&self, image_id: &str) -> Option<&ImageRecord> {
        self.records.get(image_id)
    }

    pub fn contains(&self, image_id: &str) -> bool {
        self.records.contains_key(image_id)
    }

    pub fn insert(&mut self, image_id: String, record: ImageRecord) {
        self.records.insert(image_id, record);
    }

    /// Marks a cache hit: bumps the usage count and stamps `last_used`.
    pub fn record_use(&mut self, image_id: &str) {
        if let Some(record) = self.records.get_mut(image_id) {
            record.usage_count += 1;
            record.last_used = Some(Utc::now());
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_usage(&self) -> u64 {
        self.records.values().map(|r| r.usage_count).sum()
    }

    /// Removes records that are BOTH under-used and older than `cutoff`.
    /// A heavily reused old image survives; so does a rarely used recent one.
    pub fn sweep(&mut self, min_usage_count: u64, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| !(r.usage_count < min_usage_count && r.created_at < cutoff));
        before - self.records.len()
    }
}
