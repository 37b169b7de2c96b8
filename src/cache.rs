//! The semantic image cache: decides per generation request whether to reuse
//! an existing image or force a fresh one.
//!
//! Nothing in here is fatal to the caller's pipeline. Embedding failures,
//! index load failures, and malformed prompts all degrade to a cache miss;
//! the worst case is "the cache never helps".

use crate::api::embeddings::Embedder;
use crate::config::CacheSettings;
use crate::index::VectorIndex;
use crate::store::{generate_image_id, ImageRecord, MetadataStore};
use crate::{logi, logok, logw};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

const METADATA_FILE: &str = "image_metadata.json";
const INDEX_FILE: &str = "index.bin";

/// Text projected into vector space: prompt plus tags joined by spaces.
pub fn search_text(prompt: &str, tags: &[String]) -> String {
    format!("{} {}", prompt, tags.join(" "))
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_images: usize,
    pub total_usage: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub vector_store_size: usize,
}

struct Candidate {
    image_id: String,
    similarity: f64,
    created_at: DateTime<Utc>,
}

/// One cache per process, constructed once at startup and passed by
/// reference into every collaborator that needs it.
pub struct ImageCache {
    settings: CacheSettings,
    store: MetadataStore,
    index: VectorIndex,
    embedder: Option<Arc<dyn Embedder>>,
}

impl ImageCache {
    /// Opens (or initializes) the on-disk cache under `settings.store_path`.
    /// With no embedder configured, lookups always miss but registration
    /// still records metadata.
    pub async fn open(settings: CacheSettings, embedder: Option<Arc<dyn Embedder>>) -> Self {
        let root = Path::new(&settings.store_path);
        let store = MetadataStore::load_or_create(root.join(METADATA_FILE)).await;
        let index = VectorIndex::load_or_create(
            root.join("vector_store").join(INDEX_FILE),
            settings.allow_persisted_index,
        )
        .await;

        if embedder.is_none() {
            logw("No embedding credentials configured; semantic search disabled");
        }

        ImageCache {
            settings,
            store,
            index,
            embedder,
        }
    }

    /// Candidates above the similarity threshold whose metadata still
    /// exists. Eviction never purges the index, so the existence check here
    /// is what keeps stale ids from surfacing as hits.
    async fn similar_images(&self, prompt: &str, tags: &[String]) -> Vec<Candidate> {
        let embedder = match &self.embedder {
            Some(embedder) => embedder,
            None => return Vec::new(),
        };

        let query = match embedder.embed(&search_text(prompt, tags)).await {
            Ok(query) => query,
            Err(err) => {
                logw(format!("Similarity search failed: {err}"));
                return Vec::new();
            }
        };

        self.index
            .search(&query, self.settings.top_k)
            .into_iter()
            .filter(|n| n.similarity >= self.settings.similarity_threshold)
            .filter_map(|n| {
                self.store.get(&n.image_id).map(|record| Candidate {
                    image_id: n.image_id.clone(),
                    similarity: n.similarity,
                    created_at: record.created_at,
                })
            })
            .collect()
    }

    /// Returns `(path, true)` when a sufficiently similar image can be
    /// reused, or `(fresh_filename, false)` when the caller should generate
    /// a new one and register it back with [`ImageCache::add_image`].
    pub async fn find_or_generate_image(
        &mut self,
        prompt: &str,
        tags: &[String],
        story_type: Option<&str>,
    ) -> (String, bool) {
        // Deliberate anti-repetition device: sometimes skip the cache so
        // consecutive videos do not reuse the same handful of backgrounds.
        if self.settings.skip_probability > 0.0
            && rand::thread_rng().gen_range(0.0..1.0) < self.settings.skip_probability
        {
            logi("Cache bypassed for variety");
            return (fresh_filename(prompt, story_type), false);
        }

        let candidates = self.similar_images(prompt, tags).await;

        // Highest similarity wins; ties go to the most recently created.
        let best = candidates.into_iter().max_by(|a, b| {
            a.similarity
                .partial_cmp(&b.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        if let Some(best) = best {
            self.store.record_use(&best.image_id);
            if let Err(err) = self.store.save().await {
                logw(format!("Could not persist usage update: {err}"));
            }

            if let Some(record) = self.store.get(&best.image_id) {
                logok(format!(
                    "Using existing image: {} (similarity: {:.3})",
                    best.image_id, best.similarity
                ));
                return (record.image_path.clone(), true);
            }
        }

        let filename = fresh_filename(prompt, story_type);
        logi(format!("No similar image found, will generate: {filename}"));
        (filename, false)
    }

    /// Registers a freshly generated image. Idempotent: an existing
    /// prompt+tag combination returns its id untouched, and registration is
    /// never counted as a use. Index insertion is best-effort; metadata
    /// persistence must succeed.
    pub async fn add_image(
        &mut self,
        prompt: &str,
        image_path: &str,
        tags: &[String],
        story_type: Option<&str>,
    ) -> Result<String> {
        let image_id = generate_image_id(prompt, tags);

        if self.store.contains(&image_id) {
            logi(format!("Image already exists: {image_id}"));
            return Ok(image_id);
        }

        if let Some(embedder) = &self.embedder {
            match embedder.embed(&search_text(prompt, tags)).await {
                Ok(embedding) => {
                    self.index.insert(&image_id, embedding);
                    if let Err(err) = self.index.save().await {
                        logw(format!("Could not persist vector index: {err}"));
                    }
                }
                Err(err) => {
                    // Record stays metadata-only and unsearchable.
                    logw(format!("Index insertion skipped: {err}"));
                }
            }
        }

        self.store.insert(
            image_id.clone(),
            ImageRecord {
                prompt: prompt.to_string(),
                image_path: image_path.to_string(),
                tags: tags.to_vec(),
                story_type: story_type.map(|s| s.to_string()),
                created_at: Utc::now(),
                usage_count: 1,
                last_used: None,
            },
        );
        self.store.save().await?;

        logok(format!("Added image to cache: {image_id}"));
        Ok(image_id)
    }

    /// Evicts records that are both under-used and aged. The vector index is
    /// not rebuilt; stale ids are filtered out at lookup time.
    pub async fn cleanup(&mut self, min_usage_count: u64, days_old: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(days_old);
        let removed = self.store.sweep(min_usage_count, cutoff);
        self.store.save().await?;
        logi(format!("Cleaned up {removed} unused images"));
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        let total_images = self.store.len();
        let total_usage = self.store.total_usage();
        let cache_hits = total_usage.saturating_sub(total_images as u64);

        CacheStats {
            total_images,
            total_usage,
            cache_hits,
            cache_hit_rate: cache_hits as f64 / total_usage.max(1) as f64,
            vector_store_size: self.index.len(),
        }
    }
}

fn fresh_filename(prompt: &str, story_type: Option<&str>) -> String {
    let safe_prompt: String = prompt
        .chars()
        .take(30)
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim_end()
        .replace(' ', "_");

    let suffix: u32 = rand::thread_rng().gen_range(0..=u32::MAX);
    format!(
        "{}_{}_{:08x}",
        story_type.unwrap_or("story"),
        safe_prompt,
        suffix
    )
}
