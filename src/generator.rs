//! Cache-aware image generation for the video-assembly pipeline.

use crate::cache::ImageCache;
use crate::tags::extract_tags;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Seam over the actual image renderer so the pipeline can be exercised
/// without paying for generation.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Renders `prompt` into an asset named `filename` (extension chosen by
    /// the implementation) and returns the written path.
    async fn generate(&self, prompt: &str, filename: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct BackgroundImage {
    pub prompt: String,
    pub image_path: String,
    pub reused: bool,
}

/// Checks the cache first and only renders on a miss; fresh images are
/// registered back into the cache before returning.
pub async fn generate_cached_image(
    cache: &mut ImageCache,
    generator: &dyn ImageGenerator,
    prompt: &str,
    tags: &[String],
    story_type: Option<&str>,
) -> Result<(String, bool)> {
    let (path_or_name, reused) = cache.find_or_generate_image(prompt, tags, story_type).await;
    if reused {
        return Ok((path_or_name, true));
    }

    let generated = generator
        .generate(prompt, &path_or_name)
        .await
        .with_context(|| format!("image generation failed for: {prompt}"))?;
    let generated = generated.to_string_lossy().into_owned();

    cache.add_image(prompt, &generated, tags, story_type).await?;
    Ok((generated, false))
}

/// Runs one story's background-image plan through the cache. Failed items
/// are skipped with a warning rather than aborting the batch.
pub async fn generate_background_images(
    cache: &mut ImageCache,
    generator: &dyn ImageGenerator,
    prompts: &[String],
    story_type: &str,
) -> Vec<BackgroundImage> {
    if prompts.is_empty() {
        return Vec::new();
    }

    logi(format!(
        "Generating {} background images for {story_type} story",
        prompts.len()
    ));

    let mut out = Vec::with_capacity(prompts.len());
    for (i, prompt) in prompts.iter().enumerate() {
        let tags = extract_tags(prompt);

        match generate_cached_image(cache, generator, prompt, &tags, Some(story_type)).await {
            Ok((image_path, reused)) => {
                logok(format!(
                    "Image {}/{}: {} ({})",
                    i + 1,
                    prompts.len(),
                    image_path,
                    if reused { "cached" } else { "generated" }
                ));
                out.push(BackgroundImage {
                    prompt: prompt.clone(),
                    image_path,
                    reused,
                });
            }
            Err(err) => {
                logw(format!("Skipping background image {}: {err:#}", i + 1));
            }
        }
    }

    logok(format!(
        "Background images ready: {}/{}",
        out.len(),
        prompts.len()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::embeddings::Embedder;
    use crate::cache::search_text;
    use crate::config::CacheSettings;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    const HAUNTED: &str = "A dark haunted house with eerie shadows at midnight";
    const MANSION: &str = "Spooky haunted mansion at night";

    struct StubEmbedder {
        vectors: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no stub vector for: {text}"))
        }
    }

    struct StubGenerator {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageGenerator for StubGenerator {
        async fn generate(&self, _prompt: &str, filename: &str) -> Result<PathBuf> {
            self.calls.lock().unwrap().push(filename.to_string());
            Ok(PathBuf::from(format!("generated_images/{filename}.jpg")))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl ImageGenerator for FailingGenerator {
        async fn generate(&self, _prompt: &str, _filename: &str) -> Result<PathBuf> {
            anyhow::bail!("renderer offline")
        }
    }

    fn stub_embedder() -> Arc<dyn Embedder> {
        let mut vectors = HashMap::new();
        vectors.insert(search_text(HAUNTED, &extract_tags(HAUNTED)), vec![1.0, 0.0]);
        vectors.insert(search_text(MANSION, &extract_tags(MANSION)), vec![1.05, 0.0]);
        Arc::new(StubEmbedder { vectors })
    }

    async fn open_cache(dir: &Path) -> ImageCache {
        let settings = CacheSettings {
            similarity_threshold: 0.65,
            skip_probability: 0.0,
            store_path: dir.to_string_lossy().into_owned(),
            ..CacheSettings::default()
        };
        ImageCache::open(settings, Some(stub_embedder())).await
    }

    #[tokio::test]
    async fn batch_reuses_similar_backgrounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open_cache(dir.path()).await;
        let generator = StubGenerator {
            calls: Mutex::new(Vec::new()),
        };

        let prompts = vec![HAUNTED.to_string(), MANSION.to_string()];
        let images = generate_background_images(&mut cache, &generator, &prompts, "horror").await;

        assert_eq!(images.len(), 2);
        assert!(!images[0].reused);
        assert!(images[1].reused);
        assert_eq!(images[0].image_path, images[1].image_path);
        // Only the first prompt paid for a render.
        assert_eq!(generator.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn miss_registers_generated_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open_cache(dir.path()).await;
        let generator = StubGenerator {
            calls: Mutex::new(Vec::new()),
        };

        let tags = extract_tags(HAUNTED);
        let (path, reused) =
            generate_cached_image(&mut cache, &generator, HAUNTED, &tags, Some("horror"))
                .await
                .unwrap();

        assert!(!reused);
        assert!(path.starts_with("generated_images/horror_"));
        assert_eq!(cache.stats().total_images, 1);
    }

    #[tokio::test]
    async fn generator_failure_skips_item_and_leaves_cache_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open_cache(dir.path()).await;

        let prompts = vec![HAUNTED.to_string()];
        let images =
            generate_background_images(&mut cache, &FailingGenerator, &prompts, "horror").await;

        assert!(images.is_empty());
        assert_eq!(cache.stats().total_images, 0);
    }

    #[tokio::test]
    async fn empty_plan_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = open_cache(dir.path()).await;
        let generator = StubGenerator {
            calls: Mutex::new(Vec::new()),
        };

        let images = generate_background_images(&mut cache, &generator, &[], "horror").await;
        assert!(images.is_empty());
        assert!(generator.calls.lock().unwrap().is_empty());
    }
}
