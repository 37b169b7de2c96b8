use ai_story_shorts::api::embeddings::{Embedder, OpenAiEmbeddings};
use ai_story_shorts::api::images::OpenAiImages;
use ai_story_shorts::cache::ImageCache;
use ai_story_shorts::config::Config;
use ai_story_shorts::generator::generate_cached_image;
use ai_story_shorts::init;
use ai_story_shorts::tags::extract_tags;
use anyhow::Result;
use std::sync::Arc;

const CONFIG_PATH: &str = "config.json";

fn print_usage() {
    eprintln!("usage: ai-story-shorts <command>");
    eprintln!("  stats                          print cache statistics");
    eprintln!("  cleanup [min_usage] [days]     evict under-used aged images (default 1 30)");
    eprintln!("  generate <prompt> [story_type] render a background image through the cache");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match args.first() {
        Some(cmd) => cmd.as_str(),
        None => {
            print_usage();
            std::process::exit(2);
        }
    };

    // A missing config file still allows stats and cleanup; the cache then
    // runs without semantic search.
    let cfg = match Config::load(CONFIG_PATH).await {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("[WARN] {err:#}; using defaults");
            Config::default()
        }
    };

    init::ensure_directories(&cfg.cache).await?;

    let embedder =
        OpenAiEmbeddings::from_config(&cfg)?.map(|e| Arc::new(e) as Arc<dyn Embedder>);
    let mut cache = ImageCache::open(cfg.cache.clone(), embedder).await;

    match command {
        "stats" => {
            let stats = cache.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "cleanup" => {
            let min_usage: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
            let days_old: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(30);
            let removed = cache.cleanup(min_usage, days_old).await?;
            println!("removed {removed} images");
        }
        "generate" => {
            let prompt = match args.get(1) {
                Some(prompt) => prompt.as_str(),
                None => {
                    print_usage();
                    std::process::exit(2);
                }
            };
            let story_type = args.get(2).map(|s| s.as_str()).unwrap_or("horror");

            let generator = OpenAiImages::from_config(&cfg)?;
            let tags = extract_tags(prompt);
            let (path, reused) =
                generate_cached_image(&mut cache, &generator, prompt, &tags, Some(story_type))
                    .await?;
            println!("{path} ({})", if reused { "cached" } else { "generated" });
        }
        _ => {
            print_usage();
            std::process::exit(2);
        }
    }

    Ok(())
}
