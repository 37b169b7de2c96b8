use crate::config::CacheSettings;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

pub async fn ensure_directories(settings: &CacheSettings) -> Result<()> {
    let dirs: [PathBuf; 3] = [
        PathBuf::from(&settings.store_path),
        Path::new(&settings.store_path).join("vector_store"),
        PathBuf::from(&settings.images_dir),
    ];

    for dir in dirs {
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            eprintln!("[INFO] Created directory: {}", dir.display());
        }
    }
    Ok(())
}
