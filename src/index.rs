//! Flat vector index over prompt embeddings.
//!
//! Exact squared-Euclidean search over every entry; at the few-thousand-image
//! scale this cache runs at, brute force beats maintaining an ANN structure.
//! Persisted with bincode, whole-file overwrite on every save (single-writer
//! assumption). Entries are never removed: eviction of metadata leaves stale
//! ids behind, which callers must filter with a metadata existence check.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::warn;

/// Reserved id for the placeholder entry a fresh index is seeded with.
/// Filtered out of all search results and statistics.
pub const SENTINEL_ID: &str = "_bootstrap";

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("unsupported index format version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("index file corrupt: {0}")]
    Corrupt(#[from] Box<bincode::ErrorKind>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    image_id: String,
    embedding: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    entries: Vec<IndexEntry>,
}

/// A search result: candidate image id and its similarity in (0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub image_id: String,
    pub similarity: f64,
}

pub struct VectorIndex {
    path: PathBuf,
    entries: Vec<IndexEntry>,
}

fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum()
}

/// Converts a flat-index distance to a similarity score, monotonically
/// decreasing in distance.
pub fn distance_to_similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance)
}

fn decode_entries(bytes: &[u8]) -> Result<Vec<IndexEntry>, IndexError> {
    let persisted: PersistedIndex = bincode::deserialize(bytes)?;
    if persisted.version != FORMAT_VERSION {
        return Err(IndexError::VersionMismatch {
            found: persisted.version,
            expected: FORMAT_VERSION,
        });
    }
    Ok(persisted.entries)
}

impl VectorIndex {
    fn fresh(path: PathBuf) -> Self {
        VectorIndex {
            path,
            entries: vec![IndexEntry {
                image_id: SENTINEL_ID.to_string(),
                embedding: Vec::new(),
            }],
        }
    }

    /// Loads the persisted index at `path`, or seeds a fresh one with the
    /// sentinel entry. `allow_persisted` must be set to opt in to reading a
    /// previously saved index file; a corrupt or incompatible file degrades
    /// to a fresh index rather than blocking the cache.
    pub async fn load_or_create<P: AsRef<Path>>(path: P, allow_persisted: bool) -> Self {
        let path = path.as_ref().to_path_buf();

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return Self::fresh(path),
        };

        if !allow_persisted {
            warn!("persisted index at {} ignored (loading not allowed)", path.display());
            return Self::fresh(path);
        }

        match decode_entries(&bytes) {
            Ok(entries) => VectorIndex { path, entries },
            Err(err) => {
                warn!("could not load persisted index: {err}");
                Self::fresh(path)
            }
        }
    }

    /// Number of real (non-sentinel) entries.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.image_id != SENTINEL_ID)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, image_id: &str, embedding: Vec<f32>) {
        self.entries.push(IndexEntry {
            image_id: image_id.to_string(),
            embedding,
        });
    }

    /// Up to `top_k` nearest entries by descending similarity. The sentinel
    /// and dimension-mismatched entries never surface.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<Neighbor> {
        let mut hits: Vec<Neighbor> = self
            .entries
            .iter()
            .filter(|e| e.image_id != SENTINEL_ID && e.embedding.len() == query.len())
            .map(|e| Neighbor {
                image_id: e.image_id.clone(),
                similarity: distance_to_similarity(squared_l2(&e.embedding, query)),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }

    /// Write-through persistence, called after every insertion.
    pub async fn save(&self) -> Result<()> {
        let persisted = PersistedIndex {
            version: FORMAT_VERSION,
            entries: self.entries.clone(),
        };
        let bytes = bincode::serialize(&persisted).context("failed to encode vector index")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        fs::write(&self.path, &bytes)
            .await
            .with_context(|| format!("write index: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_decreases_with_distance() {
        assert!(distance_to_similarity(0.1) > distance_to_similarity(0.2));
        assert!(distance_to_similarity(0.0) <= 1.0);
        assert!(distance_to_similarity(1e9) > 0.0);
    }

    #[test]
    fn sentinel_never_surfaces_in_search_or_len() {
        let index = VectorIndex::fresh(PathBuf::from("unused.bin"));
        assert_eq!(index.len(), 0);
        assert!(index.search(&[1.0, 0.0], 3).is_empty());
    }

    #[test]
    fn search_orders_by_similarity_and_truncates() {
        let mut index = VectorIndex::fresh(PathBuf::from("unused.bin"));
        index.insert("far", vec![10.0, 0.0]);
        index.insert("near", vec![1.1, 0.0]);
        index.insert("nearest", vec![1.0, 0.0]);

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].image_id, "nearest");
        assert_eq!(hits[1].image_id, "near");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn dimension_mismatch_entries_are_skipped() {
        let mut index = VectorIndex::fresh(PathBuf::from("unused.bin"));
        index.insert("threed", vec![1.0, 0.0, 0.0]);

        assert!(index.search(&[1.0, 0.0], 3).is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vector_store").join("index.bin");

        let mut index = VectorIndex::load_or_create(&path, true).await;
        index.insert("abc123def456", vec![0.5, 0.5]);
        index.save().await.unwrap();

        let reloaded = VectorIndex::load_or_create(&path, true).await;
        assert_eq!(reloaded.len(), 1);
        let hits = reloaded.search(&[0.5, 0.5], 1);
        assert_eq!(hits[0].image_id, "abc123def456");
    }

    #[tokio::test]
    async fn persisted_index_ignored_without_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");

        let mut index = VectorIndex::load_or_create(&path, true).await;
        index.insert("abc123def456", vec![0.5, 0.5]);
        index.save().await.unwrap();

        let reloaded = VectorIndex::load_or_create(&path, false).await;
        assert_eq!(reloaded.len(), 0);
    }

    #[tokio::test]
    async fn unknown_version_degrades_to_fresh_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");

        let persisted = PersistedIndex {
            version: 99,
            entries: vec![IndexEntry {
                image_id: "abc123def456".to_string(),
                embedding: vec![1.0],
            }],
        };
        tokio::fs::write(&path, bincode::serialize(&persisted).unwrap())
            .await
            .unwrap();

        let index = VectorIndex::load_or_create(&path, true).await;
        assert_eq!(index.len(), 0);
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_fresh_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bin");
        tokio::fs::write(&path, b"not an index").await.unwrap();

        let index = VectorIndex::load_or_create(&path, true).await;
        assert_eq!(index.len(), 0);
    }
}
