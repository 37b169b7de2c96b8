pub mod embeddings;
pub mod images;
