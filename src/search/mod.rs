//! Semantic search subsystem.

pub mod index;

pub use index::{EmbeddingIndex, SearchHit};
