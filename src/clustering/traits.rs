// Embedder trait: swap-ready abstraction over the sentence embedding model.
//
// The pipeline only needs "texts in, one vector per text out". The default
// implementation is the process-wide ONNX model (SharedEmbedder); tests use
// small deterministic embedders instead.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for turning texts into dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of already-normalized texts, returning one vector per
    /// text in the same order. All vectors must share one dimension.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;
}
