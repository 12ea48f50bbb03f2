// Clustering subsystem: feedback text to feature candidates.
//
// normalize -> embeddings -> kmeans -> features. The pipeline module drives
// these in order and persists the result.

pub mod download;
pub mod embeddings;
pub mod error;
pub mod features;
pub mod kmeans;
pub mod normalize;
pub mod traits;

pub use error::{ClusterError, ModelError};
pub use traits::Embedder;
