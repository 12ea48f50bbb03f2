// Typed failures for the embedding and clustering stages.

use thiserror::Error;

/// The embedding model could not produce usable vectors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Loading or running the model failed. The inner error carries the cause.
    #[error("{0:#}")]
    Encode(anyhow::Error),

    #[error("embedding model returned {found} vectors for {expected} texts")]
    CountMismatch { expected: usize, found: usize },

    #[error("embedding {index} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
}

/// The clustering input was unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("no embeddings to cluster")]
    EmptyInput,

    #[error("embeddings have zero dimensions")]
    ZeroDimension,

    #[error("embedding {index} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("embedding {index} contains a non-finite value")]
    NonFinite { index: usize },

    #[error("{labels} cluster labels for {items} feedback items")]
    LabelCountMismatch { items: usize, labels: usize },
}
