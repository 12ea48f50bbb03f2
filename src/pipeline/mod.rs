// Pipelines that tie the stores and models together.

pub mod clustering;

pub use clustering::{ClusteringOutcome, ClusteringSettings, ClusteringStats, PipelineError};
