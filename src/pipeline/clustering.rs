// Clustering pipeline: a user's feedback in, a fresh feature set out.
//
// FETCH -> CHECK_MINIMUM -> EMBED -> CLUSTER -> AGGREGATE -> PERSIST.
// Each stage returns a typed error; `run` is the single place where errors
// turn into a failure outcome, so callers never see an Err.
//
// Persisting replaces the user's previous features wholesale. A single
// feature that fails to insert is logged and skipped rather than aborting
// the run, and the reported count reflects only what was stored.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::clustering::embeddings::generate_embeddings;
use crate::clustering::features::{aggregate, FeatureCandidate};
use crate::clustering::kmeans;
use crate::clustering::{ClusterError, Embedder, ModelError};
use crate::db::models::FeedbackItem;
use crate::db::Database;

/// Values the pipeline reads from configuration.
#[derive(Debug, Clone)]
pub struct ClusteringSettings {
    /// Requested number of clusters (clamped to the feedback count)
    pub cluster_count: usize,
    /// Fewest feedback entries a run will accept
    pub min_feedback: usize,
    /// Feature names longer than this are truncated
    pub max_feature_name_length: usize,
}

impl Default for ClusteringSettings {
    fn default() -> Self {
        Self {
            cluster_count: 5,
            min_feedback: 3,
            max_feature_name_length: 100,
        }
    }
}

/// Why the user's feedback cannot be clustered yet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("No feedback found. Please add feedback first.")]
    NoFeedback,

    #[error("Not enough feedback to run clustering. Need at least {min} items.")]
    NotEnoughFeedback { min: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Failed to generate embeddings")]
    EmptyEmbeddings,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Clustering(#[from] ClusterError),

    #[error("{0:#}")]
    Persistence(anyhow::Error),
}

impl PipelineError {
    /// The message shown to the user when a run fails.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Input(e) => e.to_string(),
            PipelineError::EmptyEmbeddings => self.to_string(),
            other => format!("Error during clustering: {other}"),
        }
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusteringOutcome {
    pub success: bool,
    pub message: String,
    /// Features actually stored
    pub feature_count: usize,
}

impl ClusteringOutcome {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            feature_count: 0,
        }
    }
}

/// Whether a user has enough feedback to cluster, and what exists already.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusteringStats {
    pub feedback_count: i64,
    pub feature_count: i64,
    pub can_cluster: bool,
    pub min_required: usize,
    pub has_features: bool,
}

/// Cluster a user's feedback into features, replacing any existing ones.
pub async fn run(
    db: &dyn Database,
    embedder: &dyn Embedder,
    settings: &ClusteringSettings,
    user_id: i64,
) -> ClusteringOutcome {
    match run_stages(db, embedder, settings, user_id).await {
        Ok(stored) => {
            info!(user_id, features = stored, "Clustering complete");
            ClusteringOutcome {
                success: true,
                message: format!("Successfully created {stored} feature clusters"),
                feature_count: stored,
            }
        }
        Err(e) => {
            warn!(user_id, error = %e, "Clustering failed");
            ClusteringOutcome::failure(e.user_message())
        }
    }
}

async fn run_stages(
    db: &dyn Database,
    embedder: &dyn Embedder,
    settings: &ClusteringSettings,
    user_id: i64,
) -> Result<usize, PipelineError> {
    let feedback = fetch_feedback(db, user_id).await?;
    check_minimum(feedback.len(), settings.min_feedback)?;
    info!(user_id, items = feedback.len(), "Clustering feedback");

    let texts: Vec<String> = feedback.iter().map(|item| item.text.clone()).collect();
    let embeddings = match generate_embeddings(embedder, &texts).await {
        Ok(vectors) if vectors.is_empty() => return Err(PipelineError::EmptyEmbeddings),
        Err(ModelError::CountMismatch { found: 0, .. }) => {
            return Err(PipelineError::EmptyEmbeddings)
        }
        result => result?,
    };

    let labels = kmeans::cluster(&embeddings, settings.cluster_count)?;
    let candidates = aggregate(&feedback, &labels, settings.max_feature_name_length)?;
    info!(user_id, clusters = candidates.len(), "Feedback clustered");

    persist(db, user_id, &candidates).await
}

async fn fetch_feedback(db: &dyn Database, user_id: i64) -> Result<Vec<FeedbackItem>, PipelineError> {
    let feedback = db
        .get_user_feedback(user_id, None)
        .await
        .map_err(PipelineError::Persistence)?;
    if feedback.is_empty() {
        return Err(InputError::NoFeedback.into());
    }
    Ok(feedback)
}

fn check_minimum(found: usize, min: usize) -> Result<(), InputError> {
    if found < min {
        return Err(InputError::NotEnoughFeedback { min, found });
    }
    Ok(())
}

/// Replace the user's features with `candidates`. Returns how many were stored.
async fn persist(
    db: &dyn Database,
    user_id: i64,
    candidates: &[FeatureCandidate],
) -> Result<usize, PipelineError> {
    let cleared = db
        .clear_user_features(user_id)
        .await
        .map_err(PipelineError::Persistence)?;
    if cleared > 0 {
        info!(user_id, cleared, "Removed previous features");
    }

    let mut stored = 0;
    for candidate in candidates {
        match db
            .create_feature(user_id, &candidate.feature_name, candidate.reach as i64)
            .await
        {
            Ok(_) => stored += 1,
            Err(e) => {
                warn!(
                    user_id,
                    cluster_id = candidate.cluster_id,
                    feature = candidate.feature_name,
                    error = %e,
                    "Failed to store feature, skipping"
                );
            }
        }
    }

    Ok(stored)
}

/// Report whether clustering can run for the user.
pub async fn stats(
    db: &dyn Database,
    settings: &ClusteringSettings,
    user_id: i64,
) -> anyhow::Result<ClusteringStats> {
    let feedback_count = db.get_feedback_count(user_id).await?;
    let feature_count = db.get_feature_count(user_id).await?;

    Ok(ClusteringStats {
        feedback_count,
        feature_count,
        can_cluster: feedback_count >= settings.min_feedback as i64,
        min_required: settings.min_feedback,
        has_features: feature_count > 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_minimum() {
        assert!(check_minimum(3, 3).is_ok());
        assert_eq!(
            check_minimum(2, 3),
            Err(InputError::NotEnoughFeedback { min: 3, found: 2 })
        );
    }

    #[test]
    fn test_input_messages_are_shown_verbatim() {
        let err = PipelineError::from(InputError::NoFeedback);
        assert_eq!(
            err.user_message(),
            "No feedback found. Please add feedback first."
        );

        let err = PipelineError::from(InputError::NotEnoughFeedback { min: 5, found: 1 });
        assert_eq!(
            err.user_message(),
            "Not enough feedback to run clustering. Need at least 5 items."
        );
    }

    #[test]
    fn test_empty_embeddings_message() {
        assert_eq!(
            PipelineError::EmptyEmbeddings.user_message(),
            "Failed to generate embeddings"
        );
    }

    #[test]
    fn test_other_errors_are_prefixed() {
        let err = PipelineError::from(ClusterError::EmptyInput);
        assert_eq!(
            err.user_message(),
            "Error during clustering: no embeddings to cluster"
        );

        let err = PipelineError::Persistence(anyhow::anyhow!("disk full"));
        assert_eq!(err.user_message(), "Error during clustering: disk full");
    }

    #[test]
    fn test_default_settings() {
        let settings = ClusteringSettings::default();
        assert_eq!(settings.cluster_count, 5);
        assert_eq!(settings.min_feedback, 3);
        assert_eq!(settings.max_feature_name_length, 100);
    }
}
