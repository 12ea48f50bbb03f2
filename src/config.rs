use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::clustering::download::{self, DEFAULT_MODEL_NAME};
use crate::feedback::{IntakeSettings, MIN_FEEDBACK_LENGTH};
use crate::pipeline::ClusteringSettings;
use crate::scoring::ScoringSettings;

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy. Every
/// value has a default, so an empty environment is a valid configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// Sentence-transformers model identifier on HuggingFace
    pub model_name: String,
    /// Directory holding one subdirectory per downloaded model
    pub model_dir: PathBuf,
    pub default_cluster_count: usize,
    pub min_feedback_for_clustering: usize,
    pub max_feature_name_length: usize,
    pub max_feedback_per_user: usize,
    /// Percent, 0-100
    pub default_confidence: i64,
    pub top_features_count: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let model_dir = env::var("CHAFF_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| download::default_model_dir());

        Ok(Self {
            db_path: env::var("CHAFF_DB_PATH").unwrap_or_else(|_| "./chaff.db".to_string()),
            model_name: env::var("CHAFF_MODEL_NAME")
                .unwrap_or_else(|_| DEFAULT_MODEL_NAME.to_string()),
            model_dir,
            default_cluster_count: number_var("CHAFF_CLUSTER_COUNT", 5)?,
            min_feedback_for_clustering: number_var("CHAFF_MIN_FEEDBACK", 3)?,
            max_feature_name_length: number_var("CHAFF_MAX_FEATURE_NAME_LENGTH", 100)?,
            max_feedback_per_user: number_var("CHAFF_MAX_FEEDBACK_PER_USER", 2000)?,
            default_confidence: number_var("CHAFF_DEFAULT_CONFIDENCE", 80)?,
            top_features_count: number_var("CHAFF_TOP_FEATURES", 5)?,
        })
    }

    /// Directory holding the configured model's files.
    pub fn embedding_model_dir(&self) -> PathBuf {
        download::embedding_model_dir(&self.model_dir, &self.model_name)
    }

    /// Check that the embedding model has been downloaded.
    /// Call this before any operation that runs the clustering pipeline.
    pub fn require_model(&self) -> Result<()> {
        if !download::embedding_files_present(&self.model_dir, &self.model_name) {
            anyhow::bail!(
                "Embedding model files not found in {}\n\
                 Run `chaff download-model` to download them.",
                self.embedding_model_dir().display()
            );
        }
        Ok(())
    }

    pub fn clustering_settings(&self) -> ClusteringSettings {
        ClusteringSettings {
            cluster_count: self.default_cluster_count,
            min_feedback: self.min_feedback_for_clustering,
            max_feature_name_length: self.max_feature_name_length,
        }
    }

    pub fn scoring_settings(&self) -> ScoringSettings {
        ScoringSettings {
            default_confidence: self.default_confidence,
            top_features: self.top_features_count,
        }
    }

    pub fn intake_settings(&self) -> IntakeSettings {
        IntakeSettings {
            max_feedback_per_user: self.max_feedback_per_user,
            min_feedback_length: MIN_FEEDBACK_LENGTH,
        }
    }
}

/// Read a numeric variable, using `default` when it is unset.
fn number_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_number(name, env::var(name).ok().as_deref(), default)
}

fn parse_number<T>(name: &str, raw: Option<&str>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(value) => value
            .parse()
            .with_context(|| format!("{name} must be a number, got {value:?}")),
    }
}
