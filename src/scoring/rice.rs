// RICE prioritization.
//
// RICE = Reach x Impact x Confidence / Effort, where reach comes from the
// clustering run (how many feedback entries a feature covers) and the other
// three are supplied by whoever scores the feature.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::db::models::Feature;
use crate::db::Database;

/// RICE score at or above which a feature is high priority.
pub const HIGH_PRIORITY_THRESHOLD: f64 = 50.0;
/// RICE score at or above which a feature is medium priority.
pub const MEDIUM_PRIORITY_THRESHOLD: f64 = 20.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoreError {
    #[error("Impact must be between 1 and 5")]
    Impact,

    #[error("Effort must be between 1 and 5")]
    Effort,

    #[error("Confidence must be between 0 and 100")]
    Confidence,

    #[error("Feature not found or unauthorized")]
    FeatureNotFound,
}

/// Values scoring reads from configuration.
#[derive(Debug, Clone)]
pub struct ScoringSettings {
    /// Confidence used when the scorer doesn't give one (percent)
    pub default_confidence: i64,
    /// How many features the report's top list shows
    pub top_features: u32,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            default_confidence: 80,
            top_features: 5,
        }
    }
}

/// Priority bucket for a RICE score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
}

impl PriorityLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= HIGH_PRIORITY_THRESHOLD => PriorityLevel::High,
            s if s >= MEDIUM_PRIORITY_THRESHOLD => PriorityLevel::Medium,
            _ => PriorityLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Low => "Low",
            PriorityLevel::Medium => "Medium",
            PriorityLevel::High => "High",
        }
    }
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compute a RICE score rounded to two decimals. Zero effort scores 0.
pub fn calculate_rice_score(reach: i64, impact: i64, confidence: i64, effort: i64) -> f64 {
    if effort == 0 {
        return 0.0;
    }
    let raw = reach as f64 * impact as f64 * (confidence as f64 / 100.0) / effort as f64;
    (raw * 100.0).round() / 100.0
}

pub fn validate_impact(impact: i64) -> Result<(), ScoreError> {
    if (1..=5).contains(&impact) {
        Ok(())
    } else {
        Err(ScoreError::Impact)
    }
}

pub fn validate_effort(effort: i64) -> Result<(), ScoreError> {
    if (1..=5).contains(&effort) {
        Ok(())
    } else {
        Err(ScoreError::Effort)
    }
}

pub fn validate_confidence(confidence: i64) -> Result<(), ScoreError> {
    if (0..=100).contains(&confidence) {
        Ok(())
    } else {
        Err(ScoreError::Confidence)
    }
}

/// Score counts across a user's features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoringStats {
    pub total_features: usize,
    pub scored_count: usize,
    pub unscored_count: usize,
    pub has_scored: bool,
    pub all_scored: bool,
}

/// Score one of the user's features and persist the result.
///
/// Reach is taken from the stored feature. `confidence` falls back to the
/// configured default. Returns the computed RICE score.
pub async fn score_feature(
    db: &dyn Database,
    settings: &ScoringSettings,
    feature_id: i64,
    user_id: i64,
    impact: i64,
    effort: i64,
    confidence: Option<i64>,
) -> anyhow::Result<f64> {
    let confidence = confidence.unwrap_or(settings.default_confidence);
    validate_impact(impact)?;
    validate_effort(effort)?;
    validate_confidence(confidence)?;

    let feature = db
        .get_feature(feature_id, user_id)
        .await?
        .ok_or(ScoreError::FeatureNotFound)?;

    let rice = calculate_rice_score(feature.reach, impact, confidence, effort);
    db.update_feature_score(feature_id, user_id, impact, effort, confidence, rice)
        .await?;

    info!(
        user_id,
        feature_id,
        reach = feature.reach,
        impact,
        effort,
        confidence,
        rice,
        "Feature scored"
    );
    Ok(rice)
}

/// Highest-scoring features, `count` of them (or the configured number).
pub async fn top_features(
    db: &dyn Database,
    settings: &ScoringSettings,
    user_id: i64,
    count: Option<u32>,
) -> anyhow::Result<Vec<Feature>> {
    db.get_prioritized_features(user_id, Some(count.unwrap_or(settings.top_features)))
        .await
}

/// Features that have not been given a RICE score yet.
pub async fn unscored_features(db: &dyn Database, user_id: i64) -> anyhow::Result<Vec<Feature>> {
    let features = db.get_user_features(user_id).await?;
    Ok(features.into_iter().filter(|f| !f.is_scored()).collect())
}

pub async fn scoring_stats(db: &dyn Database, user_id: i64) -> anyhow::Result<ScoringStats> {
    let features = db.get_user_features(user_id).await?;
    let total_features = features.len();
    let scored_count = features.iter().filter(|f| f.is_scored()).count();
    let unscored_count = total_features - scored_count;

    Ok(ScoringStats {
        total_features,
        scored_count,
        unscored_count,
        has_scored: scored_count > 0,
        all_scored: unscored_count == 0,
    })
}
