// Data models: Rust structs that map to database rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so the clustering and scoring modules can use
// them without depending on rusqlite directly.

use serde::{Deserialize, Serialize};

/// An owner of feedback. Identity only; there is no authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

/// A single piece of free-text product feedback.
///
/// Immutable once stored; the only lifecycle operation is deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: i64,
    pub user_id: i64,
    pub text: String,
    pub created_at: String,
}

/// A persisted feature: one cluster of feedback, plus its RICE inputs.
///
/// Clustering fills `feature_name` and `reach`; scoring fills the rest.
/// Unscored features carry impact/effort/rice_score of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: i64,
    pub feature_name: String,
    pub reach: i64,
    pub impact: i64,
    pub confidence: i64,
    pub effort: i64,
    pub rice_score: f64,
    pub created_at: String,
}

impl Feature {
    pub fn is_scored(&self) -> bool {
        self.rice_score > 0.0
    }
}
