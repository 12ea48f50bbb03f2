// Database trait: backend-agnostic async interface for all DB operations.
//
// Implementor: SqliteDatabase (wraps rusqlite behind a tokio Mutex). The
// clustering pipeline, feedback intake and RICE scoring all take
// `&dyn Database`, so tests can substitute a store that fails on demand.
//
// The trait mirrors the queries.rs function signatures.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{Feature, FeedbackItem, User};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Users ---

    /// Create a user and return its id. Fails if the email is taken.
    async fn create_user(&self, name: &str, email: &str) -> Result<i64>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>>;

    // --- Feedback ---

    /// Store one feedback entry and return its id.
    async fn create_feedback(&self, user_id: i64, text: &str) -> Result<i64>;

    /// Store many feedback entries at once, returning how many were stored.
    async fn create_feedback_batch(&self, user_id: i64, texts: &[String]) -> Result<usize>;

    /// A user's feedback, newest first.
    async fn get_user_feedback(&self, user_id: i64, limit: Option<u32>)
        -> Result<Vec<FeedbackItem>>;

    async fn get_feedback_count(&self, user_id: i64) -> Result<i64>;

    /// Delete a feedback entry, only if the user owns it.
    async fn delete_feedback(&self, feedback_id: i64, user_id: i64) -> Result<()>;

    // --- Features ---

    /// Remove all of a user's features, returning how many were removed.
    async fn clear_user_features(&self, user_id: i64) -> Result<usize>;

    /// Insert an unscored feature and return its id.
    async fn create_feature(&self, user_id: i64, feature_name: &str, reach: i64) -> Result<i64>;

    /// All of a user's features, largest reach first.
    async fn get_user_features(&self, user_id: i64) -> Result<Vec<Feature>>;

    async fn get_feature(&self, feature_id: i64, user_id: i64) -> Result<Option<Feature>>;

    async fn get_feature_count(&self, user_id: i64) -> Result<i64>;

    /// Store RICE inputs and score for a feature the user owns.
    async fn update_feature_score(
        &self,
        feature_id: i64,
        user_id: i64,
        impact: i64,
        effort: i64,
        confidence: i64,
        rice_score: f64,
    ) -> Result<()>;

    /// Scored features, highest RICE score first.
    async fn get_prioritized_features(&self, user_id: i64, limit: Option<u32>)
        -> Result<Vec<Feature>>;
}
