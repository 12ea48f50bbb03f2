// SqliteDatabase: rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Sync.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across other .await points.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{Feature, FeedbackItem, User};
use super::queries;
use super::traits::Database;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn create_user(&self, name: &str, email: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::create_user(&conn, name, email)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        queries::get_user_by_email(&conn, email)
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().await;
        queries::get_user_by_id(&conn, user_id)
    }

    async fn create_feedback(&self, user_id: i64, text: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::create_feedback(&conn, user_id, text)
    }

    async fn create_feedback_batch(&self, user_id: i64, texts: &[String]) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::create_feedback_batch(&conn, user_id, texts)
    }

    async fn get_user_feedback(
        &self,
        user_id: i64,
        limit: Option<u32>,
    ) -> Result<Vec<FeedbackItem>> {
        let conn = self.conn.lock().await;
        queries::get_user_feedback(&conn, user_id, limit)
    }

    async fn get_feedback_count(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::get_feedback_count(&conn, user_id)
    }

    async fn delete_feedback(&self, feedback_id: i64, user_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::delete_feedback(&conn, feedback_id, user_id)
    }

    async fn clear_user_features(&self, user_id: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::clear_user_features(&conn, user_id)
    }

    async fn create_feature(&self, user_id: i64, feature_name: &str, reach: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::create_feature(&conn, user_id, feature_name, reach)
    }

    async fn get_user_features(&self, user_id: i64) -> Result<Vec<Feature>> {
        let conn = self.conn.lock().await;
        queries::get_user_features(&conn, user_id)
    }

    async fn get_feature(&self, feature_id: i64, user_id: i64) -> Result<Option<Feature>> {
        let conn = self.conn.lock().await;
        queries::get_feature(&conn, feature_id, user_id)
    }

    async fn get_feature_count(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::get_feature_count(&conn, user_id)
    }

    async fn update_feature_score(
        &self,
        feature_id: i64,
        user_id: i64,
        impact: i64,
        effort: i64,
        confidence: i64,
        rice_score: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::update_feature_score(
            &conn, feature_id, user_id, impact, effort, confidence, rice_score,
        )
    }

    async fn get_prioritized_features(
        &self,
        user_id: i64,
        limit: Option<u32>,
    ) -> Result<Vec<Feature>> {
        let conn = self.conn.lock().await;
        queries::get_prioritized_features(&conn, user_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;

    async fn test_db() -> SqliteDatabase {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        SqliteDatabase::new(conn)
    }

    #[tokio::test]
    async fn test_trait_table_count() {
        let db = test_db().await;
        assert_eq!(db.table_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_trait_feedback_roundtrip() {
        let db = test_db().await;
        let user = db.create_user("Ada", "ada@example.com").await.unwrap();
        db.create_feedback(user, "please add dark mode").await.unwrap();
        db.create_feedback_batch(user, &["export to csv".to_string()])
            .await
            .unwrap();

        assert_eq!(db.get_feedback_count(user).await.unwrap(), 2);
        let feedback = db.get_user_feedback(user, None).await.unwrap();
        assert_eq!(feedback[0].text, "export to csv");
        assert!(feedback.iter().all(|f| f.user_id == user));
    }

    #[tokio::test]
    async fn test_trait_feature_replace_cycle() {
        let db = test_db().await;
        let user = db.create_user("Ada", "ada@example.com").await.unwrap();
        db.create_feature(user, "old feature", 2).await.unwrap();

        assert_eq!(db.clear_user_features(user).await.unwrap(), 1);
        db.create_feature(user, "dark mode", 3).await.unwrap();
        db.create_feature(user, "export", 5).await.unwrap();

        let features = db.get_user_features(user).await.unwrap();
        let names: Vec<&str> = features.iter().map(|f| f.feature_name.as_str()).collect();
        assert_eq!(names, vec!["export", "dark mode"]);
        assert!(features.iter().all(|f| !f.is_scored()));
    }

    #[tokio::test]
    async fn test_trait_score_and_prioritize() {
        let db = test_db().await;
        let user = db.create_user("Ada", "ada@example.com").await.unwrap();
        let id = db.create_feature(user, "dark mode", 10).await.unwrap();
        db.update_feature_score(id, user, 3, 2, 80, 12.0).await.unwrap();

        let feature = db.get_feature(id, user).await.unwrap().unwrap();
        assert_eq!(feature.impact, 3);
        assert_eq!(feature.effort, 2);
        assert!(feature.is_scored());

        let ranked = db.get_prioritized_features(user, Some(5)).await.unwrap();
        assert_eq!(ranked.len(), 1);
    }
}
