// Database queries: CRUD operations for all tables.
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.
// Mutating queries that take a user id also filter on it, so one user can
// never touch another user's rows.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{Feature, FeedbackItem, User};

// --- Users ---

/// Create a user and return its id. Emails are unique.
pub fn create_user(conn: &Connection, name: &str, email: &str) -> Result<i64> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
        params![email],
        |row| row.get(0),
    )?;
    if exists {
        anyhow::bail!("Email already exists");
    }

    conn.execute(
        "INSERT INTO users (name, email) VALUES (?1, ?2)",
        params![name, email],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let mut stmt =
        conn.prepare("SELECT id, name, email, created_at FROM users WHERE email = ?1")?;
    let user = stmt.query_row(params![email], user_from_row).optional()?;
    Ok(user)
}

pub fn get_user_by_id(conn: &Connection, user_id: i64) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT id, name, email, created_at FROM users WHERE id = ?1")?;
    let user = stmt.query_row(params![user_id], user_from_row).optional()?;
    Ok(user)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}

// --- Feedback ---

/// Store a single feedback entry (trimmed) and return its id.
pub fn create_feedback(conn: &Connection, user_id: i64, text: &str) -> Result<i64> {
    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("Feedback text cannot be empty");
    }

    conn.execute(
        "INSERT INTO feedback (user_id, feedback_text) VALUES (?1, ?2)",
        params![user_id, text],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Store many feedback entries in one transaction. Blank entries are
/// skipped; returns the number of rows inserted.
pub fn create_feedback_batch(conn: &Connection, user_id: i64, texts: &[String]) -> Result<usize> {
    let valid: Vec<&str> = texts
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();

    if valid.is_empty() {
        anyhow::bail!("No valid feedback to import");
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO feedback (user_id, feedback_text) VALUES (?1, ?2)")?;
        for text in &valid {
            stmt.execute(params![user_id, text])?;
        }
    }
    tx.commit()?;

    Ok(valid.len())
}

/// All feedback for a user, newest first. Rows created within the same
/// second fall back to id order so the sequence is stable across runs.
pub fn get_user_feedback(
    conn: &Connection,
    user_id: i64,
    limit: Option<u32>,
) -> Result<Vec<FeedbackItem>> {
    // SQLite treats a negative LIMIT as "no limit"
    let limit = limit.map(i64::from).unwrap_or(-1);
    let mut stmt = conn.prepare(
        "SELECT id, user_id, feedback_text, created_at
         FROM feedback
         WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![user_id, limit], |row| {
        Ok(FeedbackItem {
            id: row.get(0)?,
            user_id: row.get(1)?,
            text: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }
    Ok(items)
}

pub fn get_feedback_count(conn: &Connection, user_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM feedback WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Delete a feedback entry owned by the user.
pub fn delete_feedback(conn: &Connection, feedback_id: i64, user_id: i64) -> Result<()> {
    let deleted = conn.execute(
        "DELETE FROM feedback WHERE id = ?1 AND user_id = ?2",
        params![feedback_id, user_id],
    )?;
    if deleted == 0 {
        anyhow::bail!("Feedback not found or unauthorized");
    }
    Ok(())
}

// --- Features ---

/// Delete every feature for a user. Returns how many were removed.
pub fn clear_user_features(conn: &Connection, user_id: i64) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM features WHERE user_id = ?1", params![user_id])?;
    Ok(deleted)
}

/// Insert an unscored feature and return its id.
pub fn create_feature(conn: &Connection, user_id: i64, feature_name: &str, reach: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO features (user_id, feature_name, reach) VALUES (?1, ?2, ?3)",
        params![user_id, feature_name, reach],
    )?;
    Ok(conn.last_insert_rowid())
}

const FEATURE_COLUMNS: &str =
    "id, feature_name, reach, impact, confidence, effort, rice_score, created_at";

fn feature_from_row(row: &Row<'_>) -> rusqlite::Result<Feature> {
    Ok(Feature {
        id: row.get(0)?,
        feature_name: row.get(1)?,
        reach: row.get(2)?,
        impact: row.get(3)?,
        confidence: row.get(4)?,
        effort: row.get(5)?,
        rice_score: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// All features for a user, largest reach first.
pub fn get_user_features(conn: &Connection, user_id: i64) -> Result<Vec<Feature>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FEATURE_COLUMNS} FROM features WHERE user_id = ?1 ORDER BY reach DESC, id ASC"
    ))?;
    let rows = stmt.query_map(params![user_id], feature_from_row)?;

    let mut features = Vec::new();
    for row in rows {
        features.push(row?);
    }
    Ok(features)
}

pub fn get_feature(conn: &Connection, feature_id: i64, user_id: i64) -> Result<Option<Feature>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FEATURE_COLUMNS} FROM features WHERE id = ?1 AND user_id = ?2"
    ))?;
    let feature = stmt
        .query_row(params![feature_id, user_id], feature_from_row)
        .optional()?;
    Ok(feature)
}

pub fn get_feature_count(conn: &Connection, user_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM features WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Record RICE inputs and the computed score for a feature the user owns.
pub fn update_feature_score(
    conn: &Connection,
    feature_id: i64,
    user_id: i64,
    impact: i64,
    effort: i64,
    confidence: i64,
    rice_score: f64,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE features
         SET impact = ?1, effort = ?2, confidence = ?3, rice_score = ?4
         WHERE id = ?5 AND user_id = ?6",
        params![impact, effort, confidence, rice_score, feature_id, user_id],
    )?;
    if updated == 0 {
        anyhow::bail!("Feature not found or unauthorized");
    }
    Ok(())
}

/// Scored features only, highest RICE score first.
pub fn get_prioritized_features(
    conn: &Connection,
    user_id: i64,
    limit: Option<u32>,
) -> Result<Vec<Feature>> {
    let limit = limit.map(i64::from).unwrap_or(-1);
    let mut stmt = conn.prepare(&format!(
        "SELECT {FEATURE_COLUMNS}
         FROM features
         WHERE user_id = ?1 AND rice_score > 0
         ORDER BY rice_score DESC, id ASC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![user_id, limit], feature_from_row)?;

    let mut features = Vec::new();
    for row in rows {
        features.push(row?);
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::create_tables;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        conn
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let conn = test_conn();
        create_user(&conn, "Ada", "ada@example.com").unwrap();
        let err = create_user(&conn, "Other Ada", "ada@example.com").unwrap_err();
        assert_eq!(err.to_string(), "Email already exists");
    }

    #[test]
    fn test_user_lookup() {
        let conn = test_conn();
        let id = create_user(&conn, "Ada", "ada@example.com").unwrap();
        let by_email = get_user_by_email(&conn, "ada@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, id);
        assert_eq!(get_user_by_id(&conn, id).unwrap().unwrap().name, "Ada");
        assert!(get_user_by_email(&conn, "nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn test_feedback_is_trimmed_and_blank_rejected() {
        let conn = test_conn();
        let user = create_user(&conn, "Ada", "ada@example.com").unwrap();
        create_feedback(&conn, user, "  needs dark mode  ").unwrap();
        assert!(create_feedback(&conn, user, "   ").is_err());

        let items = get_user_feedback(&conn, user, None).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "needs dark mode");
    }

    #[test]
    fn test_feedback_newest_first_with_limit() {
        let conn = test_conn();
        let user = create_user(&conn, "Ada", "ada@example.com").unwrap();
        let texts: Vec<String> = ["first", "second", "third"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(create_feedback_batch(&conn, user, &texts).unwrap(), 3);

        let all = get_user_feedback(&conn, user, None).unwrap();
        let order: Vec<&str> = all.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(order, vec!["third", "second", "first"]);

        let limited = get_user_feedback(&conn, user, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_batch_skips_blank_entries() {
        let conn = test_conn();
        let user = create_user(&conn, "Ada", "ada@example.com").unwrap();
        let texts = vec!["one".to_string(), "  ".to_string(), String::new()];
        assert_eq!(create_feedback_batch(&conn, user, &texts).unwrap(), 1);
        assert!(create_feedback_batch(&conn, user, &[" ".to_string()]).is_err());
    }

    #[test]
    fn test_delete_feedback_enforces_ownership() {
        let conn = test_conn();
        let ada = create_user(&conn, "Ada", "ada@example.com").unwrap();
        let bob = create_user(&conn, "Bob", "bob@example.com").unwrap();
        let id = create_feedback(&conn, ada, "search is slow").unwrap();

        assert!(delete_feedback(&conn, id, bob).is_err());
        delete_feedback(&conn, id, ada).unwrap();
        assert_eq!(get_feedback_count(&conn, ada).unwrap(), 0);
    }

    #[test]
    fn test_clear_features_is_per_user() {
        let conn = test_conn();
        let ada = create_user(&conn, "Ada", "ada@example.com").unwrap();
        let bob = create_user(&conn, "Bob", "bob@example.com").unwrap();
        create_feature(&conn, ada, "dark mode", 3).unwrap();
        create_feature(&conn, ada, "export", 1).unwrap();
        create_feature(&conn, bob, "sso", 2).unwrap();

        assert_eq!(clear_user_features(&conn, ada).unwrap(), 2);
        assert_eq!(get_feature_count(&conn, ada).unwrap(), 0);
        assert_eq!(get_feature_count(&conn, bob).unwrap(), 1);
    }

    #[test]
    fn test_prioritized_features_only_scored() {
        let conn = test_conn();
        let user = create_user(&conn, "Ada", "ada@example.com").unwrap();
        let a = create_feature(&conn, user, "dark mode", 3).unwrap();
        let b = create_feature(&conn, user, "export", 5).unwrap();
        create_feature(&conn, user, "unscored", 9).unwrap();

        update_feature_score(&conn, a, user, 3, 1, 80, 7.2).unwrap();
        update_feature_score(&conn, b, user, 5, 2, 100, 12.5).unwrap();

        let ranked = get_prioritized_features(&conn, user, None).unwrap();
        let names: Vec<&str> = ranked.iter().map(|f| f.feature_name.as_str()).collect();
        assert_eq!(names, vec!["export", "dark mode"]);

        let top = get_prioritized_features(&conn, user, Some(1)).unwrap();
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn test_update_score_enforces_ownership() {
        let conn = test_conn();
        let ada = create_user(&conn, "Ada", "ada@example.com").unwrap();
        let bob = create_user(&conn, "Bob", "bob@example.com").unwrap();
        let id = create_feature(&conn, ada, "dark mode", 3).unwrap();
        let err = update_feature_score(&conn, id, bob, 3, 1, 80, 7.2).unwrap_err();
        assert_eq!(err.to_string(), "Feature not found or unauthorized");
        assert!(get_feature(&conn, id, bob).unwrap().is_none());
    }
}
