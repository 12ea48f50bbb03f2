// Feedback intake: single submissions and CSV bulk import.
//
// Both paths enforce the same rules before touching the store: a minimum
// length per entry and a per-user cap on stored feedback.

pub mod import;

use thiserror::Error;
use tracing::info;

use crate::db::Database;

pub use import::{import_csv, read_feedback_column};

/// Shortest feedback (in characters, after trimming) accepted.
pub const MIN_FEEDBACK_LENGTH: usize = 10;

/// Limits applied at intake.
#[derive(Debug, Clone)]
pub struct IntakeSettings {
    pub max_feedback_per_user: usize,
    pub min_feedback_length: usize,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            max_feedback_per_user: 2000,
            min_feedback_length: MIN_FEEDBACK_LENGTH,
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Please enter feedback text")]
    Blank,

    #[error("Feedback must be at least {min} characters long")]
    TooShort { min: usize },

    #[error("Feedback limit reached ({max}). Please delete some entries.")]
    LimitReached { max: usize },

    #[error("Cannot import {count} items. Only {remaining} slots remaining (limit: {max}).")]
    ExceedsLimit {
        count: usize,
        remaining: usize,
        max: usize,
    },

    #[error("CSV file is empty")]
    EmptyCsv,

    #[error("CSV must contain a 'feedback' column")]
    MissingColumn,

    #[error("The 'feedback' column is empty")]
    EmptyColumn,

    #[error("No valid feedback found (minimum {min} characters each)")]
    NoValidFeedback { min: usize },

    #[error("Invalid CSV format")]
    InvalidCsv,

    #[error("Error processing CSV: {0}")]
    CsvRead(String),

    #[error("{0:#}")]
    Store(#[from] anyhow::Error),
}

/// Whether `text` trims to at least `min` characters.
pub(crate) fn long_enough(text: &str, min: usize) -> bool {
    text.trim().chars().count() >= min
}

/// Current stored count, failing if the user is already at the cap.
pub(crate) async fn count_below_cap(
    db: &dyn Database,
    limits: &IntakeSettings,
    user_id: i64,
) -> Result<usize, FeedbackError> {
    let current = db.get_feedback_count(user_id).await?.max(0) as usize;
    if current >= limits.max_feedback_per_user {
        return Err(FeedbackError::LimitReached {
            max: limits.max_feedback_per_user,
        });
    }
    Ok(current)
}

/// Validate and store a single feedback entry. Returns the new entry's id.
pub async fn submit_feedback(
    db: &dyn Database,
    limits: &IntakeSettings,
    user_id: i64,
    text: &str,
) -> Result<i64, FeedbackError> {
    if text.trim().is_empty() {
        return Err(FeedbackError::Blank);
    }
    if !long_enough(text, limits.min_feedback_length) {
        return Err(FeedbackError::TooShort {
            min: limits.min_feedback_length,
        });
    }

    count_below_cap(db, limits, user_id).await?;

    let id = db.create_feedback(user_id, text).await?;
    info!(user_id, feedback_id = id, "Feedback stored");
    Ok(id)
}
