// CSV bulk import.
//
// The file must have a header row with a column named "feedback" (any
// case). Empty cells are ignored, entries that are too short are dropped
// silently, and the whole import is refused if it would push the user past
// their feedback cap.

use std::io;

use tracing::info;

use super::{count_below_cap, long_enough, FeedbackError, IntakeSettings};
use crate::db::Database;

/// Name of the column feedback is read from (matched case-insensitively).
pub const FEEDBACK_COLUMN: &str = "feedback";

/// Read the non-empty cells of the feedback column.
pub fn read_feedback_column<R: io::Read>(reader: R) -> Result<Vec<String>, FeedbackError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let headers = rdr.headers().map_err(csv_error)?.clone();
    if headers.is_empty() {
        return Err(FeedbackError::EmptyCsv);
    }

    let mut rows = 0usize;
    let mut values = Vec::new();
    let column = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(FEEDBACK_COLUMN));

    for record in rdr.records() {
        let record = record.map_err(csv_error)?;
        rows += 1;
        if let Some(value) = column.and_then(|i| record.get(i)) {
            if !value.is_empty() {
                values.push(value.to_string());
            }
        }
    }

    if rows == 0 {
        return Err(FeedbackError::EmptyCsv);
    }
    if column.is_none() {
        return Err(FeedbackError::MissingColumn);
    }
    if values.is_empty() {
        return Err(FeedbackError::EmptyColumn);
    }

    Ok(values)
}

fn csv_error(e: csv::Error) -> FeedbackError {
    match e.kind() {
        csv::ErrorKind::Io(_) => FeedbackError::CsvRead(e.to_string()),
        _ => FeedbackError::InvalidCsv,
    }
}

/// Import feedback from CSV. Returns the number of entries stored.
pub async fn import_csv<R: io::Read + Send>(
    db: &dyn Database,
    limits: &IntakeSettings,
    user_id: i64,
    reader: R,
) -> Result<usize, FeedbackError> {
    let values = read_feedback_column(reader)?;
    let total = values.len();

    let valid: Vec<String> = values
        .into_iter()
        .filter(|v| long_enough(v, limits.min_feedback_length))
        .collect();
    if valid.is_empty() {
        return Err(FeedbackError::NoValidFeedback {
            min: limits.min_feedback_length,
        });
    }

    let current = count_below_cap(db, limits, user_id).await?;
    if current + valid.len() > limits.max_feedback_per_user {
        return Err(FeedbackError::ExceedsLimit {
            count: valid.len(),
            remaining: limits.max_feedback_per_user - current,
            max: limits.max_feedback_per_user,
        });
    }

    let stored = db.create_feedback_batch(user_id, &valid).await?;
    info!(
        user_id,
        stored,
        skipped = total - valid.len(),
        "CSV feedback imported"
    );
    Ok(stored)
}
