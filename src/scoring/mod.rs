// Feature prioritization.

pub mod rice;

pub use rice::{calculate_rice_score, PriorityLevel, ScoreError, ScoringSettings};
