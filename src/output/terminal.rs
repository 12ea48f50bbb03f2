// Colored terminal output for feedback, features and the priority report.
//
// main.rs gathers the data; everything about how it looks lives here.

use colored::Colorize;

use super::{format_timestamp, truncate_chars};
use crate::db::models::{Feature, FeedbackItem};
use crate::pipeline::{ClusteringOutcome, ClusteringStats};
use crate::scoring::rice::ScoringStats;
use crate::scoring::PriorityLevel;

/// Display a user's feedback, newest first.
pub fn display_feedback_list(items: &[FeedbackItem], total: i64) {
    if items.is_empty() {
        println!("No feedback yet. Add some with `chaff feedback add` or `chaff feedback import`.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Feedback ({} of {}) ===", items.len(), total).bold()
    );
    println!();

    for item in items {
        println!(
            "  {:>5}  {}  {}",
            format!("#{}", item.id).dimmed(),
            format_timestamp(&item.created_at).dimmed(),
            truncate_chars(&item.text, 100),
        );
    }
    println!();
}

/// Display the result of a clustering run.
pub fn display_clustering_outcome(outcome: &ClusteringOutcome) {
    if outcome.success {
        println!("{} {}", "ok".green().bold(), outcome.message);
    } else {
        println!("{} {}", "!!".red().bold(), outcome.message);
    }
}

/// Display all of a user's features, largest reach first.
pub fn display_features(features: &[Feature]) {
    if features.is_empty() {
        println!("No features yet. Run `chaff cluster` first.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Features ({}) ===", features.len()).bold()
    );
    println!();

    println!(
        "  {:>4}  {:<5} {:<52} {:>5}  {:>6}",
        "#".dimmed(),
        "ID".dimmed(),
        "Feature".dimmed(),
        "Reach".dimmed(),
        "RICE".dimmed(),
    );
    println!("  {}", "-".repeat(78).dimmed());

    for (i, feature) in features.iter().enumerate() {
        let rice = if feature.is_scored() {
            format!("{:.2}", feature.rice_score)
        } else {
            "-".to_string()
        };
        println!(
            "  {:>4}. {:<5} {:<52} {:>5}  {:>6}",
            i + 1,
            feature.id,
            truncate_chars(&feature.feature_name, 48),
            feature.reach,
            rice,
        );
    }
    println!();
}

/// Display scored features ranked by RICE score.
pub fn display_prioritized(features: &[Feature], stats: &ScoringStats) {
    if features.is_empty() {
        println!("No scored features yet. Score some with `chaff score`.");
        return;
    }

    println!(
        "\n{}",
        format!("=== Priority Report (top {}) ===", features.len()).bold()
    );
    println!();

    println!(
        "  {:>4}  {:<44} {:>5} {:>6} {:>5} {:>6}  {:>7}  {:<8}",
        "Rank".dimmed(),
        "Feature".dimmed(),
        "Reach".dimmed(),
        "Impact".dimmed(),
        "Conf".dimmed(),
        "Effort".dimmed(),
        "RICE".dimmed(),
        "Priority".dimmed(),
    );
    println!("  {}", "-".repeat(96).dimmed());

    for (i, feature) in features.iter().enumerate() {
        let level = PriorityLevel::from_score(feature.rice_score);
        println!(
            "  {:>4}. {:<44} {:>5} {:>6} {:>4}% {:>6}  {:>7.2}  {:<8}",
            i + 1,
            truncate_chars(&feature.feature_name, 40),
            feature.reach,
            feature.impact,
            feature.confidence,
            feature.effort,
            feature.rice_score,
            colorize_priority(level),
        );
    }
    println!();

    let high = features
        .iter()
        .filter(|f| PriorityLevel::from_score(f.rice_score) == PriorityLevel::High)
        .count();
    if high > 0 {
        println!("  {} {} high priority features", "!!".green().bold(), high);
    }
    if stats.unscored_count > 0 {
        println!(
            "  {} {} of {} features still unscored",
            "~".yellow(),
            stats.unscored_count,
            stats.total_features
        );
    }
}

/// Display clustering readiness and scoring progress.
pub fn display_stats(clustering: &ClusteringStats, scoring: &ScoringStats) {
    println!("Feedback: {} entries", clustering.feedback_count);
    if clustering.can_cluster {
        println!("  Ready to cluster");
    } else {
        println!(
            "  Need at least {} entries to cluster",
            clustering.min_required
        );
    }

    if clustering.has_features {
        println!(
            "Features: {} ({} scored, {} unscored)",
            clustering.feature_count, scoring.scored_count, scoring.unscored_count
        );
    } else {
        println!("Features: none yet");
        println!("  Run `chaff cluster` to group your feedback");
    }
}

/// Colorize a priority level.
fn colorize_priority(level: PriorityLevel) -> colored::ColoredString {
    match level {
        PriorityLevel::High => level.as_str().green().bold(),
        PriorityLevel::Medium => level.as_str().yellow(),
        PriorityLevel::Low => level.as_str().red(),
    }
}
