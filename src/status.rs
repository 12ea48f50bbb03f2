// System status display: database, model files, and per-user progress.

use anyhow::Result;
use std::path::Path;

use crate::clustering::download;
use crate::clustering::embeddings::SharedEmbedder;
use crate::config::Config;
use crate::db::models::User;
use crate::db::Database;
use crate::output::terminal;
use crate::pipeline::clustering;
use crate::scoring::rice;

/// Display system status to the terminal. Per-user stats are shown when
/// a user is given.
pub async fn show(db: &dyn Database, config: &Config, user: Option<&User>) -> Result<()> {
    let file_size = std::fs::metadata(&config.db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", config.db_path, file_size);
    println!("  Tables: {}", db.table_count().await?);

    if download::embedding_files_present(&config.model_dir, &config.model_name) {
        let model_size = dir_size(&config.embedding_model_dir());
        println!(
            "Embedding model: {} ({})",
            config.model_name,
            format_bytes(model_size)
        );
        if SharedEmbedder::is_loaded() {
            println!("  Loaded in this process");
        }
    } else {
        println!("Embedding model: not downloaded");
        println!("  Run `chaff download-model` to fetch {}", config.model_name);
    }

    if let Some(user) = user {
        println!("\nUser: {} <{}>", user.name, user.email);
        let clustering_stats =
            clustering::stats(db, &config.clustering_settings(), user.id).await?;
        let scoring_stats = rice::scoring_stats(db, user.id).await?;
        terminal::display_stats(&clustering_stats, &scoring_stats);
    }

    Ok(())
}

fn dir_size(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.metadata().ok())
                .filter(|meta| meta.is_file())
                .map(|meta| meta.len())
                .sum()
        })
        .unwrap_or(0)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(90 * 1024 * 1024), "90.0 MB");
    }

    #[test]
    fn test_dir_size_missing_dir() {
        assert_eq!(dir_size(Path::new("/nonexistent/chaff-status")), 0);
    }
}
