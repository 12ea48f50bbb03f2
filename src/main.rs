use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing::info;

use chaff::clustering::download;
use chaff::clustering::embeddings::SharedEmbedder;
use chaff::config::Config;
use chaff::db::models::User;
use chaff::db::Database;
use chaff::output::terminal;
use chaff::pipeline::clustering;
use chaff::scoring::rice;

/// Chaff: turn raw product feedback into a prioritized feature list.
///
/// Groups similar feedback into candidate features with sentence embeddings
/// and k-means, then ranks them with RICE scoring.
#[derive(Parser)]
#[command(name = "chaff", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Add, import, list or delete feedback
    Feedback {
        #[command(subcommand)]
        action: FeedbackAction,
    },

    /// Download the sentence embedding model (~90 MB)
    DownloadModel,

    /// Cluster a user's feedback into features (replaces existing features)
    Cluster {
        /// Email of the user whose feedback to cluster
        #[arg(long)]
        user: String,

        /// Number of clusters to request (default: CHAFF_CLUSTER_COUNT)
        #[arg(long)]
        clusters: Option<usize>,
    },

    /// List a user's features
    Features {
        #[arg(long)]
        user: String,

        /// Only show features without a RICE score
        #[arg(long)]
        unscored: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Give a feature its RICE inputs
    Score {
        #[arg(long)]
        user: String,

        /// Feature id (see `chaff features`)
        feature_id: i64,

        /// Impact, 1 to 5
        #[arg(long)]
        impact: i64,

        /// Effort, 1 to 5
        #[arg(long)]
        effort: i64,

        /// Confidence percent, 0 to 100 (default: CHAFF_DEFAULT_CONFIDENCE)
        #[arg(long)]
        confidence: Option<i64>,
    },

    /// Show scored features ranked by RICE
    Report {
        #[arg(long)]
        user: String,

        /// How many features to show (default: CHAFF_TOP_FEATURES)
        #[arg(long)]
        top: Option<u32>,

        /// Show every scored feature
        #[arg(long, conflicts_with = "top")]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show system status (DB stats, model files, user progress)
    Status {
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Show a user's details and progress
    Show {
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
enum FeedbackAction {
    /// Add a single piece of feedback
    Add {
        #[arg(long)]
        user: String,
        text: String,
    },
    /// Import feedback from a CSV file with a "feedback" column
    Import {
        #[arg(long)]
        user: String,
        path: std::path::PathBuf,
    },
    /// List feedback, newest first
    List {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Delete a feedback entry by id
    Delete {
        #[arg(long)]
        user: String,
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chaff=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing chaff database...");
            let db = chaff::db::initialize_sqlite(&config.db_path)?;
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nNext steps:");
            println!("  chaff user add --name <name> --email <email>");
            println!("  chaff download-model");
        }

        Commands::User { action } => {
            let db = open_database(&config)?;
            match action {
                UserAction::Add { name, email } => {
                    let id = db.create_user(name.trim(), email.trim()).await?;
                    println!("Created user {} <{}> (id {id})", name.trim(), email.trim());
                }
                UserAction::Show { user } => {
                    let user = resolve_user(db.as_ref(), &user).await?;
                    println!("{}", format!("=== {} ===", user.name).bold());
                    println!("  Email: {}", user.email);
                    println!("  Joined: {}", chaff::output::format_timestamp(&user.created_at));
                    let clustering_stats =
                        clustering::stats(db.as_ref(), &config.clustering_settings(), user.id)
                            .await?;
                    let scoring_stats = rice::scoring_stats(db.as_ref(), user.id).await?;
                    terminal::display_stats(&clustering_stats, &scoring_stats);
                }
            }
        }

        Commands::Feedback { action } => {
            let db = open_database(&config)?;
            let limits = config.intake_settings();
            match action {
                FeedbackAction::Add { user, text } => {
                    let user = resolve_user(db.as_ref(), &user).await?;
                    chaff::feedback::submit_feedback(db.as_ref(), &limits, user.id, &text).await?;
                    println!("Feedback submitted successfully!");
                }
                FeedbackAction::Import { user, path } => {
                    let user = resolve_user(db.as_ref(), &user).await?;
                    let file = std::fs::File::open(&path)
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    let count =
                        chaff::feedback::import_csv(db.as_ref(), &limits, user.id, file).await?;
                    println!("Successfully imported {count} feedback entries");
                }
                FeedbackAction::List { user, limit } => {
                    let user = resolve_user(db.as_ref(), &user).await?;
                    let items = db.get_user_feedback(user.id, limit).await?;
                    let total = db.get_feedback_count(user.id).await?;
                    terminal::display_feedback_list(&items, total);
                }
                FeedbackAction::Delete { user, id } => {
                    let user = resolve_user(db.as_ref(), &user).await?;
                    db.delete_feedback(id, user.id).await?;
                    println!("Feedback deleted successfully");
                }
            }
        }

        Commands::DownloadModel => {
            println!("Downloading embedding model...");
            println!("  Destination: {}", config.model_dir.display());

            download::download_model(&config.model_dir, &config.model_name).await?;

            println!("\n{}", "Model downloaded successfully.".bold());
            println!("You can now run `chaff cluster --user <email>`.");
        }

        Commands::Cluster { user, clusters } => {
            config.require_model()?;
            let db = open_database(&config)?;
            let user = resolve_user(db.as_ref(), &user).await?;

            let mut settings = config.clustering_settings();
            if let Some(k) = clusters {
                settings.cluster_count = k;
            }

            println!("Clustering feedback for {}...", user.email);
            let embedder = SharedEmbedder::new(config.embedding_model_dir());
            let outcome = clustering::run(db.as_ref(), &embedder, &settings, user.id).await;
            terminal::display_clustering_outcome(&outcome);

            if outcome.success {
                let features = db.get_user_features(user.id).await?;
                terminal::display_features(&features);
            }
        }

        Commands::Features {
            user,
            unscored,
            json,
        } => {
            let db = open_database(&config)?;
            let user = resolve_user(db.as_ref(), &user).await?;
            let features = if unscored {
                rice::unscored_features(db.as_ref(), user.id).await?
            } else {
                db.get_user_features(user.id).await?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&features)?);
            } else {
                terminal::display_features(&features);
            }
        }

        Commands::Score {
            user,
            feature_id,
            impact,
            effort,
            confidence,
        } => {
            let db = open_database(&config)?;
            let user = resolve_user(db.as_ref(), &user).await?;
            let score = rice::score_feature(
                db.as_ref(),
                &config.scoring_settings(),
                feature_id,
                user.id,
                impact,
                effort,
                confidence,
            )
            .await?;
            println!(
                "Feature scored: RICE = {score} ({})",
                rice::PriorityLevel::from_score(score)
            );
        }

        Commands::Report {
            user,
            top,
            all,
            json,
        } => {
            let db = open_database(&config)?;
            let user = resolve_user(db.as_ref(), &user).await?;
            let features = if all {
                db.get_prioritized_features(user.id, None).await?
            } else {
                rice::top_features(db.as_ref(), &config.scoring_settings(), user.id, top).await?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&features)?);
                return Ok(());
            }
            let stats = rice::scoring_stats(db.as_ref(), user.id).await?;
            terminal::display_prioritized(&features, &stats);
        }

        Commands::Status { user } => {
            if !std::path::Path::new(&config.db_path).exists() {
                println!("Database: not initialized");
                println!("\nRun `chaff init` to set up the database.");
                return Ok(());
            }
            let db = open_database(&config)?;
            let user = match user {
                Some(email) => Some(resolve_user(db.as_ref(), &email).await?),
                None => None,
            };
            chaff::status::show(db.as_ref(), &config, user.as_ref()).await?;
        }
    }

    Ok(())
}

fn open_database(config: &Config) -> Result<Arc<dyn Database>> {
    chaff::db::open_sqlite(&config.db_path)
}

/// Look up a user by email, or bail with a helpful message.
async fn resolve_user(db: &dyn Database, email: &str) -> Result<User> {
    match db.get_user_by_email(email.trim()).await? {
        Some(user) => Ok(user),
        None => anyhow::bail!(
            "No user with email {email}. Create one with `chaff user add --name <name> --email {email}`."
        ),
    }
}
