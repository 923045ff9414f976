//! Maintenance commands: data checks, model training, embedding refresh and cleanup
//!
//! Usage:
//!   tutor-match-admin check-data
//!   tutor-match-admin train [--output PATH]
//!   tutor-match-admin embed-tutors
//!   tutor-match-admin purge-embeddings [--days N]

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use tutor_match::bootstrap;
use tutor_match::config::Settings;
use tutor_match::core::training::{build_dataset, train, TrainingParams, MIN_SAMPLES};
use tutor_match::core::FeatureExtractor;
use tutor_match::services::{refresh_tutor_embeddings, EmbeddingStore, PostgresClient};

/// Maintenance commands for the tutor matching service
#[derive(Debug, Parser)]
#[command(name = "tutor-match-admin")]
#[command(about = "Data checks, model training and embedding maintenance")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Summarize the training data available in the database
    CheckData,

    /// Train the ranking model and write the artifact
    Train {
        /// Output path (defaults to ranking.model_path)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Recompute bio embeddings for verified tutors
    EmbedTutors,

    /// Delete embedding cache entries past the retention window
    PurgeEmbeddings {
        /// Retention in days (defaults to embedding_cache.retention_days)
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let command = Cli::parse().command;

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    bootstrap::init_tracing(&settings.logging);

    let postgres = match PostgresClient::new(&settings.database.url, 4, 1).await {
        Ok(pg) => Arc::new(pg),
        Err(e) => {
            error!("Failed to connect to PostgreSQL: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match command {
        Command::CheckData => check_data(&postgres).await,
        Command::Train { output } => {
            let output = output.unwrap_or_else(|| settings.ranking.model_path.clone());
            train_model(&settings, &postgres, output).await
        }
        Command::EmbedTutors => embed_tutors(&settings, &postgres).await,
        Command::PurgeEmbeddings { days } => {
            purge_embeddings(&postgres, days.unwrap_or(settings.embedding_cache.retention_days)).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

type CommandResult = Result<(), Box<dyn std::error::Error>>;

async fn check_data(postgres: &PostgresClient) -> CommandResult {
    let stats = postgres.get_data_stats().await?;

    info!(
        orders = stats.orders,
        orders_with_applications = stats.orders_with_applications,
        tutors = stats.tutors,
        verified_tutors = stats.verified_tutors,
        applications = stats.applications,
        chosen_applications = stats.chosen_applications,
        completed_bookings = stats.completed_bookings,
        "Training data summary"
    );

    if (stats.applications as usize) < MIN_SAMPLES || stats.chosen_applications == 0 {
        warn!("Not enough labelled applications to train; the fallback scorer will be used");
    }
    Ok(())
}

async fn train_model(settings: &Settings, postgres: &Arc<PostgresClient>, output: PathBuf) -> CommandResult {
    let groups = postgres.get_training_groups().await?;

    let store: Arc<dyn EmbeddingStore> = postgres.clone();
    let openai = bootstrap::openai_client(settings);
    let extractor = FeatureExtractor::new(bootstrap::embedding_cache(settings, store, openai.as_ref()));

    let dataset = build_dataset(&extractor, groups).await;
    let artifact = train(&dataset, &TrainingParams::default())?;
    artifact.save(&output)?;

    info!(
        "Saved ranking model to {} ({} samples, {} groups, ndcg@3={:.4})",
        output.display(),
        artifact.report.num_samples,
        artifact.report.num_groups,
        artifact.report.ndcg_at_3
    );
    for (feature, weight) in &artifact.report.feature_weights {
        info!("  {:<22} {:+.4}", feature, weight);
    }
    Ok(())
}

async fn embed_tutors(settings: &Settings, postgres: &Arc<PostgresClient>) -> CommandResult {
    let store: Arc<dyn EmbeddingStore> = postgres.clone();
    let openai = bootstrap::openai_client(settings);
    let Some(cache) = bootstrap::embedding_cache(settings, store, openai.as_ref()) else {
        return Err("an OpenAI API key is required to compute embeddings".into());
    };

    let tutors = postgres.get_verified_tutor_bios().await?;
    let summary = refresh_tutor_embeddings(&cache, tutors, postgres.as_ref()).await?;

    info!("Updated {} tutor embeddings ({} skipped)", summary.updated, summary.skipped);
    Ok(())
}

async fn purge_embeddings(postgres: &PostgresClient, days: i64) -> CommandResult {
    let cutoff = Utc::now() - chrono::Duration::days(days);
    let purged = postgres.purge_older_than(cutoff).await?;
    info!("Removed {} embedding cache entries older than {} days", purged, days);
    Ok(())
}
