use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod circles;
mod clustering;
mod config;
mod db;
mod engine;
mod lifecycle;
mod models;
mod profile;
mod report;
mod similarity;

use config::{ClusterAlgorithm, EngineConfig};

#[derive(Parser)]
#[command(name = "wound-circles")]
#[command(about = "Shared-wound group clustering and circle allocation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import emotion observations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Execute one full batch cycle and print the run summary
    Run {
        #[arg(long, value_enum)]
        algorithm: Option<ClusterAlgorithm>,
    },
    /// Rank matching groups for one user
    Match {
        #[arg(long)]
        user: Uuid,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Generate a markdown snapshot of the group landscape
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} observations from {}.", csv.display());
        }
        Commands::Run { algorithm } => {
            let mut cfg = EngineConfig::default();
            if let Some(algorithm) = algorithm {
                cfg.algorithm = algorithm;
            }
            let summary = engine::run_once(&pool, &cfg).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Match { user, limit } => {
            let cfg = EngineConfig::default();
            let matches = engine::find_matching_groups(&pool, &cfg, user, limit).await?;

            if matches.is_empty() {
                println!("No matching groups for this user.");
                return Ok(());
            }

            println!("Best matching groups:");
            for (group, similarity) in matches {
                println!(
                    "- {} ({} members, {}) similarity {:.2}",
                    group.name,
                    group.member_count,
                    group.healing_stage.as_str(),
                    similarity
                );
            }
        }
        Commands::Report { out } => {
            let groups = db::fetch_active_groups(&pool).await?;
            let circle_counts = db::fetch_active_circle_counts(&pool)
                .await?
                .into_iter()
                .collect();
            let rendered = report::build_report(chrono::Utc::now(), &groups, &circle_counts);
            std::fs::write(&out, rendered)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
