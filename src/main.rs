use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use streamline_recommender::{
    api::{create_router, AppState},
    db::{create_pool, create_redis_client, PgCatalog, PgPredictionStore, RedisDocumentStore, RedisLockStore},
    services::{
        artifacts::{ArtifactStore, BlobHttpStore, FsObjectStore, ObjectStore},
        sink::PredictionSink,
        GenerationScheduler, RecommendationService, Recommender, TrainingMode,
    },
    Config,
};

#[derive(Parser)]
#[command(name = "streamline-recommender")]
#[command(about = "Hybrid movie recommendation service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Serve recommendation lookups and per-user generation over HTTP")]
    Serve,

    #[command(about = "Run full-batch training over every user")]
    Train {
        #[arg(long, help = "Hold out liked items and report top-K metrics instead of persisting")]
        evaluate: bool,

        #[arg(long, default_value = "1", help = "Liked items held out per user")]
        holdout: usize,

        #[arg(long, default_value = "10", help = "Cut-off for hit rate, precision and recall")]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let db_pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let redis_client = create_redis_client(&config.redis_url).context("Invalid Redis URL")?;

    let artifacts = Arc::new(ArtifactStore::new(
        object_store(&config),
        config.artifact_cache_dir.clone(),
        config.artifact_cache_ttl(),
        config.upload_retry(),
    ));
    let sink = Arc::new(PredictionSink::new(
        Arc::new(PgPredictionStore::new(db_pool.clone())),
        Arc::new(RedisDocumentStore::new(redis_client.clone())),
        config.sink_settings(),
    ));
    let recommender = Arc::new(Recommender::new(
        Arc::new(PgCatalog::new(db_pool)),
        Arc::clone(&artifacts),
        Arc::clone(&sink),
        config.recommender_settings(),
    ));

    match cli.command {
        Commands::Train {
            evaluate,
            holdout,
            top_k,
        } => {
            let mode = if evaluate {
                TrainingMode::Evaluation { holdout, top_k }
            } else {
                TrainingMode::Production
            };
            let report = recommender.train(mode).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Serve => {
            let scheduler = Arc::new(GenerationScheduler::new(
                Arc::new(RedisLockStore::new(redis_client)),
                sink.clone(),
                recommender,
                config.scheduler_settings(),
            ));
            let recommendations = Arc::new(RecommendationService::new(sink, artifacts));
            let app = create_router(AppState::new(recommendations, scheduler));

            let address = format!("{}:{}", config.host, config.port);
            let listener = tokio::net::TcpListener::bind(&address)
                .await
                .with_context(|| format!("Failed to bind {}", address))?;
            tracing::info!(address = %address, "Server running");
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}

/// Remote blob store when fully configured, local directory otherwise
fn object_store(config: &Config) -> Arc<dyn ObjectStore> {
    match (
        config.blob_account_url.clone(),
        config.blob_container.clone(),
        config.blob_sas_token.clone(),
    ) {
        (Some(account_url), Some(container), Some(sas_token)) => {
            tracing::info!(container = %container, "Using remote blob artifact store");
            Arc::new(BlobHttpStore::new(account_url, container, sas_token))
        }
        _ => {
            tracing::info!(root = %config.artifact_root.display(), "Using filesystem artifact store");
            Arc::new(FsObjectStore::new(config.artifact_root.clone()))
        }
    }
}
