//! Autopost worker and operator CLI.
//!
//! `autopost run` starts the job workers and the cron scheduler; the other
//! subcommands are one-shot operator actions against the same database.

use std::sync::Arc;

use anyhow::{Context, Result};
use autopost_core::common::utils::{CredentialCipher, OpenAiEmbeddings};
use autopost_core::config::Config;
use autopost_core::domains::accounts::TokenRefreshHandler;
use autopost_core::domains::generation::GenerateHandler;
use autopost_core::domains::publishing::PublishHandler;
use autopost_core::domains::reviews::{apply_review_decision, ReviewDecision};
use autopost_core::domains::schedules::plan_day;
use autopost_core::kernel::jobs::{JobQueue, JobWorker, PostgresJobQueue, WorkerPool};
use autopost_core::kernel::{
    start_scheduler, HttpPlatformClient, PostgresStore, RigTextGenerator, ServerDeps,
    WebhookApprovalChannel,
};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "autopost")]
#[command(about = "Publish pipeline and adaptive scheduling engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run job workers and scheduled tasks until ctrl-c
    Run,

    /// Plan a day's posts (defaults to tomorrow, UTC)
    PlanDay {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// List dead-lettered jobs as JSON
    DeadLetters {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Apply a review decision (approve, regenerate, skip)
    Review { token: String, decision: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,autopost_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let deps = Arc::new(build_deps(&config, pool)?);

    match cli.command {
        Commands::Run => run(deps).await,
        Commands::PlanDay { date } => {
            let date = date.unwrap_or_else(|| (Utc::now() + chrono::Duration::days(1)).date_naive());
            let mut rng = StdRng::from_entropy();
            let plan = plan_day(date, &mut rng, &deps).await?;
            tracing::info!(
                %date,
                planned = plan.planned.len(),
                duplicates = plan.duplicates,
                "Planning complete"
            );
            Ok(())
        }
        Commands::DeadLetters { limit } => {
            let dead = deps.jobs.dead_letters(limit).await?;
            println!("{}", serde_json::to_string_pretty(&dead)?);
            Ok(())
        }
        Commands::Review { token, decision } => {
            let decision: ReviewDecision = decision.parse()?;
            let outcome = apply_review_decision(&token, decision, deps.reviewer_id, &deps).await?;
            tracing::info!(
                post_id = %outcome.post_id,
                decision = ?outcome.decision,
                job_id = ?outcome.job_id,
                "Review applied"
            );
            Ok(())
        }
    }
}

fn build_deps(config: &Config, pool: PgPool) -> Result<ServerDeps> {
    let cipher = CredentialCipher::from_base64_key(&config.credential_key)
        .context("CREDENTIAL_KEY must be a base64 32-byte key")?;
    let platform = Arc::new(HttpPlatformClient::new(
        config.platform_api_base.clone(),
        config.platform_app_secret.clone(),
    ));
    let jobs: Arc<dyn JobQueue> = Arc::new(PostgresJobQueue::new(pool.clone()));

    Ok(ServerDeps::new(
        Arc::new(PostgresStore::new(pool)),
        jobs,
        Arc::new(RigTextGenerator::new(
            &config.openai_api_key,
            config.pipeline.default_engine.clone(),
        )),
        Arc::new(OpenAiEmbeddings::new(config.openai_api_key.clone())),
        Arc::new(WebhookApprovalChannel::new(
            config.approval_webhook_url.clone(),
            config.pipeline.review_ttl,
        )),
        platform.clone(),
        platform,
        Arc::new(cipher),
        config.pipeline.clone(),
        config.reviewer_id,
        config.system_member_id,
    ))
}

async fn run(deps: Arc<ServerDeps>) -> Result<()> {
    tracing::info!("Starting autopost workers");

    let pipeline = &deps.config;
    let pool = WorkerPool::new()
        .with_worker(JobWorker::new(
            deps.jobs.clone(),
            Arc::new(GenerateHandler::new(deps.clone())),
            pipeline.generate_queue.clone(),
        ))
        .with_worker(JobWorker::new(
            deps.jobs.clone(),
            Arc::new(PublishHandler::new(deps.clone())),
            pipeline.publish_queue.clone(),
        ))
        .with_worker(JobWorker::new(
            deps.jobs.clone(),
            Arc::new(TokenRefreshHandler::new(deps.clone())),
            pipeline.token_refresh_queue.clone(),
        ));

    let mut scheduler = start_scheduler(deps.clone()).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested, draining workers");
                signal.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    pool.run(shutdown).await?;
    scheduler.shutdown().await?;

    tracing::info!("Autopost stopped");
    Ok(())
}
