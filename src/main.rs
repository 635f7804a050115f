//! SMS Trigger Worker - rule-driven customer SMS notifications
//!
//! This worker connects to NATS, answers rule / message / campaign / POS
//! requests and runs the periodic trigger and dispatch sweeps.

mod app;
mod cli;
mod config;
mod db;
mod defaults;
mod handlers;
mod scheduler;
mod services;
mod store;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::config::{Config, StoreBackend};
use crate::services::bulk_job_queue::BulkJobQueue;
use crate::services::notifier::{LogNotifier, NatsNotifier};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sms_trigger_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(&config).await,
        Command::RunTriggers => {
            let app = one_shot_app(&config).await?;
            let report = app.engine.run_cycle().await?;
            info!(?report, "Trigger cycle complete");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Dispatch { limit } => {
            let app = one_shot_app(&config).await?;
            let report = app
                .dispatcher
                .sweep_pending(limit.unwrap_or(config.dispatch_batch_limit))
                .await?;
            info!(?report, "Dispatch sweep complete");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn migrate(config: &Config) -> Result<()> {
    if config.store_backend != StoreBackend::Postgres {
        anyhow::bail!("migrate requires STORE_BACKEND=postgres");
    }
    let url = config.database_url.as_deref().context("DATABASE_URL must be set")?;
    let pool = db::create_pool(url, config.db_max_connections).await?;
    db::run_migrations(&pool).await
}

/// Services for a command that runs once without NATS
async fn one_shot_app(config: &Config) -> Result<App> {
    let stores = app::open_stores(config).await?;
    App::build(config, stores, Arc::new(LogNotifier))
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting SMS Trigger Worker...");

    let stores = app::open_stores(&config).await?;

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let notifier = Arc::new(NatsNotifier::new(nats_client.clone()));
    let app = Arc::new(App::build(&config, stores, notifier)?);
    let queue = Arc::new(BulkJobQueue::new(nats_client.clone(), app.bulk.clone()).await?);

    let token = CancellationToken::new();
    let sweeps = scheduler::spawn_all(app.clone(), queue.clone(), &config, token.clone());

    let result = tokio::select! {
        result = handlers::start_handlers(nats_client, app, queue) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    token.cancel();
    for sweep in sweeps {
        let _ = sweep.await;
    }

    if let Err(e) = &result {
        error!("Handler error: {}", e);
    }
    result
}
