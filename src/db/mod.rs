//! Database module

pub mod queries;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Create a database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded migrations.
///
/// Applied versions that no longer exist in the binary are dropped from
/// `_sqlx_migrations` first, and stale checksums (CRLF/LF) are rewritten.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let migrator = sqlx::migrate!("./migrations");

    let compiled: Vec<i64> = migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| m.version)
        .collect();

    for version in applied_versions(pool).await? {
        if !compiled.contains(&version) {
            warn!(version, "Removing orphaned migration record");
            sqlx::query("DELETE FROM _sqlx_migrations WHERE version = $1")
                .bind(version)
                .execute(pool)
                .await?;
        }
    }

    sync_checksums(pool, &migrator).await?;
    migrator.run(pool).await.context("Migration failed")?;

    info!(versions = ?compiled, "Database migrations complete");
    Ok(())
}

async fn applied_versions(pool: &PgPool) -> Result<Vec<i64>> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(vec![]);
    }

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM _sqlx_migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    Ok(versions)
}

async fn sync_checksums(pool: &PgPool, migrator: &sqlx::migrate::Migrator) -> Result<()> {
    for migration in migrator.iter().filter(|m| !m.migration_type.is_down_migration()) {
        let stored: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT checksum FROM _sqlx_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;

        let Some(stored) = stored else { continue };
        let current: &[u8] = &migration.checksum;
        if stored != current {
            warn!(
                version = migration.version,
                description = %migration.description,
                "Migration checksum mismatch, updating stored checksum"
            );
            sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                .bind(current)
                .bind(migration.version)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}
