use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

#[cfg(test)]
mod tests;

pub type DbPool = Pool<Sqlite>;

/// One answered query as written to the interaction log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewQueryLogEntry {
    pub query: String,
    pub response: String,
    pub mode: String,
    pub engine: String,
    pub confidence: f64,
    pub processing_time_ms: i64,
    pub cached: bool,
    pub auto_switched: bool,
    pub search_tier: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct QueryLogEntry {
    pub id: i64,
    pub query: String,
    pub response: String,
    pub mode: String,
    pub engine: String,
    pub confidence: f64,
    pub processing_time_ms: i64,
    pub cached: bool,
    pub auto_switched: bool,
    pub search_tier: Option<String>,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct EngineUsage {
    pub engine: String,
    pub queries: i64,
    pub average_confidence: f64,
    pub average_time_ms: f64,
}

/// SQLite-backed history of answered queries
#[derive(Debug, Clone)]
pub struct QueryLog {
    pool: DbPool,
}

impl QueryLog {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let log = Self { pool };
        log.run_migrations().await?;

        Ok(log)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Open the log at `query_log.db` inside the configuration directory
    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("query_log.db")).await
    }

    #[inline]
    pub async fn record(&self, entry: &NewQueryLogEntry) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO query_log (query, response, mode, engine, confidence, processing_time_ms, cached, auto_switched, search_tier, success, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.query)
        .bind(&entry.response)
        .bind(&entry.mode)
        .bind(&entry.engine)
        .bind(entry.confidence)
        .bind(entry.processing_time_ms)
        .bind(entry.cached)
        .bind(entry.auto_switched)
        .bind(&entry.search_tier)
        .bind(entry.success)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to record query")?
        .last_insert_rowid();

        debug!("Recorded query log entry {}", id);
        Ok(id)
    }

    /// Most recent entries first
    #[inline]
    pub async fn recent(&self, limit: u32) -> Result<Vec<QueryLogEntry>> {
        sqlx::query_as::<_, QueryLogEntry>(
            "SELECT id, query, response, mode, engine, confidence, processing_time_ms, cached, auto_switched, search_tier, success, created_at
             FROM query_log ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list recent queries")
    }

    #[inline]
    pub async fn engine_usage(&self) -> Result<Vec<EngineUsage>> {
        sqlx::query_as::<_, EngineUsage>(
            "SELECT engine,
                    COUNT(*) AS queries,
                    AVG(confidence) AS average_confidence,
                    CAST(AVG(processing_time_ms) AS REAL) AS average_time_ms
             FROM query_log GROUP BY engine ORDER BY queries DESC, engine ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate engine usage")
    }

    #[inline]
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM query_log")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count queries")
    }

    /// Delete entries older than `cutoff`, returning how many were removed
    #[inline]
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM query_log WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to prune query log")?;

        Ok(result.rows_affected())
    }
}
