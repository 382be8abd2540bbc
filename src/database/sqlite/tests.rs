use super::*;
use anyhow::Result;
use chrono::Duration;
use tempfile::TempDir;

async fn create_test_log() -> Result<(TempDir, QueryLog)> {
    let temp_dir = TempDir::new()?;
    let log = QueryLog::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, log))
}

fn entry(query: &str, engine: &str, confidence: f64, time_ms: i64) -> NewQueryLogEntry {
    NewQueryLogEntry {
        query: query.to_string(),
        response: format!("answer to {}", query),
        mode: "auto".to_string(),
        engine: engine.to_string(),
        confidence,
        processing_time_ms: time_ms,
        cached: false,
        auto_switched: false,
        search_tier: Some("vector".to_string()),
        success: true,
    }
}

#[tokio::test]
async fn schema_migration_creates_query_log() -> Result<()> {
    let (_temp_dir, log) = create_test_log().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx%'",
    )
    .fetch_all(log.pool())
    .await?;

    assert_eq!(tables, vec!["query_log".to_string()]);
    Ok(())
}

#[tokio::test]
async fn record_and_list_recent() -> Result<()> {
    let (_temp_dir, log) = create_test_log().await?;

    log.record(&entry("first", "local", 0.7, 10)).await?;
    let mut second = entry("second", "remote", 0.9, 200);
    second.auto_switched = true;
    second.search_tier = None;
    log.record(&second).await?;

    let recent = log.recent(10).await?;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].query, "second");
    assert!(recent[0].auto_switched);
    assert_eq!(recent[0].search_tier, None);
    assert_eq!(recent[1].search_tier.as_deref(), Some("vector"));

    assert_eq!(log.recent(1).await?.len(), 1);
    assert_eq!(log.count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn engine_usage_aggregates_per_engine() -> Result<()> {
    let (_temp_dir, log) = create_test_log().await?;

    log.record(&entry("a", "local", 0.5, 10)).await?;
    log.record(&entry("b", "local", 0.7, 30)).await?;
    log.record(&entry("c", "remote", 0.9, 100)).await?;

    let usage = log.engine_usage().await?;
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0].engine, "local");
    assert_eq!(usage[0].queries, 2);
    assert!((usage[0].average_confidence - 0.6).abs() < 1e-9);
    assert!((usage[0].average_time_ms - 20.0).abs() < 1e-9);
    assert_eq!(usage[1].engine, "remote");
    Ok(())
}

#[tokio::test]
async fn prune_removes_old_entries() -> Result<()> {
    let (_temp_dir, log) = create_test_log().await?;
    log.record(&entry("a", "local", 0.5, 10)).await?;

    let removed = log.prune_before(Utc::now() - Duration::hours(1)).await?;
    assert_eq!(removed, 0);

    let removed = log.prune_before(Utc::now() + Duration::hours(1)).await?;
    assert_eq!(removed, 1);
    assert_eq!(log.count().await?, 0);
    Ok(())
}
