use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::info;

use crate::config::{Config, show_config};
use crate::database::QueryLog;
use crate::engine::{HealthStatus, QueryOptions, QueryResponse, RetrievalEngine};
use crate::indexer::DocumentInput;

/// Answer one query and print the response
#[inline]
pub async fn run_query(config: Config, text: &str, options: &QueryOptions, json: bool) -> Result<()> {
    let engine = RetrievalEngine::open(config)
        .await
        .context("Failed to open retrieval engine")?;

    let response = engine.query(text, options).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to serialize response")?
        );
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &QueryResponse) {
    let status = if response.success {
        style("✅").green()
    } else {
        style("⚠️ ").yellow()
    };
    println!(
        "{} {} engine, confidence {:.2}, {} ms{}",
        status,
        style(response.engine).bold(),
        response.confidence,
        response.processing_time_ms,
        if response.metadata.cached {
            " (cached)"
        } else {
            ""
        }
    );
    println!();
    println!("{}", response.response);

    let metadata = &response.metadata;
    if !metadata.sources.is_empty() {
        println!();
        println!("{}", style("📚 Sources:").bold());
        for source in &metadata.sources {
            println!("   {} ({:.2})", source.id, source.similarity);
        }
    }
    if !metadata.suggestions.is_empty() {
        println!();
        println!("{}", style("💡 Suggestions:").bold());
        for suggestion in &metadata.suggestions {
            println!("   - {}", suggestion);
        }
    }
    if let Some(reason) = &metadata.routing_reason {
        println!();
        println!("{}", style(format!("Routing: {}", reason)).dim());
    }
    if let Some(reason) = &metadata.fallback_reason {
        println!("{}", style(format!("Fallback: {}", reason)).dim());
    }
}

/// Bulk index a JSON array of documents
#[inline]
pub async fn index_file(config: Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read documents file: {}", path.display()))?;
    let documents: Vec<DocumentInput> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse documents file: {}", path.display()))?;

    info!("Loaded {} documents from {}", documents.len(), path.display());

    let engine = RetrievalEngine::open(config)
        .await
        .context("Failed to open retrieval engine")?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(0).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] Indexing batches {msg}")
                .context("Invalid progress template")?,
        )
    } else {
        ProgressBar::hidden()
    };

    let summary = engine
        .bulk_index_with_progress(documents, |report| {
            bar.set_length(report.total_batches as u64);
            bar.set_position(report.batch_number as u64);
            bar.set_message(format!("({} indexed, {} failed)", report.indexed, report.failed));
        })
        .await;
    bar.finish_and_clear();

    println!(
        "{} Indexed {} documents in {} batches",
        style("✅").green(),
        style(summary.indexed_count).cyan(),
        summary.batches
    );
    if summary.failed_count > 0 {
        println!(
            "{} {} documents failed",
            style("⚠️ ").yellow(),
            style(summary.failed_count).red()
        );
    }
    Ok(())
}

#[inline]
pub async fn show_health(config: Config) -> Result<()> {
    let engine = RetrievalEngine::open(config)
        .await
        .context("Failed to open retrieval engine")?;
    let report = engine.health_check().await;

    let status = match report.status {
        HealthStatus::Healthy => style(report.status.as_str()).green(),
        HealthStatus::Unhealthy => style(report.status.as_str()).red(),
    };
    println!("{} {}", style("🩺 Status:").bold(), status);
    println!(
        "   Vector store: {}",
        if report.vector_store_up {
            style("up").green()
        } else {
            style("down").red()
        }
    );
    println!("   Documents: {}", style(report.document_count).cyan());
    println!("   Cache entries: {}", style(report.cache_size).cyan());
    println!(
        "   Remote engine: {}",
        if report.remote_configured {
            style("configured").green()
        } else {
            style("not configured (local only)").yellow()
        }
    );
    Ok(())
}

#[inline]
pub async fn show_stats(config: Config) -> Result<()> {
    let engine = RetrievalEngine::open(config)
        .await
        .context("Failed to open retrieval engine")?;

    let stats = engine.store_stats().await?;
    println!("{}", style("📊 Documents").bold().cyan());
    println!("   Total: {}", style(stats.count).cyan());
    for (category, count) in &stats.categories {
        println!("   {}: {}", category, count);
    }

    if let Some(log) = engine.query_log() {
        println!();
        println!("{}", style("🔁 Queries").bold().cyan());
        println!("   Logged: {}", style(log.count().await?).cyan());
        for usage in log.engine_usage().await? {
            println!(
                "   {}: {} queries, avg confidence {:.2}, avg {:.0} ms",
                usage.engine, usage.queries, usage.average_confidence, usage.average_time_ms
            );
        }
    }
    Ok(())
}

#[inline]
pub async fn show_history(config: &Config, limit: u32) -> Result<()> {
    let log = QueryLog::initialize_from_config_dir(config.get_base_dir()).await?;
    let entries = log.recent(limit).await?;

    if entries.is_empty() {
        println!("No queries recorded yet.");
        return Ok(());
    }

    for entry in entries {
        let marker = if entry.success {
            style("✔").green()
        } else {
            style("✘").red()
        };
        println!(
            "{} {} [{} → {}{}] {:.2} {}ms  {}",
            marker,
            style(entry.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
            entry.mode,
            entry.engine,
            if entry.auto_switched { ", switched" } else { "" },
            entry.confidence,
            entry.processing_time_ms,
            entry.query
        );
    }
    Ok(())
}

/// Write the effective configuration to disk unless only showing it
#[inline]
pub fn configure(config: &Config, show_only: bool) -> Result<()> {
    if !show_only {
        config.save()?;
        println!(
            "{} Saved configuration to {}",
            style("✅").green(),
            config.config_file_path().display()
        );
        println!();
    }
    show_config(config)
}
