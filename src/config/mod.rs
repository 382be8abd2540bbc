// Configuration management module
// TOML settings plus environment flag overrides

pub mod settings;

use anyhow::Result;
use console::style;

pub use settings::{
    CacheConfig, Config, ConfigError, Credential, EmbeddingConfig, IndexingConfig, RemoteConfig,
    RouterConfig, SearchConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Print the effective configuration to stderr
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embeddings:").bold().yellow());
    eprintln!("  Dimension: {}", style(config.embedding.dimension).cyan());
    eprintln!("  Force local: {}", style(config.embedding.use_local).cyan());
    eprintln!(
        "  Max input chars: {}",
        style(config.embedding.max_input_chars).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Remote engine:").bold().yellow());
    match config.remote.base_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!(
        "  Embedding model: {}",
        style(&config.remote.embedding_model).cyan()
    );
    eprintln!(
        "  Generation model: {}",
        style(&config.remote.generation_model).cyan()
    );
    if config.has_remote_credential() {
        eprintln!(
            "  Credential: {} (${})",
            style("present").green(),
            config.remote.api_key_env
        );
    } else {
        eprintln!(
            "  Credential: {} (${} unset, local engine only)",
            style("absent").yellow(),
            config.remote.api_key_env
        );
    }

    eprintln!();
    eprintln!("{}", style("Search & routing:").bold().yellow());
    eprintln!("  Top K: {}", style(config.search.top_k).cyan());
    eprintln!("  Threshold: {}", style(config.search.threshold).cyan());
    eprintln!(
        "  Keyword fallback: {}",
        style(config.search.keyword_fallback).cyan()
    );
    eprintln!(
        "  Router threshold: {}",
        style(config.router.threshold).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}
