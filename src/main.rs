use std::path::PathBuf;

use clap::{Parser, Subcommand};
use infra_rag::Result;
use infra_rag::commands::{configure, index_file, run_query, show_health, show_history, show_stats};
use infra_rag::config::{Config, get_config_dir};
use infra_rag::engine::QueryOptions;
use infra_rag::router::RoutingMode;

#[derive(Parser)]
#[command(name = "infra-rag")]
#[command(about = "Hybrid retrieval and query routing for infrastructure monitoring knowledge")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to ~/.infra-rag)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the indexed knowledge
    Query {
        text: String,
        /// Routing mode: auto, local or remote
        #[arg(long, default_value = "auto")]
        mode: RoutingMode,
        #[arg(long)]
        max_results: Option<usize>,
        /// Only search documents in this category
        #[arg(long)]
        category: Option<String>,
        /// Skip the response cache
        #[arg(long)]
        no_cache: bool,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Index documents from a JSON array file
    Index {
        /// File containing `[{"id": ..., "content": ..., "metadata": {...}}]`
        file: PathBuf,
    },
    /// Check the vector store and remote engine
    Health,
    /// Show document and query statistics
    Stats,
    /// Show recently answered queries
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Write the effective configuration to disk and show it
    Config {
        /// Only show the current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    let config = Config::load_with_env(&config_dir)?;

    match cli.command {
        Commands::Query {
            text,
            mode,
            max_results,
            category,
            no_cache,
            json,
        } => {
            let defaults = QueryOptions::from_config(&config);
            let options = QueryOptions {
                mode,
                max_results: max_results.unwrap_or(defaults.max_results),
                category,
                use_cache: !no_cache,
                ..defaults
            };
            run_query(config, &text, &options, json).await?;
        }
        Commands::Index { file } => {
            index_file(config, &file).await?;
        }
        Commands::Health => {
            show_health(config).await?;
        }
        Commands::Stats => {
            show_stats(config).await?;
        }
        Commands::History { limit } => {
            show_history(&config, limit).await?;
        }
        Commands::Config { show } => {
            configure(&config, show)?;
        }
    }

    Ok(())
}
