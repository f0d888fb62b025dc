//! ctxprompt CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write a default config file
//! - `config`: Show, validate, or locate the configuration
//! - `add`: Embed text and store it as retrievable context
//! - `search`: List the stored items most similar to a query
//! - `count`: Count stored items
//! - `delete`: Remove one stored item by id
//! - `clear`: Remove every stored item
//! - `query`: Send a prompt with retrieved context, print the raw reply
//! - `ask`: Full pipeline: history + context, normalized classification

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "ctxprompt",
    about = "ctxprompt: retrieval-augmented prompting",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Embed text and store it as context
    Add {
        /// The text to store
        text: String,

        /// Explicit id (defaults to the text itself)
        #[arg(long)]
        id: Option<String>,

        /// Extra metadata as key=value (repeatable)
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Show the stored items most similar to a query
    Search {
        query: String,

        /// Number of results (defaults to retrieval.top_k)
        #[arg(short)]
        k: Option<usize>,
    },

    /// Count stored items
    Count,

    /// Delete one stored item
    Delete { id: String },

    /// Delete every stored item
    Clear {
        /// Required: confirms the store should be emptied
        #[arg(long)]
        confirm: bool,
    },

    /// Send a prompt with retrieved context and print the raw reply
    Query {
        prompt: String,

        #[arg(short)]
        k: Option<usize>,
    },

    /// Classify a query using retrieved context and prior history
    Ask {
        query: String,

        #[arg(short)]
        k: Option<usize>,

        /// JSON file holding prior exchanges: [{"user": .., "assistant": ..}]
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,

        /// Print the whole answer (retrieved items, bounded history) as JSON
        #[arg(long)]
        full: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Validate the configuration file
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Init { force } => commands::config_cmd::init(force).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
        Commands::Add { text, id, meta } => commands::context::add(&text, id, &meta).await?,
        Commands::Search { query, k } => commands::context::search(&query, k).await?,
        Commands::Count => commands::context::count().await?,
        Commands::Delete { id } => commands::context::delete(&id).await?,
        Commands::Clear { confirm } => commands::context::clear(confirm).await?,
        Commands::Query { prompt, k } => commands::ask::query(&prompt, k).await?,
        Commands::Ask {
            query,
            k,
            history,
            full,
        } => commands::ask::ask(&query, k, history.as_deref(), full).await?,
    }

    Ok(())
}
