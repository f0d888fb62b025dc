pub mod ask;
pub mod config_cmd;
pub mod context;

use ctxprompt_agent::Retriever;
use ctxprompt_config::AppConfig;
use ctxprompt_core::cancel::{CancelSignal, cancel_pair};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load().map_err(|e| format!("Failed to load config: {e}").into())
}

async fn retriever(config: &AppConfig) -> Result<Retriever, Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    CTXPROMPT_API_KEY = 'sk-...'");
        eprintln!("    OPENAI_API_KEY    = 'sk-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    Ok(ctxprompt_agent::build_retriever(config).await?)
}

/// A signal that fires on Ctrl-C.
fn interrupt_signal() -> CancelSignal {
    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            handle.cancel();
        }
    });
    signal
}
