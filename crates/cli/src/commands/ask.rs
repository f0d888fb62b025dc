//! `ctxprompt query|ask`: Prompt the model with retrieved context.

use ctxprompt_core::history::Exchange;
use std::path::Path;

use super::{CmdResult, interrupt_signal, load_config, retriever};

pub async fn query(prompt: &str, k: Option<usize>) -> CmdResult {
    let config = load_config()?;
    let k = k.unwrap_or(config.retrieval.top_k);
    let retriever = retriever(&config).await?;

    let reply = retriever.query(prompt, k, &interrupt_signal()).await?;
    println!("{reply}");
    Ok(())
}

pub async fn ask(query: &str, k: Option<usize>, history: Option<&Path>, full: bool) -> CmdResult {
    let config = load_config()?;
    let k = k.unwrap_or(config.retrieval.top_k);
    let history = match history {
        Some(path) => read_history(path)?,
        None => Vec::new(),
    };
    let retriever = retriever(&config).await?;

    let answer = retriever
        .answer(query, &history, k, &interrupt_signal())
        .await?;

    if full {
        let report = serde_json::json!({
            "classification": answer.classification,
            "raw": answer.raw,
            "retrieved": answer.retrieved,
            "context": answer.context,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&answer.classification)?);
    }
    Ok(())
}

fn read_history(path: &Path) -> Result<Vec<Exchange>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read history {}: {e}", path.display()))?;
    parse_history(&content).map_err(|e| format!("Invalid history {}: {e}", path.display()))
}

fn parse_history(content: &str) -> Result<Vec<Exchange>, serde_json::Error> {
    serde_json::from_str(content)
}
