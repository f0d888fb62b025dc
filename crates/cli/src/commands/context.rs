//! `ctxprompt add|search|count|delete|clear`: Context store commands.

use ctxprompt_config::{AppConfig, StoreConfig};
use ctxprompt_core::embedding::{Metadata, MetadataValue};

use super::{CmdResult, interrupt_signal, load_config, retriever};

pub async fn add(text: &str, id: Option<String>, meta: &[String]) -> CmdResult {
    let config = load_config()?;
    let metadata = parse_meta(meta)?;
    warn_if_ephemeral(&config);

    let retriever = retriever(&config).await?;
    let id = retriever
        .add_context(text, id, metadata, &interrupt_signal())
        .await?;
    println!("✅ Stored '{id}' ({} items in {})", retriever.store().count().await?, retriever.store().kind());
    Ok(())
}

pub async fn search(query: &str, k: Option<usize>) -> CmdResult {
    let config = load_config()?;
    let k = k.unwrap_or(config.retrieval.top_k);
    let retriever = retriever(&config).await?;

    println!("🔍 Top {k} for: \"{query}\"");
    println!();

    let results = retriever.similar_context(query, k, &interrupt_signal()).await?;
    if results.is_empty() {
        println!("   No stored context.");
    }
    for (i, item) in results.iter().enumerate() {
        let text = item.embedding.text();
        println!(
            "  {:>2}. [score: {:.4}] {}",
            i + 1,
            item.score,
            text.chars().take(80).collect::<String>()
        );
        if item.embedding.id != text {
            println!("      id: {}", item.embedding.id);
        }
    }
    Ok(())
}

pub async fn count() -> CmdResult {
    let config = load_config()?;
    let store = ctxprompt_store::build_store(&config.store).await?;
    println!("{}", store.count().await?);
    Ok(())
}

pub async fn delete(id: &str) -> CmdResult {
    let config = load_config()?;
    let store = ctxprompt_store::build_store(&config.store).await?;
    store.delete(id).await?;
    println!("🗑️  Deleted '{id}'");
    Ok(())
}

pub async fn clear(confirm: bool) -> CmdResult {
    if !confirm {
        return Err("Refusing to clear the store without --confirm".into());
    }

    let config = load_config()?;
    let store = ctxprompt_store::build_store(&config.store).await?;
    store.clear().await?;
    println!("🗑️  Cleared {} store", store.kind());
    Ok(())
}

fn warn_if_ephemeral(config: &AppConfig) {
    if matches!(config.store, StoreConfig::InMemory) {
        eprintln!("   ⚠️  store.backend is in_memory: stored context lives only for this process");
    }
}

/// Parse `key=value` pairs. Values that read as a bool or a number keep that
/// type; everything else is text.
fn parse_meta(pairs: &[String]) -> Result<Metadata, String> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("metadata must be KEY=VALUE, got '{pair}'"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("metadata key is empty in '{pair}'"));
        }

        let value = if let Ok(b) = value.parse::<bool>() {
            MetadataValue::Bool(b)
        } else if let Ok(n) = value.parse::<f64>() {
            MetadataValue::Number(n)
        } else {
            MetadataValue::Text(value.to_string())
        };
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}
