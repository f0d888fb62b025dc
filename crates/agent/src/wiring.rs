//! Build a ready [`Retriever`] from configuration.

use ctxprompt_config::{AppConfig, ModeConfig};
use ctxprompt_core::error::Error;
use ctxprompt_core::provider::CompletionOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::classification::NormalizationPolicy;
use crate::context::{AssemblerConfig, ContextAssembler, HeuristicTokenCounter};
use crate::orchestrator::{RunOrchestrator, RunPolicy};
use crate::retriever::{Executor, Retriever};

/// Wire provider, store, assembler, and executor per `config`.
pub async fn build_retriever(config: &AppConfig) -> Result<Retriever, Error> {
    let provider = ctxprompt_providers::build_provider(config)?;
    let store = ctxprompt_store::build_store(&config.store).await?;

    let assembler = ContextAssembler::new(
        AssemblerConfig::try_from(&config.context)?,
        Arc::new(HeuristicTokenCounter),
    );
    assembler.validate()?;

    let executor = match &config.mode {
        ModeConfig::Classic => Executor::Classic {
            provider: provider.clone(),
            options: CompletionOptions {
                model: Some(config.chat_model.clone()),
                temperature: config.temperature,
                max_tokens: None,
            },
        },
        ModeConfig::AssistantRun { assistant_id } => {
            let transport = ctxprompt_providers::build_transport(config)?;
            Executor::AssistantRun {
                orchestrator: RunOrchestrator::new(
                    transport,
                    assistant_id.clone(),
                    RunPolicy::from(&config.run),
                ),
                timeout: Duration::from_secs(config.run.timeout_secs),
            }
        }
    };

    let retriever = Retriever::new(provider, store, assembler, executor)
        .with_normalization(NormalizationPolicy::from(&config.normalization));

    info!(
        mode = retriever.mode(),
        store = retriever.store().kind(),
        chat_model = %config.chat_model,
        embedding_model = %config.embedding_model,
        "Retriever ready"
    );
    Ok(retriever)
}
