//! Model provider implementations for ctxprompt.
//!
//! One OpenAI-compatible HTTP client backs every remote capability the
//! pipeline consumes: embeddings, single-shot chat completions, and the
//! thread/run transport used for assistant runs.

mod http;
pub mod assistants;
pub mod openai;

pub use assistants::AssistantsTransport;
pub use openai::OpenAiProvider;

use ctxprompt_config::AppConfig;
use ctxprompt_core::error::{Error, ProviderError};
use std::sync::Arc;

/// Build the OpenAI-compatible provider from configuration.
///
/// A missing API key is a configuration error and fails here, before any
/// request is attempted.
pub fn build_provider(config: &AppConfig) -> Result<Arc<OpenAiProvider>, Error> {
    let api_key = config.api_key.as_deref().ok_or_else(|| {
        Error::config("no API key configured (set api_key or CTXPROMPT_API_KEY / OPENAI_API_KEY)")
    })?;

    let provider = OpenAiProvider::builder(&config.base_url, api_key)
        .organization(config.organization.clone())
        .chat_model(&config.chat_model)
        .embedding_model(&config.embedding_model)
        .timeout_secs(config.request_timeout_secs)
        .build()
        .map_err(config_error)?;

    Ok(Arc::new(provider))
}

/// Build the assistant-run transport sharing the provider's HTTP settings.
pub fn build_transport(config: &AppConfig) -> Result<Arc<AssistantsTransport>, Error> {
    let api_key = config
        .api_key
        .as_deref()
        .ok_or_else(|| Error::config("no API key configured for assistant runs"))?;

    let transport = AssistantsTransport::new(
        &config.base_url,
        api_key,
        config.organization.clone(),
        config.request_timeout_secs,
    )
    .map_err(config_error)?;

    Ok(Arc::new(transport))
}

fn config_error(err: ProviderError) -> Error {
    Error::config(err.to_string())
}
