//! Shared HTTP plumbing: auth headers, status mapping, JSON decoding.
//!
//! Every error names the endpoint (`METHOD /path`) that produced it.

use ctxprompt_core::error::ProviderError;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    base_url: String,
    api_key: String,
    organization: Option<String>,
    /// Value for the `OpenAI-Beta` header, when the API surface needs one.
    beta: Option<&'static str>,
    client: reqwest::Client,
}

impl ApiClient {
    pub(crate) fn new(
        base_url: &str,
        api_key: &str,
        organization: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            organization,
            beta: None,
            client,
        })
    }

    pub(crate) fn with_beta(mut self, beta: &'static str) -> Self {
        self.beta = Some(beta);
        self
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut builder = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.api_key));
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        if let Some(beta) = self.beta {
            builder = builder.header("OpenAI-Beta", beta);
        }
        builder
    }

    pub(crate) async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let endpoint = endpoint_name(&Method::POST, path);
        let builder = self.request(Method::POST, path).json(body);
        self.send(endpoint, builder).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let endpoint = endpoint_name(&Method::GET, path);
        let builder = self.request(Method::GET, path);
        self.send(endpoint, builder).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: String,
        builder: RequestBuilder,
    ) -> Result<T, ProviderError> {
        debug!(endpoint = %endpoint, "Sending provider request");

        let response = builder.send().await.map_err(|e| ProviderError::Network {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;

        let response = check_status(&endpoint, response).await?;

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                endpoint,
                message: format!("Failed to parse response: {e}"),
            })
    }
}

/// `POST /threads/{id}/runs` style label, query string dropped.
fn endpoint_name(method: &Method, path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    format!("{method} /{}", path.trim_start_matches('/'))
}

async fn check_status(endpoint: &str, response: Response) -> Result<Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        warn!(endpoint = %endpoint, retry_after_secs, "Provider rate limited request");
        return Err(ProviderError::RateLimited {
            endpoint: endpoint.to_string(),
            retry_after_secs,
        });
    }

    if status == 401 || status == 403 {
        warn!(endpoint = %endpoint, status, "Provider rejected credentials");
        return Err(ProviderError::AuthenticationFailed {
            endpoint: endpoint.to_string(),
            message: "Invalid API key or insufficient permissions".into(),
        });
    }

    if !response.status().is_success() {
        let error_body = response.text().await.unwrap_or_default();
        warn!(endpoint = %endpoint, status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            endpoint: endpoint.to_string(),
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}
