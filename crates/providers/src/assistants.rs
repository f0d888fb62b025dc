//! Assistants v2 thread/run transport.
//!
//! Maps the [`RunTransport`] operations onto:
//!
//! | Operation        | Endpoint                                   |
//! |------------------|--------------------------------------------|
//! | `create_thread`  | `POST /threads`                            |
//! | `append_message` | `POST /threads/{thread}/messages`          |
//! | `create_run`     | `POST /threads/{thread}/runs`              |
//! | `get_run_status` | `GET /threads/{thread}/runs/{run}`         |
//! | `list_messages`  | `GET /threads/{thread}/messages?order=asc` |
//! | `cancel_run`     | `POST /threads/{thread}/runs/{run}/cancel` |
//!
//! Threads accept only `user` and `assistant` roles; system messages are sent
//! with the `user` role.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ctxprompt_core::embedding::MetadataValue;
use ctxprompt_core::error::ProviderError;
use ctxprompt_core::message::{Message, Role};
use ctxprompt_core::run::{RemoteRun, RunStatus, RunTransport, ThreadMessage};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::http::ApiClient;

const ASSISTANTS_BETA: &str = "assistants=v2";
const PAGE_LIMIT: u32 = 100;
/// The API caps message metadata at 16 pairs.
const MAX_METADATA_PAIRS: usize = 16;

pub struct AssistantsTransport {
    api: ApiClient,
}

impl AssistantsTransport {
    pub fn new(
        base_url: &str,
        api_key: &str,
        organization: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let api = ApiClient::new(base_url, api_key, organization, timeout_secs)?.with_beta(ASSISTANTS_BETA);
        debug!(base_url = %api.base_url(), "Assistants transport ready");
        Ok(Self { api })
    }

    fn wire_role(role: Role) -> &'static str {
        match role {
            Role::Assistant => "assistant",
            Role::User | Role::System => "user",
        }
    }

    /// Scalar metadata flattened to the string-only form threads accept.
    fn wire_metadata(message: &Message) -> BTreeMap<String, String> {
        message
            .metadata
            .iter()
            .take(MAX_METADATA_PAIRS)
            .map(|(k, v)| {
                let value = match v {
                    MetadataValue::Text(s) => s.clone(),
                    MetadataValue::Number(n) => n.to_string(),
                    MetadataValue::Bool(b) => b.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }

    fn parse_status(endpoint: &str, raw: &str) -> Result<RunStatus, ProviderError> {
        RunStatus::from_wire(raw).ok_or_else(|| ProviderError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message: format!("Unknown run status '{raw}'"),
        })
    }
}

#[async_trait]
impl RunTransport for AssistantsTransport {
    fn name(&self) -> &str {
        "openai_assistants"
    }

    async fn create_thread(&self) -> Result<String, ProviderError> {
        let thread: ApiObject = self.api.post_json("threads", &serde_json::json!({})).await?;
        debug!(thread_id = %thread.id, "Created thread");
        Ok(thread.id)
    }

    async fn append_message(
        &self,
        thread_id: &str,
        message: &Message,
    ) -> Result<ThreadMessage, ProviderError> {
        let mut body = serde_json::json!({
            "role": Self::wire_role(message.role),
            "content": message.content,
        });
        let metadata = Self::wire_metadata(message);
        if !metadata.is_empty() {
            body["metadata"] = serde_json::json!(metadata);
        }

        let path = format!("threads/{thread_id}/messages");
        let stored: ApiThreadMessage = self.api.post_json(&path, &body).await?;
        debug!(thread_id, message_id = %stored.id, role = %message.role, "Appended message");
        stored.into_thread_message(&format!("POST /{path}"))
    }

    async fn create_run(&self, thread_id: &str, worker_id: &str) -> Result<RemoteRun, ProviderError> {
        let path = format!("threads/{thread_id}/runs");
        let run: ApiRun = self
            .api
            .post_json(&path, &serde_json::json!({ "assistant_id": worker_id }))
            .await?;
        let status = Self::parse_status(&format!("POST /{path}"), &run.status)?;
        debug!(thread_id, run_id = %run.id, status = %status, "Created run");
        Ok(RemoteRun::new(thread_id, run.id, status))
    }

    async fn get_run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, ProviderError> {
        let path = format!("threads/{thread_id}/runs/{run_id}");
        let run: ApiRun = self.api.get_json(&path).await?;
        Self::parse_status(&format!("GET /{path}"), &run.status)
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ProviderError> {
        let endpoint = format!("GET /threads/{thread_id}/messages");
        let mut messages = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut path = format!("threads/{thread_id}/messages?order=asc&limit={PAGE_LIMIT}");
            if let Some(cursor) = &after {
                path.push_str(&format!("&after={cursor}"));
            }

            let page: ApiMessageList = self.api.get_json(&path).await?;
            let last_id = page.data.last().map(|m| m.id.clone());
            for raw in page.data {
                messages.push(raw.into_thread_message(&endpoint)?);
            }

            match (page.has_more, last_id) {
                (true, Some(id)) if after.as_deref() == Some(id.as_str()) => {
                    return Err(ProviderError::InvalidResponse {
                        endpoint,
                        message: format!("pagination cursor did not advance past {id}"),
                    });
                }
                (true, Some(id)) => after = Some(id),
                _ => break,
            }
        }

        debug!(thread_id, count = messages.len(), "Listed thread messages");
        Ok(messages)
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, ProviderError> {
        let path = format!("threads/{thread_id}/runs/{run_id}/cancel");
        let run: ApiRun = self.api.post_json(&path, &serde_json::json!({})).await?;
        let status = Self::parse_status(&format!("POST /{path}"), &run.status)?;
        debug!(thread_id, run_id, status = %status, "Requested run cancellation");
        Ok(status)
    }
}

// --- Assistants API types ---

#[derive(Debug, Deserialize)]
struct ApiObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiRun {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessageList {
    data: Vec<ApiThreadMessage>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ApiThreadMessage {
    id: String,
    role: String,
    /// Unix seconds.
    created_at: i64,
    #[serde(default)]
    content: Vec<ApiContentPart>,
}

#[derive(Debug, Deserialize)]
struct ApiContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<ApiText>,
}

#[derive(Debug, Deserialize)]
struct ApiText {
    value: String,
}

impl ApiThreadMessage {
    fn into_thread_message(self, endpoint: &str) -> Result<ThreadMessage, ProviderError> {
        let invalid = |message: String| ProviderError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message,
        };

        let role = match self.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => return Err(invalid(format!("Unexpected message role '{other}'"))),
        };
        let created_at: DateTime<Utc> = DateTime::from_timestamp(self.created_at, 0)
            .ok_or_else(|| invalid(format!("Invalid created_at {}", self.created_at)))?;

        let content = self
            .content
            .into_iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text.map(|t| t.value))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ThreadMessage {
            id: self.id,
            role,
            content,
            created_at,
        })
    }
}
