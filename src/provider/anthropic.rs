//! Anthropic Messages API client.

use async_trait::async_trait;
use serde_json::json;

use super::traits::{ChatProvider, CompletionRequest};
use crate::error::ProviderError;

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// Claude via `POST {base}/v1/messages`.
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client, api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn payload(&self, request: &CompletionRequest) -> serde_json::Value {
        // The Messages API has no JSON mode; the system prompt asks for JSON
        // and the stage strips any markdown fence around it.
        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system,
            "messages": [{
                "role": "user",
                "content": request.user,
            }]
        })
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let transport = |source| ProviderError::Transport {
            provider: PROVIDER,
            source,
        };

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.payload(request))
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status,
                body,
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(transport)?;
        body["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or(ProviderError::EmptyReply { provider: PROVIDER })
    }
}
