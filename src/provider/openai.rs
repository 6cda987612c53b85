//! OpenAI-compatible chat completions client (OpenAI, GitHub Models, proxies).

use async_trait::async_trait;
use serde_json::json;

use super::traits::{ChatProvider, CompletionRequest};
use crate::error::ProviderError;

/// Any endpoint speaking `POST {base}/chat/completions` with bearer auth.
pub struct OpenAiProvider {
    label: &'static str,
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// `label` names the flavour in logs and errors ("openai", "github").
    pub fn new(
        client: reqwest::Client,
        label: &'static str,
        api_key: String,
        model: String,
        base_url: String,
    ) -> Self {
        Self {
            label,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn payload(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut payload = json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ]
        });
        if request.json_response {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        self.label
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let provider = self.label;
        let transport = |source| ProviderError::Transport { provider, source };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.payload(request))
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider,
                status,
                body,
            });
        }

        let body: serde_json::Value = resp.json().await.map_err(transport)?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or(ProviderError::EmptyReply { provider })
    }
}
