//! The single seam between stages and a model API.

use async_trait::async_trait;

use crate::error::ProviderError;

/// One role-tagged completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// System message guiding the model.
    pub system: String,
    /// User message carrying the payload.
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider for a JSON object reply where the API supports it.
    pub json_response: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.7,
            max_tokens: 2000,
            json_response: true,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json_response(mut self, enabled: bool) -> Self {
        self.json_response = enabled;
        self
    }
}

/// A stateless text-completion client.
///
/// Implementations hold no per-request state, so one instance can be shared
/// (behind an `Arc`) by every stage and by concurrent pipeline runs.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider family name, used in logs.
    fn name(&self) -> &'static str;

    /// Model identifier sent with each request.
    fn model(&self) -> &str;

    /// Issue exactly one completion call and return the raw reply text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}
