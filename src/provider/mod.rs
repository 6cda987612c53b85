//! Model-provider clients.
//!
//! Stages only see [`ChatProvider`]; which concrete API sits behind it is
//! decided once at startup by [`from_settings`].

pub mod anthropic;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use traits::{ChatProvider, CompletionRequest};

use crate::config::{ProviderKind, ProviderSettings};
use crate::error::ConfigError;

/// Build the shared provider client for the resolved settings.
pub fn from_settings(
    settings: &ProviderSettings,
    timeout: Duration,
) -> Result<Arc<dyn ChatProvider>, ConfigError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ConfigError::Client)?;

    let provider: Arc<dyn ChatProvider> = match settings.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            client,
            settings.api_key.clone(),
            settings.model.clone(),
            settings.base_url.clone(),
        )),
        kind @ (ProviderKind::Openai | ProviderKind::Github) => Arc::new(OpenAiProvider::new(
            client,
            kind.label(),
            settings.api_key.clone(),
            settings.model.clone(),
            settings.base_url.clone(),
        )),
    };

    tracing::info!(
        provider = provider.name(),
        model = provider.model(),
        "Model provider initialized"
    );
    Ok(provider)
}
