//! Provider selection: builds the completion client named by config.

use std::sync::Arc;

use arena_config::AppConfig;
use arena_core::completion::CompletionClient;
use arena_core::error::ProviderError;
use tracing::warn;

use crate::anthropic::AnthropicClient;

/// Build the configured completion client.
///
/// A missing API key is not fatal here: the server still serves tasks and
/// battles, and iterate calls fail with an authentication error.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn CompletionClient>, ProviderError> {
    match config.default_provider.as_str() {
        "anthropic" => {
            let api_key = config.api_key.clone().unwrap_or_else(|| {
                warn!("No API key configured; iterate calls will fail");
                String::new()
            });

            let mut client = AnthropicClient::new(api_key);
            if let Some(ref url) = config.api_url {
                client = client.with_base_url(url);
            }
            Ok(Arc::new(client))
        }
        other => Err(ProviderError::NotConfigured(format!(
            "unknown provider '{other}' (supported: anthropic)"
        ))),
    }
}
