//! Completion client implementations for Tidepool.
//!
//! The generation service is abstracted behind
//! [`tidepool_core::CompletionClient`]; this crate provides the Anthropic
//! Messages API adapter and the config-driven constructor used by the
//! gateway and CLI.

pub mod anthropic;

pub use anthropic::AnthropicClient;

use std::sync::Arc;
use tidepool_core::{CompletionClient, ProviderError};

/// Build the completion client from application config.
///
/// Fails fast when no API key is available — the gateway refuses to start
/// rather than erroring on the first chat request.
pub fn from_config(
    config: &tidepool_config::AppConfig,
) -> Result<Arc<dyn CompletionClient>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "No API key configured — set TIDEPOOL_API_KEY or ANTHROPIC_API_KEY".into(),
        )
    })?;

    Ok(Arc::new(AnthropicClient::new(api_key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_without_key_fails() {
        let config = tidepool_config::AppConfig::default();
        let result = from_config(&config);
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn from_config_with_key_builds_client() {
        let config = tidepool_config::AppConfig {
            api_key: Some("sk-ant-test".into()),
            ..Default::default()
        };
        let client = from_config(&config).unwrap();
        assert_eq!(client.name(), "anthropic");
    }
}
