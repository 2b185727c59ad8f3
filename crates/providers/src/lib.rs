//! LLM Provider implementations for envmedic.
//!
//! All providers implement the `envmedic_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use envmedic_config::AppConfig;
use envmedic_core::error::ProviderError;
use envmedic_core::provider::Provider;
use std::sync::Arc;

/// Build the provider described by the configuration.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .require_api_key()
        .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;
    let name = if config.api_url.contains("api.openai.com") {
        "openai"
    } else {
        "openai-compatible"
    };
    tracing::debug!(provider = name, url = %config.api_url, model = %config.model, "Building provider");
    Ok(Arc::new(OpenAiCompatProvider::new(name, &config.api_url, api_key)?))
}
