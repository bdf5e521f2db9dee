pub mod anthropic;
pub mod mock;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use mock::{MockProvider, ScriptedLlm};
pub use openai::OpenAiClient;

use crate::llm::LlmClient;
use anyhow::Result;
use kresnik_core::config::LlmConfig;
use std::sync::Arc;

/// Build the client named by `config.provider`.
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let base_url = config.base_url.as_deref();
    let client: Arc<dyn LlmClient> = match config.provider.as_str() {
        "anthropic" => Arc::new(AnthropicClient::new(&config.model, base_url)?),
        "openai" => Arc::new(OpenAiClient::new(&config.model, base_url)?),
        "mock" => Arc::new(MockProvider::new(&config.model)),
        other => anyhow::bail!("unknown LLM provider: {other} (expected anthropic, openai or mock)"),
    };
    tracing::info!(provider = %config.provider, model = %config.model, "LLM client ready");
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_mock_and_reject_unknown() {
        let mut cfg = LlmConfig {
            provider: "mock".into(),
            ..Default::default()
        };
        assert!(build_client(&cfg).is_ok());
        cfg.provider = "carrier-pigeon".into();
        assert!(build_client(&cfg).is_err());
    }
}
