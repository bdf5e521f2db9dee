use crate::api_types::{Message, MessagesResponse};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

/// Parameters for one generation call.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    /// Maximum tokens to generate (will be clamped to provider limits)
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.8,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<MessagesResponse>;
}

/// Why a generation produced nothing usable.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Failed(#[source] anyhow::Error),
    #[error("generation returned no text")]
    Empty,
}

/// Run one system + user prompt exchange and return the trimmed text.
///
/// Every failure mode collapses to a [`GenerationError`]; callers treat it
/// as "no result".
pub async fn generate(
    client: &dyn LlmClient,
    system: &str,
    prompt: &str,
    params: CompletionParams,
) -> Result<String, GenerationError> {
    let response = client
        .complete(system, vec![Message::user(prompt)], params)
        .await
        .map_err(GenerationError::Failed)?;

    let text = response.text().trim().to_string();
    if text.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text)
}
