//! Deterministic clients for running without API keys and for tests.

use crate::api_types::{Message, MessagesResponse};
use crate::llm::{CompletionParams, LlmClient};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Canned decision returned when a JSON answer is requested.
const MOCK_DECISION: &str = r#"{"choice":"silence","reason":"(mock) nothing to add","inner_shift":"","mood":"calm","energy_delta":0.0}"#;

#[derive(Debug, Clone)]
pub struct MockProvider {
    model: String,
}

impl MockProvider {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for MockProvider {
    async fn complete(
        &self,
        system: &str,
        _messages: Vec<Message>,
        _params: CompletionParams,
    ) -> Result<MessagesResponse> {
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        if system.contains("JSON") {
            return Ok(MessagesResponse::from_text(MOCK_DECISION));
        }
        Ok(MessagesResponse::from_text(format!(
            "(mock {}) I received your prompt.",
            self.model
        )))
    }
}

/// Returns queued responses in order and records every prompt it saw.
/// An exhausted queue is an error, the same as a failed request.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<(String, String)>>,
    call_count: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            ..Default::default()
        }
    }

    pub async fn push(&self, text: impl Into<String>) {
        self.responses.lock().await.push_back(Ok(text.into()));
    }

    /// Queue a transport failure.
    pub async fn push_error(&self, message: impl Into<String>) {
        self.responses.lock().await.push_back(Err(message.into()));
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }

    /// `(system, user)` pairs in call order.
    pub async fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        system: &str,
        messages: Vec<Message>,
        _params: CompletionParams,
    ) -> Result<MessagesResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let user = messages.iter().map(Message::text).collect::<Vec<_>>().join("\n");
        self.prompts.lock().await.push((system.to_string(), user));

        match self.responses.lock().await.pop_front() {
            Some(Ok(text)) => Ok(MessagesResponse::from_text(text)),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Err(anyhow::anyhow!("scripted responses exhausted")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_complete() {
        let provider = MockProvider::new("test-model");
        let resp = provider
            .complete("system", vec![], CompletionParams::default())
            .await
            .unwrap();
        let text = resp.text();
        assert!(text.contains("mock"));
        assert!(text.contains("test-model"));
    }

    #[tokio::test]
    async fn test_mock_answers_json_when_asked() {
        let provider = MockProvider::new("m");
        let resp = provider
            .complete("Answer in JSON only.", vec![], CompletionParams::default())
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&resp.text()).unwrap();
        assert_eq!(v["choice"], "silence");
    }

    #[tokio::test]
    async fn test_scripted_pops_in_order_then_fails() {
        let llm = ScriptedLlm::new(["one", "two"]);
        llm.push_error("boom").await;

        let p = CompletionParams::default();
        assert_eq!(llm.complete("s", vec![Message::user("a")], p.clone()).await.unwrap().text(), "one");
        assert_eq!(llm.complete("s", vec![Message::user("b")], p.clone()).await.unwrap().text(), "two");
        assert!(llm.complete("s", vec![], p.clone()).await.is_err());
        assert!(llm.complete("s", vec![], p).await.is_err());

        assert_eq!(llm.calls(), 4);
        let prompts = llm.prompts().await;
        assert_eq!(prompts[1].1, "b");
    }
}
