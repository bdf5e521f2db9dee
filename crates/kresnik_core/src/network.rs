//! Publish/subscribe network collaborator.
//!
//! Every call is best effort. Callers log failures and carry on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// An inbound mention or direct message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub author: String,
    pub content: String,
    /// Direct messages arrive encrypted and must go through `decrypt_direct`.
    pub encrypted: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: Option<String>,
    pub about: Option<String>,
}

#[async_trait]
pub trait Network: Send + Sync {
    /// Publish a short note. Returns the network's id for it.
    async fn publish_note(&self, text: &str) -> anyhow::Result<String>;
    async fn publish_reply(&self, parent_id: &str, text: &str) -> anyhow::Result<String>;
    async fn send_direct(&self, recipient: &str, text: &str) -> anyhow::Result<()>;
    async fn decrypt_direct(&self, message: &InboundMessage) -> anyhow::Result<String>;
    /// Mentions and direct messages received since `since` (unix seconds).
    async fn fetch_inbound(&self, since: i64) -> anyhow::Result<Vec<InboundMessage>>;
    async fn fetch_profiles(&self, ids: &[String]) -> anyhow::Result<Vec<Profile>>;
}

/// Network that only logs. Used when no transport is configured.
#[derive(Debug, Default)]
pub struct LoggingNetwork;

impl LoggingNetwork {
    pub fn new() -> Self {
        Self
    }

    fn next_id(&self) -> String {
        format!("local-{}", uuid::Uuid::new_v4())
    }
}

#[async_trait]
impl Network for LoggingNetwork {
    async fn publish_note(&self, text: &str) -> anyhow::Result<String> {
        let id = self.next_id();
        tracing::info!(note_id = %id, "publish note: {}", text);
        Ok(id)
    }

    async fn publish_reply(&self, parent_id: &str, text: &str) -> anyhow::Result<String> {
        let id = self.next_id();
        tracing::info!(note_id = %id, parent = %parent_id, "publish reply: {}", text);
        Ok(id)
    }

    async fn send_direct(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        tracing::info!(recipient = %recipient, "send direct: {}", text);
        Ok(())
    }

    async fn decrypt_direct(&self, message: &InboundMessage) -> anyhow::Result<String> {
        Ok(message.content.clone())
    }

    async fn fetch_inbound(&self, _since: i64) -> anyhow::Result<Vec<InboundMessage>> {
        Ok(Vec::new())
    }

    async fn fetch_profiles(&self, _ids: &[String]) -> anyhow::Result<Vec<Profile>> {
        Ok(Vec::new())
    }
}

/// A recorded outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentItem {
    Note(String),
    Reply { parent: String, text: String },
    Direct { recipient: String, text: String },
}

/// In-memory network: records outbound calls and serves queued inbound messages.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    sent: Mutex<Vec<SentItem>>,
    inbound: Mutex<Vec<InboundMessage>>,
    profiles: Mutex<HashMap<String, Profile>>,
    fail: AtomicBool,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn push_inbound(&self, message: InboundMessage) {
        if let Ok(mut q) = self.inbound.lock() {
            q.push(message);
        }
    }

    pub fn add_profile(&self, profile: Profile) {
        if let Ok(mut p) = self.profiles.lock() {
            p.insert(profile.id.clone(), profile);
        }
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn notes(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|item| match item {
                SentItem::Note(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("network unavailable");
        }
        Ok(())
    }

    fn record(&self, item: SentItem) -> usize {
        match self.sent.lock() {
            Ok(mut s) => {
                s.push(item);
                s.len()
            }
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    async fn publish_note(&self, text: &str) -> anyhow::Result<String> {
        self.check()?;
        let n = self.record(SentItem::Note(text.to_string()));
        Ok(format!("mem-{n}"))
    }

    async fn publish_reply(&self, parent_id: &str, text: &str) -> anyhow::Result<String> {
        self.check()?;
        let n = self.record(SentItem::Reply {
            parent: parent_id.to_string(),
            text: text.to_string(),
        });
        Ok(format!("mem-{n}"))
    }

    async fn send_direct(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        self.check()?;
        self.record(SentItem::Direct {
            recipient: recipient.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn decrypt_direct(&self, message: &InboundMessage) -> anyhow::Result<String> {
        self.check()?;
        Ok(message.content.clone())
    }

    async fn fetch_inbound(&self, since: i64) -> anyhow::Result<Vec<InboundMessage>> {
        self.check()?;
        let mut q = self
            .inbound
            .lock()
            .map_err(|_| anyhow::anyhow!("inbound queue poisoned"))?;
        Ok(q.drain(..).filter(|m| m.created_at >= since).collect())
    }

    async fn fetch_profiles(&self, ids: &[String]) -> anyhow::Result<Vec<Profile>> {
        self.check()?;
        let p = self
            .profiles
            .lock()
            .map_err(|_| anyhow::anyhow!("profile map poisoned"))?;
        Ok(ids.iter().filter_map(|id| p.get(id).cloned()).collect())
    }
}
