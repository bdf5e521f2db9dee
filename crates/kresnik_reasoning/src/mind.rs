//! The `Mind`: store, generation client, network and the single gate that
//! serializes every triad and dream.

use crate::llm::{generate, CompletionParams, GenerationError, LlmClient};
use anyhow::Result;
use kresnik_core::{KeywordValence, KresnikConfig, Network, SourceType, ValenceScorer};
use kresnik_memory::SqliteStore;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, MutexGuard};

const EVENT_CAPACITY: usize = 64;

/// Notifications for dashboards, logs and tests. Sending never blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum MindEvent {
    TriadCompleted { triad_id: i64, choice: kresnik_core::Choice },
    FluidSurfaceRewritten { text: String },
    SeedAccepted { theme: String, total: i64 },
    Crystallized { crystal_id: i64, theme: String },
    CrystalDissolved { crystal_id: i64, reason: String },
    DreamCompleted { dream_id: i64, reinforced: usize },
    ProcessNamed { words: [String; 3], name: Option<String> },
    ProcessRevised { version: i64, crystallized: bool },
    Expressed { note_id: String, text: String },
    GrowthPhaseChanged { phase: kresnik_core::GrowthPhase },
}

/// Proof of holding the gate. Operations that must not interleave with a
/// triad or a dream take `&MindGuard`.
pub struct MindGuard<'a> {
    _lock: MutexGuard<'a, ()>,
}

pub struct Mind {
    store: SqliteStore,
    llm: Arc<dyn LlmClient>,
    network: Arc<dyn Network>,
    valence: Arc<dyn ValenceScorer>,
    config: KresnikConfig,
    events: broadcast::Sender<MindEvent>,
    gate: Mutex<()>,
}

impl Mind {
    pub fn new(
        store: SqliteStore,
        llm: Arc<dyn LlmClient>,
        network: Arc<dyn Network>,
        config: KresnikConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            llm,
            network,
            valence: Arc::new(KeywordValence),
            config,
            events,
            gate: Mutex::new(()),
        }
    }

    /// Replace the dream-synapse valence scorer.
    pub fn with_valence(mut self, valence: Arc<dyn ValenceScorer>) -> Self {
        self.valence = valence;
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn config(&self) -> &KresnikConfig {
        &self.config
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub(crate) fn valence(&self) -> &dyn ValenceScorer {
        self.valence.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MindEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: MindEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Take the gate without waiting. `None` means a triad or dream is in
    /// flight.
    pub fn try_enter(&self) -> Option<MindGuard<'_>> {
        self.gate.try_lock().ok().map(|lock| MindGuard { _lock: lock })
    }

    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    pub(crate) fn params(&self) -> CompletionParams {
        CompletionParams {
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
        }
    }

    /// One generation call with the configured parameters. Failures are
    /// logged here and returned so callers can abort.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let result = generate(self.llm.as_ref(), system, prompt, self.params()).await;
        if let Err(e) = &result {
            tracing::warn!("Generation failed: {}", e);
        }
        result
    }

    /// The entity's self-chosen name, or the configured one.
    pub async fn entity_name(&self) -> Result<String> {
        let state = self.store.load_inner_state().await?;
        Ok(state.display_name(&self.config.organism.name).to_string())
    }

    /// Submit a seed and promote every theme that now qualifies. Returns
    /// the ids of crystals formed.
    pub async fn submit_seed(
        &self,
        _guard: &MindGuard<'_>,
        theme: &str,
        expression: &str,
        source: SourceType,
        source_triad_id: Option<i64>,
        now: i64,
    ) -> Result<Vec<i64>> {
        let total = self
            .store
            .add_crystal_seed(theme, expression, source, source_triad_id, now)
            .await?;
        tracing::info!(theme, source = %source, total, "Seed accepted");
        self.emit(MindEvent::SeedAccepted {
            theme: theme.trim().to_string(),
            total,
        });

        let threshold = self.config.memory.crystallization_threshold;
        let mut formed = Vec::new();
        for candidate in self.store.check_crystallization(threshold).await? {
            let crystal_id = self
                .store
                .crystallize(
                    &candidate.theme,
                    &candidate.expression,
                    candidate.total_strength,
                    &candidate.sources,
                    now,
                )
                .await?;
            self.on_crystallized(crystal_id, &candidate.theme, &candidate.expression)
                .await?;
            formed.push(crystal_id);
        }
        Ok(formed)
    }

    /// Entity-core redefinition hook: the crystal joins the beliefs and is
    /// announced on the network.
    async fn on_crystallized(&self, crystal_id: i64, theme: &str, crystal: &str) -> Result<()> {
        self.store
            .push_belief(crystal, self.config.triad.beliefs_cap)
            .await?;
        self.emit(MindEvent::Crystallized {
            crystal_id,
            theme: theme.to_string(),
        });

        let note = format!("Something settled in me. {theme}: {crystal}");
        if let Err(e) = self.network.publish_note(&note).await {
            tracing::warn!(crystal_id, "Failed to announce crystal: {}", e);
        }
        Ok(())
    }
}
