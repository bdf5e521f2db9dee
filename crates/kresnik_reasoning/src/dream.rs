//! The dream cycle: recombine recent triads, consolidate the memory graph,
//! and optionally seed a crystal or rewrite the fluid surface.

use crate::decision::{non_empty, parse_json_lenient, SeedSubmission};
use crate::mind::{Mind, MindEvent, MindGuard};
use crate::prompts;
use anyhow::Result;
use kresnik_core::{truncate_chars, NewSynapse, SourceType, Synapse};
use kresnik_memory::{Counter, DecayReport};
use serde::Deserialize;

const DREAM_TRIADS: i64 = 10;
/// Dreams whose themes the next dream must not repeat.
const AVOID_DREAMS: i64 = 5;
const MAX_REINFORCED: usize = 5;
const DREAM_PATHWAY_DELTA: f64 = 0.05;
/// Weights from the dream synapse to the strongest reinforced synapses.
const DREAM_LINK_WEIGHTS: [f64; 3] = [0.6, 0.5, 0.4];

#[derive(Debug, Deserialize)]
struct DreamResponse {
    narrative: Option<String>,
    insight: Option<String>,
    emotional_residue: Option<String>,
    crystal_seed: Option<String>,
    fluid_surface: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DreamReport {
    pub dream_id: i64,
    pub decay: DecayReport,
    /// Synapses fired during consolidation, relevant ones first.
    pub reinforced: Vec<i64>,
    pub dream_synapse: Option<i64>,
    pub archived: Vec<i64>,
    pub snapshot_published: bool,
    pub crystallized: Vec<i64>,
    pub fluid_rewritten: bool,
}

#[derive(Debug, Clone)]
pub enum DreamOutcome {
    /// No triads yet, nothing to dream about.
    NoHistory,
    /// Generation failed or returned an unusable dream. Nothing written.
    Failed,
    Busy,
    Completed(Box<DreamReport>),
}

/// Relevant synapses first, then the globally strongest, without repeats.
fn select_for_reinforcement(relevant: Vec<Synapse>, strongest: Vec<Synapse>, limit: usize) -> Vec<Synapse> {
    let mut selected: Vec<Synapse> = Vec::with_capacity(limit);
    for synapse in relevant.into_iter().chain(strongest) {
        if selected.len() == limit {
            break;
        }
        if !selected.iter().any(|s| s.id == synapse.id) {
            selected.push(synapse);
        }
    }
    selected
}

fn snapshot_day(now: i64) -> String {
    chrono::DateTime::from_timestamp(now, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

impl Mind {
    pub async fn dream(&self) -> Result<DreamOutcome> {
        let Some(guard) = self.try_enter() else {
            tracing::debug!("Dream rejected: mind busy");
            return Ok(DreamOutcome::Busy);
        };
        self.dream_locked(&guard, kresnik_core::now()).await
    }

    #[tracing::instrument(skip_all)]
    pub async fn dream_locked(&self, guard: &MindGuard<'_>, now: i64) -> Result<DreamOutcome> {
        let store = self.store();
        let memory = &self.config().memory;

        let triads = store.recent_triads(DREAM_TRIADS).await?;
        if triads.is_empty() {
            tracing::debug!("No triads yet, skipping dream");
            return Ok(DreamOutcome::NoHistory);
        }
        let state = store.load_inner_state().await?;
        let crystals = store.get_crystallized_core().await?;
        let recent_dreams = store.recent_dreams(AVOID_DREAMS).await?;

        let system = prompts::dream_system(state.display_name(&self.config().organism.name));
        let prompt = prompts::dream_prompt(&triads, &crystals, &state.fluid_surface, &recent_dreams);
        let Ok(raw) = self.generate(&system, &prompt).await else {
            return Ok(DreamOutcome::Failed);
        };
        let response: DreamResponse = match parse_json_lenient(&raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Dream response rejected: {}", e);
                return Ok(DreamOutcome::Failed);
            }
        };
        let Some(narrative) = non_empty(response.narrative) else {
            tracing::warn!("Dream response had no narrative");
            return Ok(DreamOutcome::Failed);
        };
        let seed = match non_empty(response.crystal_seed).map(|s| SeedSubmission::parse(&s)).transpose() {
            Ok(seed) => seed,
            Err(e) => {
                tracing::warn!("Dream seed rejected: {}", e);
                return Ok(DreamOutcome::Failed);
            }
        };
        let insight = non_empty(response.insight);
        let residue = non_empty(response.emotional_residue);

        // From here on the dream happened.
        let triad_ids: Vec<i64> = triads.iter().map(|t| t.id).collect();
        let dream_id = store
            .insert_dream(&triad_ids, &narrative, insight.as_deref(), residue.as_deref(), now)
            .await?;
        store.increment_counter(Counter::Dreams).await?;

        let decay = store.decay_synapses(memory.prune_floor, now).await?;

        let focus = insight.as_deref().unwrap_or(&narrative);
        let selected = select_for_reinforcement(
            store.find_similar_synapses(focus, MAX_REINFORCED).await?,
            store.get_top_synapses(MAX_REINFORCED as i64).await?,
            MAX_REINFORCED,
        );
        let note = truncate_chars(focus, 80);
        let mut reinforced = Vec::with_capacity(selected.len());
        for synapse in &selected {
            if !store.fire_synapse(synapse.id, memory.fire_boost, now).await? {
                continue;
            }
            for pathway in store.get_pathways_for_synapse(synapse.id).await? {
                store
                    .fire_pathway(&pathway.theme, &note, DREAM_PATHWAY_DELTA, SourceType::Dream.as_str(), now)
                    .await?;
            }
            reinforced.push(synapse.id);
        }

        let mut dream_synapse = None;
        if let Some(insight) = &insight {
            let valence = {
                let mut rng = rand::thread_rng();
                self.valence()
                    .score(residue.as_deref().unwrap_or(insight), &mut rng)
            };
            let id = store
                .create_synapse(
                    &NewSynapse {
                        pattern: insight.clone(),
                        energy: memory.dream_synapse_energy,
                        decay_rate: memory.default_decay_rate,
                        valence,
                        source_type: SourceType::Dream,
                        source_triad_id: None,
                        tags: seed.iter().map(|s| s.theme.clone()).collect(),
                    },
                    now,
                )
                .await?;
            for (target, weight) in reinforced.iter().zip(DREAM_LINK_WEIGHTS) {
                store.create_connection(id, *target, weight, now).await?;
            }
            dream_synapse = Some(id);
        }

        let archived = self.archive_strongest(now).await?;
        let snapshot_published = self.publish_daily_snapshot(now).await?;

        let crystallized = match &seed {
            Some(seed) => {
                self.submit_seed(guard, &seed.theme, &seed.expression, SourceType::Dream, None, now)
                    .await?
            }
            None => Vec::new(),
        };

        let fluid_surface = non_empty(response.fluid_surface);
        if let Some(text) = &fluid_surface {
            store.set_fluid_surface(text).await?;
            tracing::info!("Dream rewrote the fluid surface");
            self.emit(MindEvent::FluidSurfaceRewritten { text: text.clone() });
        }

        tracing::info!(
            dream_id,
            reinforced = reinforced.len(),
            pruned = decay.pruned,
            "Dream completed"
        );
        self.emit(MindEvent::DreamCompleted {
            dream_id,
            reinforced: reinforced.len(),
        });

        Ok(DreamOutcome::Completed(Box::new(DreamReport {
            dream_id,
            decay,
            reinforced,
            dream_synapse,
            archived,
            snapshot_published,
            crystallized,
            fluid_rewritten: fluid_surface.is_some(),
        })))
    }

    /// Publish strong, old synapses. A synapse is marked archived only
    /// once the network accepted it.
    async fn archive_strongest(&self, now: i64) -> Result<Vec<i64>> {
        let memory = &self.config().memory;
        let candidates = self
            .store()
            .archive_candidates(
                memory.archive_limit,
                memory.archive_min_energy,
                memory.archive_min_age_hours * 3600,
                now,
            )
            .await?;

        let mut archived = Vec::new();
        for synapse in candidates {
            match self.network().publish_note(&format!("Kept: {}", synapse.pattern)).await {
                Ok(reference) => {
                    self.store().mark_archived(synapse.id, &reference, now).await?;
                    archived.push(synapse.id);
                }
                Err(e) => tracing::warn!(synapse_id = synapse.id, "Archive publish failed: {}", e),
            }
        }
        Ok(archived)
    }

    /// At most once per UTC day.
    async fn publish_daily_snapshot(&self, now: i64) -> Result<bool> {
        let day = snapshot_day(now);
        let stats = self
            .store()
            .memory_stats(self.config().memory.pathway_window_hours, now)
            .await?;
        let payload = serde_json::to_string(&stats)?;
        if !self.store().claim_daily_snapshot(&day, &payload, now).await? {
            return Ok(false);
        }

        let note = format!(
            "{day}: {} memories ({:.1} energy), {} connections, {} active pathways, {} beliefs",
            stats.synapses, stats.total_energy, stats.connections, stats.active_pathways, stats.active_crystals
        );
        if let Err(e) = self.network().publish_note(&note).await {
            tracing::warn!(day, "Daily snapshot publish failed: {}", e);
        }
        Ok(true)
    }
}
