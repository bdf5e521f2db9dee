//! The triad: first response, self-observation, synthesis.
//!
//! Phases run strictly in order and each feeds the next. Nothing is written
//! until synthesis has produced a valid decision; a failed phase leaves the
//! store untouched.

use crate::decision::SynthesisDecision;
use crate::mind::{Mind, MindEvent, MindGuard};
use crate::prompts::{self, TriadContext};
use anyhow::Result;
use kresnik_core::{truncate_chars, Choice, Direction, NewSynapse, NewTriad, TriggerType};
use kresnik_memory::Counter;
use std::fmt;

/// Stimuli shorter than this do not leave a synapse behind.
const MIN_SYNAPSE_CHARS: usize = 12;
/// Trust added to pathways of a recalled synapse.
const RECALL_PATHWAY_DELTA: f64 = 0.05;
/// Trust added to the pathway of a freshly submitted seed theme.
const SEED_PATHWAY_DELTA: f64 = 0.1;
const CONTEXT_CONVERSATION: i64 = 10;
const CONTEXT_RECALL: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Stimulus {
    pub trigger: TriggerType,
    pub content: String,
    pub author: Option<String>,
    /// Conversation-log channel (`stdin`, `network`, ...).
    pub channel: String,
}

impl Stimulus {
    pub fn conversation(author: &str, content: &str) -> Self {
        Self {
            trigger: TriggerType::Conversation,
            content: content.to_string(),
            author: Some(author.to_string()),
            channel: "direct".to_string(),
        }
    }

    pub fn mention(author: &str, content: &str) -> Self {
        Self {
            trigger: TriggerType::Mention,
            content: content.to_string(),
            author: Some(author.to_string()),
            channel: "network".to_string(),
        }
    }

    /// Internal stimulus with no author.
    pub fn internal(trigger: TriggerType, content: &str) -> Self {
        Self {
            trigger,
            content: content.to_string(),
            author: None,
            channel: "inner".to_string(),
        }
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    fn is_inbound_speech(&self) -> bool {
        matches!(self.trigger, TriggerType::Conversation | TriggerType::Mention)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriadPhase {
    FirstResponse,
    SelfObservation,
    Synthesis,
}

impl fmt::Display for TriadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriadPhase::FirstResponse => "first response",
            TriadPhase::SelfObservation => "self-observation",
            TriadPhase::Synthesis => "synthesis",
        })
    }
}

#[derive(Debug, Clone)]
pub struct TriadReport {
    pub triad_id: i64,
    pub thesis: String,
    pub antithesis: String,
    pub decision: SynthesisDecision,
    pub synapse_id: Option<i64>,
    pub crystallized: Vec<i64>,
    pub dissolved: Option<i64>,
}

impl TriadReport {
    /// Text to say outward, if the choice speaks.
    pub fn outward_content(&self) -> Option<&str> {
        if self.decision.choice.is_outward() {
            self.decision.content.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub enum TriadOutcome {
    Completed(Box<TriadReport>),
    /// A phase produced nothing usable. No state changed.
    Aborted { phase: TriadPhase },
    /// Another triad or a dream holds the gate.
    Busy,
}

impl Mind {
    /// Run one triad, rejecting with `Busy` if the gate is held.
    pub async fn run_triad(&self, stimulus: &Stimulus) -> Result<TriadOutcome> {
        let Some(guard) = self.try_enter() else {
            tracing::debug!(trigger = %stimulus.trigger, "Triad rejected: mind busy");
            return Ok(TriadOutcome::Busy);
        };
        self.run_triad_locked(&guard, stimulus, kresnik_core::now()).await
    }

    #[tracing::instrument(skip_all, fields(trigger = %stimulus.trigger))]
    pub async fn run_triad_locked(
        &self,
        guard: &MindGuard<'_>,
        stimulus: &Stimulus,
        now: i64,
    ) -> Result<TriadOutcome> {
        let ctx = self.triad_context(stimulus, now).await?;
        let system = ctx.system_prompt();

        let thesis_prompt =
            prompts::phase1_prompt(&ctx, stimulus.trigger, stimulus.author.as_deref(), &stimulus.content);
        let Ok(thesis) = self.generate(&system, &thesis_prompt).await else {
            return Ok(TriadOutcome::Aborted {
                phase: TriadPhase::FirstResponse,
            });
        };

        let antithesis_prompt = prompts::phase2_prompt(&ctx, &stimulus.content, &thesis);
        let Ok(antithesis) = self.generate(&system, &antithesis_prompt).await else {
            return Ok(TriadOutcome::Aborted {
                phase: TriadPhase::SelfObservation,
            });
        };

        let synthesis_prompt = prompts::synthesis_prompt(&ctx, &stimulus.content, &thesis, &antithesis);
        let Ok(raw) = self.generate(&prompts::synthesis_system(&ctx), &synthesis_prompt).await else {
            return Ok(TriadOutcome::Aborted {
                phase: TriadPhase::Synthesis,
            });
        };
        let decision = match SynthesisDecision::parse(&raw, self.config().triad.energy_delta_bound) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Synthesis rejected: {}", e);
                return Ok(TriadOutcome::Aborted {
                    phase: TriadPhase::Synthesis,
                });
            }
        };

        let report = self
            .apply_decision(guard, stimulus, &ctx, thesis, antithesis, decision, now)
            .await?;
        tracing::info!(
            triad_id = report.triad_id,
            choice = %report.decision.choice,
            "Triad completed"
        );

        self.run_process_routines(guard, now).await?;
        Ok(TriadOutcome::Completed(Box::new(report)))
    }

    async fn triad_context(&self, stimulus: &Stimulus, now: i64) -> Result<TriadContext> {
        let store = self.store();
        let state = store.load_inner_state().await?;
        let identity = match &stimulus.author {
            Some(author) => store.get_identity(author).await?,
            None => None,
        };
        Ok(TriadContext {
            name: state.display_name(&self.config().organism.name).to_string(),
            crystals: store.get_crystallized_core().await?,
            conversation: store.recent_conversation(CONTEXT_CONVERSATION).await?,
            recalled: store.find_similar_synapses(&stimulus.content, CONTEXT_RECALL).await?,
            identity,
            process: store.load_process_words().await?,
            resonance: store
                .get_pathway_resonance(self.config().memory.pathway_window_hours, now)
                .await?,
            state,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_decision(
        &self,
        guard: &MindGuard<'_>,
        stimulus: &Stimulus,
        ctx: &TriadContext,
        thesis: String,
        antithesis: String,
        decision: SynthesisDecision,
        now: i64,
    ) -> Result<TriadReport> {
        let store = self.store();
        let memory = &self.config().memory;

        let triad_id = store
            .insert_triad(
                &NewTriad {
                    trigger_type: stimulus.trigger,
                    trigger_content: stimulus.content.clone(),
                    author: stimulus.author.clone(),
                    thesis: thesis.clone(),
                    antithesis: antithesis.clone(),
                    choice: decision.choice,
                    reason: decision.reason.clone(),
                    content: decision.content.clone(),
                    inner_shift: decision.inner_shift.clone(),
                    mood_before: ctx.state.mood.clone(),
                    mood_after: decision.mood.clone(),
                },
                now,
            )
            .await?;

        store.apply_mood_energy(&decision.mood, decision.energy_delta).await?;
        store.increment_counter(counter_for(decision.choice)).await?;

        let author = stimulus.author.as_deref().unwrap_or("self");
        if stimulus.is_inbound_speech() {
            store.touch_interaction(now).await?;
            store
                .log_conversation(&stimulus.channel, author, Direction::Inbound, &stimulus.content, now)
                .await?;
        }
        if let Some(content) = decision.content.as_deref().filter(|_| decision.choice.is_outward()) {
            store
                .log_conversation(&stimulus.channel, &ctx.name, Direction::Outbound, content, now)
                .await?;
        }

        if !decision.inner_shift.is_empty() {
            store.record_observation("inner_shift", &decision.inner_shift, now).await?;
        }

        if let Some(author) = stimulus.author.as_deref() {
            let (name, notes) = match &decision.learned_identity {
                Some(learned) => (learned.name.clone(), learned.notes.clone()),
                None => (
                    ctx.identity
                        .as_ref()
                        .map(|i| i.name.clone())
                        .unwrap_or_else(|| author.to_string()),
                    None,
                ),
            };
            store.upsert_identity(author, &name, notes.as_deref(), now).await?;
        }

        if let Some(text) = &decision.fluid_surface {
            store.set_fluid_surface(text).await?;
            tracing::info!("Fluid surface rewritten");
            self.emit(MindEvent::FluidSurfaceRewritten { text: text.clone() });
        }

        let source = stimulus.trigger.source_type();
        let mut synapse_id = None;
        if stimulus.content.trim().chars().count() >= MIN_SYNAPSE_CHARS {
            if let Some(recalled) = store.find_similar_synapses(&stimulus.content, 1).await?.first() {
                store.fire_synapse(recalled.id, memory.fire_boost, now).await?;
                for pathway in store.get_pathways_for_synapse(recalled.id).await? {
                    store
                        .fire_pathway(&pathway.theme, &truncate_chars(&stimulus.content, 80), RECALL_PATHWAY_DELTA, source.as_str(), now)
                        .await?;
                }
            }

            let tags = decision
                .crystal_seed
                .as_ref()
                .map(|s| vec![s.theme.clone()])
                .unwrap_or_default();
            let bound = self.config().triad.energy_delta_bound.max(f64::EPSILON);
            synapse_id = Some(
                store
                    .create_synapse(
                        &NewSynapse {
                            pattern: stimulus.content.clone(),
                            energy: memory.conversation_synapse_energy,
                            decay_rate: memory.default_decay_rate,
                            valence: (decision.energy_delta / bound).clamp(-1.0, 1.0),
                            source_type: source,
                            source_triad_id: Some(triad_id),
                            tags,
                        },
                        now,
                    )
                    .await?,
            );
        }

        let mut crystallized = Vec::new();
        if let Some(seed) = &decision.crystal_seed {
            store
                .fire_pathway(&seed.theme, &seed.expression, SEED_PATHWAY_DELTA, source.as_str(), now)
                .await?;
            crystallized = self
                .submit_seed(guard, &seed.theme, &seed.expression, source, Some(triad_id), now)
                .await?;
        }

        let mut dissolved = None;
        if let Some(request) = &decision.dissolve {
            if store
                .dissolve_crystal(request.crystal_id, &request.reason, now)
                .await?
            {
                dissolved = Some(request.crystal_id);
                self.emit(MindEvent::CrystalDissolved {
                    crystal_id: request.crystal_id,
                    reason: request.reason.clone(),
                });
            } else {
                tracing::debug!(crystal_id = request.crystal_id, "Dissolve ignored: no such active crystal");
            }
        }

        self.emit(MindEvent::TriadCompleted {
            triad_id,
            choice: decision.choice,
        });

        Ok(TriadReport {
            triad_id,
            thesis,
            antithesis,
            decision,
            synapse_id,
            crystallized,
            dissolved,
        })
    }
}

fn counter_for(choice: Choice) -> Counter {
    if choice.is_outward() {
        Counter::Expressions
    } else {
        Counter::Silences
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_for_choice() {
        assert_eq!(counter_for(Choice::Respond), Counter::Expressions);
        assert_eq!(counter_for(Choice::Question), Counter::Expressions);
        assert_eq!(counter_for(Choice::Express), Counter::Expressions);
        assert_eq!(counter_for(Choice::Silence), Counter::Silences);
        assert_eq!(counter_for(Choice::Reflect), Counter::Silences);
    }

    #[test]
    fn test_stimulus_constructors() {
        let s = Stimulus::conversation("ana", "hello");
        assert!(s.is_inbound_speech());
        assert_eq!(s.author.as_deref(), Some("ana"));
        let s = Stimulus::internal(TriggerType::Heartbeat, "quiet").with_channel("tick");
        assert!(!s.is_inbound_speech());
        assert_eq!(s.channel, "tick");
    }
}
