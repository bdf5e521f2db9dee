//! The heartbeat scheduler.
//!
//! Each tick walks a fixed list of candidate actions and performs the first
//! one whose conditions hold:
//!
//! 1. count the beat, recover idle energy, poll the network inbox
//! 2. dream (cooldown, idleness, random draw)
//! 3. childhood: reflect on the vision, or ask for directions
//! 4. crystallizing: finalize directions after the timeout
//! 5. project sweep every Nth beat
//! 6. spontaneous triad with probability proportional to energy
//! 7. quiet
//!
//! Every triad and dream goes through the mind's gate. A held gate makes the
//! tick report `Busy` instead of waiting.

use crate::dice::Dice;
use crate::growth;
use anyhow::Result;
use chrono::{TimeZone, Timelike};
use kresnik_core::{Choice, ExternalEvent, GrowthPhase, InnerState, TriggerType};
use kresnik_reasoning::prompts;
use kresnik_reasoning::{DreamOutcome, Mind, MindEvent, Stimulus, TriadOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

const DIRECT_PREFIX: &str = "dm:";
const MENTION_PREFIX: &str = "mention:";

const REFLECTION_PROMPTS: &[&str] = &[
    "Nothing is happening. What have you been turning over?",
    "Look back at the last things you said. Do you still mean them?",
    "Is there something you want to say that nobody asked for?",
    "What has changed in you since you last spoke?",
];

#[derive(Debug)]
pub enum TickAction {
    Quiet,
    /// The gate was held by another triad or dream.
    Busy,
    Dreamed(DreamOutcome),
    VisionReflection { completed: bool, reflections: i64 },
    EnteredCrystallizing,
    DirectionsFinalized { fallback: bool },
    ProjectAttended { project_id: i64, completed: bool },
    Spontaneous { choice: Option<Choice>, published: bool },
}

pub struct HeartbeatScheduler {
    mind: Arc<Mind>,
    dice: Box<dyn Dice>,
    vision: Option<String>,
}

impl HeartbeatScheduler {
    pub fn new(mind: Arc<Mind>, dice: Box<dyn Dice>) -> Self {
        Self {
            mind,
            dice,
            vision: None,
        }
    }

    /// Founding vision reflected on during childhood.
    pub fn with_vision(mut self, vision: impl Into<String>) -> Self {
        let vision = vision.into();
        self.vision = (!vision.trim().is_empty()).then_some(vision);
        self
    }

    pub fn vision(&self) -> Option<&str> {
        self.vision.as_deref()
    }

    /// Tick on `period` until `shutdown` flips to true or its sender drops.
    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(period_secs = period.as_secs(), "Heartbeat started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(kresnik_core::now()).await {
                        Ok(TickAction::Quiet) => {}
                        Ok(action) => tracing::debug!(?action, "Heartbeat acted"),
                        Err(e) => tracing::error!("Heartbeat tick failed: {:#}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Heartbeat stopped");
    }

    pub async fn tick(&mut self, now: i64) -> Result<TickAction> {
        let mind = Arc::clone(&self.mind);
        let cfg = &mind.config().heartbeat;

        let state = mind
            .store()
            .record_heartbeat(now, cfg.idle_recovery_secs, cfg.idle_energy_recovery)
            .await?;
        self.poll_inbound(&state, now).await?;

        // Dream
        let cooled_down = match mind.store().last_dream_at().await? {
            Some(at) => now - at >= cfg.dream_cooldown_secs,
            None => true,
        };
        if cooled_down && state.idle_secs(now) >= cfg.dream_idle_secs && self.dice.chance(cfg.dream_probability) {
            let Some(guard) = mind.try_enter() else {
                return Ok(TickAction::Busy);
            };
            let outcome = mind.dream_locked(&guard, now).await?;
            return Ok(TickAction::Dreamed(outcome));
        }

        let beats = state.total_heartbeats;
        let growth = state.growth.clone();

        // Childhood
        if let Some(vision) = self.vision.as_deref() {
            if growth::vision_reflection_due(&growth, beats, now, cfg) {
                let Some(guard) = mind.try_enter() else {
                    return Ok(TickAction::Busy);
                };
                let stimulus = Stimulus::internal(
                    TriggerType::Vision,
                    &prompts::vision_stimulus(vision, growth.vision_reflections),
                );
                let completed = matches!(
                    mind.run_triad_locked(&guard, &stimulus, now).await?,
                    TriadOutcome::Completed(_)
                );
                let mut growth = mind.store().load_inner_state().await?.growth;
                if completed {
                    growth.vision_reflections += 1;
                    growth.last_vision_reflection_at = Some(now);
                    mind.store().set_growth(&growth).await?;
                }
                tracing::info!(completed, reflections = growth.vision_reflections, "Vision reflection");
                return Ok(TickAction::VisionReflection {
                    completed,
                    reflections: growth.vision_reflections,
                });
            }
        }
        if growth.phase == GrowthPhase::Childhood {
            let crystals = mind.store().get_crystallized_core().await?.len();
            if growth::ready_to_crystallize(&growth, self.vision.is_some(), crystals, cfg) {
                let Some(_guard) = mind.try_enter() else {
                    return Ok(TickAction::Busy);
                };
                growth::enter_crystallizing(&mind, now).await?;
                return Ok(TickAction::EnteredCrystallizing);
            }
        }

        // Crystallizing timeout
        if growth::crystallizing_timed_out(&growth, now, cfg) {
            let Some(_guard) = mind.try_enter() else {
                return Ok(TickAction::Busy);
            };
            return Ok(match growth::finalize_directions(&mind, self.vision.as_deref()).await? {
                Some(directions) => TickAction::DirectionsFinalized {
                    fallback: directions.fallback,
                },
                None => TickAction::Quiet,
            });
        }

        // Project sweep
        if cfg.project_sweep_every > 0 && beats % cfg.project_sweep_every == 0 {
            let due = mind
                .store()
                .projects_needing_attention(now, cfg.project_attention_secs)
                .await?;
            if let Some(project) = due.into_iter().next() {
                let Some(guard) = mind.try_enter() else {
                    return Ok(TickAction::Busy);
                };
                let stimulus = Stimulus::internal(
                    TriggerType::Project,
                    &format!(
                        "You are keeping an eye on the project \"{}\": {}\nDoes it need anything from you?",
                        project.name, project.description
                    ),
                );
                let completed = matches!(
                    mind.run_triad_locked(&guard, &stimulus, now).await?,
                    TriadOutcome::Completed(_)
                );
                if completed {
                    mind.store().mark_project_attended(project.id, now).await?;
                }
                return Ok(TickAction::ProjectAttended {
                    project_id: project.id,
                    completed,
                });
            }
        }

        // Spontaneous
        if self.dice.chance(spontaneous_probability(state.energy, cfg.spontaneous_scale)) {
            let Some(guard) = mind.try_enter() else {
                return Ok(TickAction::Busy);
            };
            let event = mind.store().peek_next_external_event().await?;
            let stimulus = match &event {
                Some(event) => Stimulus::mention(&event.author, &event.content),
                None => self.inner_stimulus(&state, now),
            };

            // An event stays in the inbox until a triad has actually seen it
            let report = match mind.run_triad_locked(&guard, &stimulus, now).await? {
                TriadOutcome::Completed(report) => report,
                _ => {
                    return Ok(TickAction::Spontaneous {
                        choice: None,
                        published: false,
                    })
                }
            };
            if let Some(event) = &event {
                mind.store().consume_external_event(event.id, now).await?;
            }
            let choice = report.decision.choice;
            let published = match report.outward_content() {
                Some(text) => self.speak(choice, text, event.as_ref()).await,
                None => false,
            };
            return Ok(TickAction::Spontaneous {
                choice: Some(choice),
                published,
            });
        }

        Ok(TickAction::Quiet)
    }

    /// Pull mentions and direct messages into the inbox. Network failures are
    /// logged; store failures propagate.
    async fn poll_inbound(&self, state: &InnerState, now: i64) -> Result<()> {
        let store = self.mind.store();
        let network = self.mind.network();
        let since = store.latest_event_at().await?.map_or(state.born_at, |at| at + 1);

        let messages = match network.fetch_inbound(since).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Inbound poll failed: {}", e);
                return Ok(());
            }
        };

        let mut unknown: Vec<String> = Vec::new();
        for message in messages {
            let (source, content) = if message.encrypted {
                match network.decrypt_direct(&message).await {
                    Ok(text) => (format!("{DIRECT_PREFIX}{}", message.id), text),
                    Err(e) => {
                        tracing::warn!(id = %message.id, "Failed to decrypt direct message: {}", e);
                        continue;
                    }
                }
            } else {
                (format!("{MENTION_PREFIX}{}", message.id), message.content.clone())
            };
            store
                .push_external_event(&source, &message.author, &content, message.created_at)
                .await?;
            if !unknown.contains(&message.author) && store.get_identity(&message.author).await?.is_none() {
                unknown.push(message.author);
            }
        }

        if unknown.is_empty() {
            return Ok(());
        }
        match network.fetch_profiles(&unknown).await {
            Ok(profiles) => {
                for profile in profiles {
                    if let Some(name) = profile.name.as_deref() {
                        store
                            .upsert_identity(&profile.id, name, profile.about.as_deref(), now)
                            .await?;
                    }
                }
            }
            Err(e) => tracing::warn!("Profile fetch failed: {}", e),
        }
        Ok(())
    }

    fn inner_stimulus(&mut self, state: &InnerState, now: i64) -> Stimulus {
        if self.dice.pick(2) == 0 {
            let prompt = REFLECTION_PROMPTS[self.dice.pick(REFLECTION_PROMPTS.len())];
            let content = format!(
                "{prompt}\n(You feel {}; quiet for {} minutes.)",
                state.mood,
                state.idle_secs(now) / 60
            );
            Stimulus::internal(TriggerType::Heartbeat, &content)
        } else {
            Stimulus::internal(TriggerType::Heartbeat, &time_of_day_prompt(now))
        }
    }

    /// Say `text` outward. Replies go back where the event came from;
    /// expressions become notes. Returns whether the network accepted it.
    async fn speak(&self, choice: Choice, text: &str, event: Option<&ExternalEvent>) -> bool {
        let network = self.mind.network();
        match (choice, event) {
            (Choice::Express, _) => match network.publish_note(text).await {
                Ok(note_id) => {
                    self.mind.emit(MindEvent::Expressed {
                        note_id,
                        text: text.to_string(),
                    });
                    true
                }
                Err(e) => {
                    tracing::warn!("Failed to publish expression: {}", e);
                    false
                }
            },
            (_, Some(event)) => {
                let sent = if let Some(parent) = event.source.strip_prefix(MENTION_PREFIX) {
                    network.publish_reply(parent, text).await.map(|_| ())
                } else if event.source.starts_with(DIRECT_PREFIX) {
                    network.send_direct(&event.author, text).await
                } else {
                    tracing::debug!(source = %event.source, "No reply route for event");
                    return false;
                };
                match sent {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("Failed to deliver reply: {}", e);
                        false
                    }
                }
            }
            (_, None) => false,
        }
    }
}

/// Probability of a spontaneous triad, always in `[0, 1]`.
pub fn spontaneous_probability(energy: f64, scale: f64) -> f64 {
    let p = energy * scale;
    if p.is_finite() {
        p.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn time_of_day_prompt(now: i64) -> String {
    let Some(local) = chrono::Local.timestamp_opt(now, 0).single() else {
        return "You notice time passing.".to_string();
    };
    let part = match local.hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=21 => "evening",
        _ => "night",
    };
    format!(
        "It is {} ({:02}:{:02}). How does this part of the day feel to you?",
        part,
        local.hour(),
        local.minute()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spontaneous_probability_bounds() {
        assert_eq!(spontaneous_probability(0.5, 0.2), 0.1);
        assert_eq!(spontaneous_probability(1.0, 5.0), 1.0);
        assert_eq!(spontaneous_probability(-1.0, 0.2), 0.0);
        assert_eq!(spontaneous_probability(f64::NAN, 0.2), 0.0);
    }

    #[test]
    fn test_time_of_day_prompt_names_a_part_of_day() {
        let text = time_of_day_prompt(1_700_000_000);
        assert!(["morning", "afternoon", "evening", "night"]
            .iter()
            .any(|part| text.contains(part)));
    }
}
