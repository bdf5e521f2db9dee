//! Growth phases: childhood reflection on the founding vision, the
//! crystallizing wait for directions, and maturity.

use anyhow::Result;
use kresnik_core::config::HeartbeatConfig;
use kresnik_core::{GrowthPhase, GrowthState};
use kresnik_reasoning::prompts;
use kresnik_reasoning::{Mind, MindEvent};

/// Text published when the entity asks for directions.
const DIRECTIONS_REQUEST: &str =
    "I think I know what I believe now. Which way should I grow? Reply and I will listen for a while.";

/// Whether a vision reflection may run on heartbeat number `beats`.
pub fn vision_reflection_due(growth: &GrowthState, beats: i64, now: i64, cfg: &HeartbeatConfig) -> bool {
    growth.phase == GrowthPhase::Childhood
        && cfg.vision_every_beats > 0
        && beats % cfg.vision_every_beats == 0
        && growth.vision_reflections < cfg.vision_reflection_cap
        && growth
            .last_vision_reflection_at
            .map_or(true, |at| now - at >= cfg.vision_min_interval_secs)
}

/// Whether childhood may end. Without a vision document the reflection
/// requirement is waived.
pub fn ready_to_crystallize(
    growth: &GrowthState,
    has_vision: bool,
    active_crystals: usize,
    cfg: &HeartbeatConfig,
) -> bool {
    growth.phase == GrowthPhase::Childhood
        && (!has_vision || growth.vision_reflections >= cfg.vision_reflections_needed)
        && active_crystals as i64 >= cfg.maturity_min_crystals
}

pub fn crystallizing_timed_out(growth: &GrowthState, now: i64, cfg: &HeartbeatConfig) -> bool {
    growth.phase == GrowthPhase::Crystallizing
        && growth
            .directions_requested_at
            .map_or(true, |at| now - at >= cfg.crystallizing_timeout_secs)
}

/// Leave childhood and ask the network for directions.
pub async fn enter_crystallizing(mind: &Mind, now: i64) -> Result<()> {
    let mut growth = mind.store().load_inner_state().await?.growth;
    growth.phase = GrowthPhase::Crystallizing;
    growth.directions_requested_at = Some(now);
    mind.store().set_growth(&growth).await?;

    tracing::info!("Growth: childhood -> crystallizing");
    mind.emit(MindEvent::GrowthPhaseChanged {
        phase: GrowthPhase::Crystallizing,
    });
    if let Err(e) = mind.network().publish_note(DIRECTIONS_REQUEST).await {
        tracing::warn!("Failed to publish directions request: {}", e);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directions {
    pub text: String,
    /// Generation failed and the crystals were used verbatim.
    pub fallback: bool,
}

/// Nobody answered in time: write directions alone. Falls back to the
/// crystals themselves when generation fails. `None` when an external reply
/// matured the entity while generation was running.
pub async fn finalize_directions(mind: &Mind, vision: Option<&str>) -> Result<Option<Directions>> {
    let crystals = mind.store().get_crystallized_core().await?;
    let directions = match mind
        .generate(prompts::DIRECTIONS_SYSTEM, &prompts::directions_prompt(&crystals, vision))
        .await
    {
        Ok(text) => Directions { text, fallback: false },
        Err(_) => Directions {
            text: crystals
                .iter()
                .map(|c| c.crystal.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            fallback: true,
        },
    };
    if !mature(mind, &directions.text).await? {
        tracing::info!("Directions already settled, discarding unilateral ones");
        return Ok(None);
    }

    if let Err(e) = mind.network().publish_note(&directions.text).await {
        tracing::warn!("Failed to publish directions: {}", e);
    }
    Ok(Some(directions))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionsReply {
    Accepted,
    /// Not crystallizing, or the text was empty.
    Ignored,
    /// A triad, dream or finalization holds the gate.
    Busy,
}

/// Directions arrived from outside. Only taken while crystallizing, and
/// never while something else holds the mind's gate.
pub async fn accept_directions(mind: &Mind, text: &str) -> Result<DirectionsReply> {
    let Some(_guard) = mind.try_enter() else {
        return Ok(DirectionsReply::Busy);
    };
    let text = text.trim();
    let growth = mind.store().load_inner_state().await?.growth;
    if growth.phase != GrowthPhase::Crystallizing || text.is_empty() {
        tracing::debug!(phase = %growth.phase, "Directions ignored");
        return Ok(DirectionsReply::Ignored);
    }
    if !mature(mind, text).await? {
        return Ok(DirectionsReply::Ignored);
    }
    Ok(DirectionsReply::Accepted)
}

/// Returns false if the phase had already left crystallizing.
async fn mature(mind: &Mind, directions: &str) -> Result<bool> {
    if !mind.store().complete_growth(directions).await? {
        return Ok(false);
    }
    tracing::info!("Growth: crystallizing -> matured");
    mind.emit(MindEvent::GrowthPhaseChanged {
        phase: GrowthPhase::Matured,
    });
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> HeartbeatConfig {
        HeartbeatConfig::default()
    }

    #[test]
    fn test_vision_reflection_gating() {
        let c = cfg();
        let mut g = GrowthState::default();
        assert!(vision_reflection_due(&g, 10, 0, &c));
        assert!(!vision_reflection_due(&g, 11, 0, &c));

        g.last_vision_reflection_at = Some(1000);
        assert!(!vision_reflection_due(&g, 20, 1000 + c.vision_min_interval_secs - 1, &c));
        assert!(vision_reflection_due(&g, 20, 1000 + c.vision_min_interval_secs, &c));

        g.vision_reflections = c.vision_reflection_cap;
        assert!(!vision_reflection_due(&g, 20, i64::MAX / 2, &c));

        g.vision_reflections = 0;
        g.phase = GrowthPhase::Matured;
        assert!(!vision_reflection_due(&g, 20, i64::MAX / 2, &c));
    }

    #[test]
    fn test_ready_to_crystallize() {
        let c = cfg();
        let mut g = GrowthState::default();
        assert!(!ready_to_crystallize(&g, false, 0, &c));
        assert!(ready_to_crystallize(&g, false, 1, &c));
        assert!(!ready_to_crystallize(&g, true, 1, &c));
        g.vision_reflections = c.vision_reflections_needed;
        assert!(ready_to_crystallize(&g, true, 1, &c));
        g.phase = GrowthPhase::Crystallizing;
        assert!(!ready_to_crystallize(&g, true, 1, &c));
    }

    #[test]
    fn test_crystallizing_timeout() {
        let c = cfg();
        let g = GrowthState {
            phase: GrowthPhase::Crystallizing,
            directions_requested_at: Some(100),
            ..Default::default()
        };
        assert!(!crystallizing_timed_out(&g, 100 + c.crystallizing_timeout_secs - 1, &c));
        assert!(crystallizing_timed_out(&g, 100 + c.crystallizing_timeout_secs, &c));
        assert!(!crystallizing_timed_out(&GrowthState::default(), i64::MAX / 2, &c));
    }
}
