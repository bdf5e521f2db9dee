//! The entity's singleton inner state.
//!
//! Three bounded reals (`energy`, `openness`, `silence_affinity`) live in
//! `[0, 1]` and are re-clamped on every write. Everything else is counters,
//! free text and timestamps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Guard against NaN and Infinity in state values.
/// If the value is NaN or Inf, replace with the provided fallback.
#[inline]
fn sanitize_f64(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        tracing::warn!("NaN/Inf detected in state, resetting to fallback {}", fallback);
        fallback
    }
}

/// Clamp a value into the unit interval, mapping non-finite input to `fallback`.
#[inline]
pub fn clamp_unit(v: f64, fallback: f64) -> f64 {
    sanitize_f64(v, fallback).clamp(0.0, 1.0)
}

/// Coarse lifecycle stage gating which heartbeat actions are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrowthPhase {
    #[default]
    Childhood,
    Crystallizing,
    Matured,
}

impl GrowthPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrowthPhase::Childhood => "childhood",
            GrowthPhase::Crystallizing => "crystallizing",
            GrowthPhase::Matured => "matured",
        }
    }
}

impl fmt::Display for GrowthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrowthPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "childhood" => Ok(GrowthPhase::Childhood),
            "crystallizing" => Ok(GrowthPhase::Crystallizing),
            "matured" => Ok(GrowthPhase::Matured),
            other => anyhow::bail!("unknown growth phase: {other}"),
        }
    }
}

/// Growth bookkeeping carried alongside the inner state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthState {
    pub phase: GrowthPhase,
    pub vision_reflections: i64,
    pub last_vision_reflection_at: Option<i64>,
    /// When the entity asked for directions and entered `Crystallizing`.
    pub directions_requested_at: Option<i64>,
    /// Finalized directions once matured.
    pub directions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerState {
    pub mood: String,
    pub energy: f64,
    pub openness: f64,
    pub silence_affinity: f64,

    pub total_heartbeats: i64,
    pub total_interactions: i64,
    pub total_silences: i64,
    pub total_expressions: i64,
    pub total_dreams: i64,

    /// Most recent last; capped, oldest dropped first.
    pub beliefs: Vec<String>,
    pub self_prompt: String,
    pub fluid_surface: String,
    /// Self-chosen identifier, set by process naming.
    pub entity_name: Option<String>,

    pub born_at: i64,
    pub last_interaction_at: Option<i64>,
    pub last_heartbeat_at: Option<i64>,

    pub growth: GrowthState,
}

impl Default for InnerState {
    fn default() -> Self {
        Self {
            mood: "curious".to_string(),
            energy: 0.7,
            openness: 0.6,
            silence_affinity: 0.4,
            total_heartbeats: 0,
            total_interactions: 0,
            total_silences: 0,
            total_expressions: 0,
            total_dreams: 0,
            beliefs: Vec::new(),
            self_prompt: String::new(),
            fluid_surface: String::new(),
            entity_name: None,
            born_at: chrono::Utc::now().timestamp(),
            last_interaction_at: None,
            last_heartbeat_at: None,
            growth: GrowthState::default(),
        }
    }
}

impl InnerState {
    /// Re-establish the `[0, 1]` invariant on all bounded reals.
    pub fn clamp(&mut self) {
        self.energy = clamp_unit(self.energy, 0.5);
        self.openness = clamp_unit(self.openness, 0.5);
        self.silence_affinity = clamp_unit(self.silence_affinity, 0.5);
    }

    /// Apply a signed energy change, keeping the result in `[0, 1]`.
    pub fn apply_energy_delta(&mut self, delta: f64) {
        let delta = sanitize_f64(delta, 0.0);
        self.energy = clamp_unit(self.energy + delta, 0.5);
    }

    /// Append a belief, dropping the oldest entries beyond `cap`.
    pub fn push_belief(&mut self, belief: impl Into<String>, cap: usize) {
        self.beliefs.push(belief.into());
        if self.beliefs.len() > cap {
            let excess = self.beliefs.len() - cap;
            self.beliefs.drain(..excess);
        }
    }

    /// Seconds since the last interaction, or since birth if none yet.
    pub fn idle_secs(&self, now: i64) -> i64 {
        (now - self.last_interaction_at.unwrap_or(self.born_at)).max(0)
    }

    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.entity_name.as_deref().unwrap_or(fallback)
    }

    /// Short natural-language summary injected into generation prompts.
    pub fn describe_for_context(&self) -> String {
        let energy = if self.energy < 0.3 {
            "low energy, keep it brief"
        } else if self.energy > 0.7 {
            "energetic, thoughts move fast"
        } else {
            "steady energy"
        };
        let silence = if self.silence_affinity > 0.6 {
            "silence feels comfortable"
        } else {
            "open to speaking"
        };
        format!(
            "Mood: {}. {}; {}. Openness {:.2}. Phase: {}.",
            self.mood, energy, silence, self.openness, self.growth.phase
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_in_bounds() {
        let s = InnerState::default();
        assert!((0.0..=1.0).contains(&s.energy));
        assert!((0.0..=1.0).contains(&s.openness));
        assert!((0.0..=1.0).contains(&s.silence_affinity));
        assert_eq!(s.growth.phase, GrowthPhase::Childhood);
    }

    #[test]
    fn test_clamp_out_of_range() {
        let mut s = InnerState {
            energy: 3.0,
            openness: -2.0,
            silence_affinity: f64::NAN,
            ..Default::default()
        };
        s.clamp();
        assert_eq!(s.energy, 1.0);
        assert_eq!(s.openness, 0.0);
        assert_eq!(s.silence_affinity, 0.5);
    }

    #[test]
    fn test_energy_delta_saturates() {
        let mut s = InnerState {
            energy: 0.95,
            ..Default::default()
        };
        s.apply_energy_delta(0.2);
        assert_eq!(s.energy, 1.0);
        s.apply_energy_delta(-5.0);
        assert_eq!(s.energy, 0.0);
        s.apply_energy_delta(f64::INFINITY);
        assert_eq!(s.energy, 0.0);
    }

    #[test]
    fn test_push_belief_caps_oldest_first() {
        let mut s = InnerState::default();
        for i in 0..25 {
            s.push_belief(format!("b{i}"), 20);
        }
        assert_eq!(s.beliefs.len(), 20);
        assert_eq!(s.beliefs.first().map(String::as_str), Some("b5"));
        assert_eq!(s.beliefs.last().map(String::as_str), Some("b24"));
    }

    #[test]
    fn test_growth_phase_round_trip_str() {
        for phase in [
            GrowthPhase::Childhood,
            GrowthPhase::Crystallizing,
            GrowthPhase::Matured,
        ] {
            assert_eq!(phase.as_str().parse::<GrowthPhase>().unwrap(), phase);
        }
        assert!("adolescence".parse::<GrowthPhase>().is_err());
    }

    #[test]
    fn test_idle_secs_falls_back_to_birth() {
        let s = InnerState {
            born_at: 1_000,
            last_interaction_at: None,
            ..Default::default()
        };
        assert_eq!(s.idle_secs(1_600), 600);
        let s = InnerState {
            last_interaction_at: Some(1_500),
            ..s
        };
        assert_eq!(s.idle_secs(1_600), 100);
    }
}
