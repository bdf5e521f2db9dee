//! Random draws for the heartbeat, behind a trait so tests can pin them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

pub trait Dice: Send + Sync {
    /// True with probability `p` (clamped to `[0, 1]`).
    fn chance(&mut self, p: f64) -> bool;
    /// Uniform index in `0..n`. `n` must be non-zero.
    fn pick(&mut self, n: usize) -> usize;
}

#[derive(Debug)]
pub struct RandomDice {
    rng: StdRng,
}

impl RandomDice {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomDice {
    fn default() -> Self {
        Self::new()
    }
}

impl Dice for RandomDice {
    fn chance(&mut self, p: f64) -> bool {
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        self.rng.gen_bool(p)
    }

    fn pick(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n.max(1))
    }
}

/// Replays queued outcomes, then answers `fallback`. Records every
/// probability it was asked about.
#[derive(Debug, Default)]
pub struct ScriptedDice {
    rolls: VecDeque<bool>,
    picks: VecDeque<usize>,
    fallback: bool,
    asked: Vec<f64>,
}

impl ScriptedDice {
    pub fn new(rolls: impl IntoIterator<Item = bool>) -> Self {
        Self {
            rolls: rolls.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Every roll succeeds.
    pub fn always() -> Self {
        Self {
            fallback: true,
            ..Default::default()
        }
    }

    pub fn with_picks(mut self, picks: impl IntoIterator<Item = usize>) -> Self {
        self.picks = picks.into_iter().collect();
        self
    }

    pub fn asked(&self) -> &[f64] {
        &self.asked
    }
}

impl Dice for ScriptedDice {
    fn chance(&mut self, p: f64) -> bool {
        self.asked.push(p);
        self.rolls.pop_front().unwrap_or(self.fallback)
    }

    fn pick(&mut self, n: usize) -> usize {
        self.picks.pop_front().unwrap_or(0) % n.max(1)
    }
}
