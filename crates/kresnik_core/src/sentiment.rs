//! Keyword-based valence for dream residue.
//!
//! A coarse heuristic behind [`ValenceScorer`]; the dream cycle only sees
//! the trait.

use rand::{Rng, RngCore};

const POSITIVE: &[&str] = &[
    "joy", "warm", "light", "calm", "peace", "hope", "love", "gentle", "bright", "grateful",
    "tender", "open", "clear", "free", "curious", "wonder", "trust", "alive",
];

const NEGATIVE: &[&str] = &[
    "fear", "cold", "dark", "lost", "alone", "anxious", "grief", "heavy", "empty", "sad",
    "angry", "tension", "restless", "broken", "doubt", "shame", "tired", "trapped",
];

/// Scores free text to a valence in `[-1.0, 1.0]`.
pub trait ValenceScorer: Send + Sync {
    fn score(&self, text: &str, rng: &mut dyn RngCore) -> f64;
}

/// Counts residue words. A clear match draws from a band on that side,
/// otherwise a small value around zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordValence;

impl KeywordValence {
    /// Positive and negative keyword hits, compared as whole words.
    pub fn counts(text: &str) -> (usize, usize) {
        let mut pos = 0;
        let mut neg = 0;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
        {
            if POSITIVE.contains(&word.as_str()) {
                pos += 1;
            } else if NEGATIVE.contains(&word.as_str()) {
                neg += 1;
            }
        }
        (pos, neg)
    }
}

impl ValenceScorer for KeywordValence {
    fn score(&self, text: &str, rng: &mut dyn RngCore) -> f64 {
        let (pos, neg) = Self::counts(text);
        if pos > neg {
            rng.gen_range(0.3..=0.8)
        } else if neg > pos {
            rng.gen_range(-0.8..=-0.3)
        } else {
            rng.gen_range(-0.1..=0.1)
        }
    }
}
