//! Synthesis decision: the structured output of the third triad phase.
//!
//! The generation service answers with JSON. Anything that does not parse
//! into [`SynthesisDecision`] is a [`DecisionError`] and the triad aborts.

use kresnik_core::Choice;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("no JSON object in response")]
    NoJson,
    #[error("invalid decision JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown choice: {0}")]
    UnknownChoice(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("choice {0} requires content")]
    MissingContent(Choice),
    #[error("crystal seed must be \"theme: expression\", got {0:?}")]
    MalformedSeed(String),
    #[error("dissolve request must be \"id: reason\", got {0:?}")]
    MalformedDissolve(String),
    #[error("energy delta is not a finite number")]
    NonFiniteEnergy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedSubmission {
    pub theme: String,
    pub expression: String,
}

impl SeedSubmission {
    /// Parse `"theme: expression"`. Both halves must be non-empty.
    pub fn parse(text: &str) -> Result<Self, DecisionError> {
        let malformed = || DecisionError::MalformedSeed(text.to_string());
        let (theme, expression) = text.split_once(':').ok_or_else(malformed)?;
        let (theme, expression) = (theme.trim(), expression.trim());
        if theme.is_empty() || expression.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            theme: theme.to_string(),
            expression: expression.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DissolveRequest {
    pub crystal_id: i64,
    pub reason: String,
}

impl DissolveRequest {
    /// Parse `"id: reason"`. A leading `#` on the id is tolerated.
    pub fn parse(text: &str) -> Result<Self, DecisionError> {
        let malformed = || DecisionError::MalformedDissolve(text.to_string());
        let (id, reason) = text.split_once(':').ok_or_else(malformed)?;
        let crystal_id = id
            .trim()
            .trim_start_matches('#')
            .parse::<i64>()
            .map_err(|_| malformed())?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            crystal_id,
            reason: reason.to_string(),
        })
    }
}

/// Name and optional notes the entity learned about its interlocutor.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnedIdentity {
    pub name: String,
    pub notes: Option<String>,
}

impl LearnedIdentity {
    /// `"name"` or `"name: notes"`.
    fn parse(text: &str) -> Self {
        match text.split_once(':') {
            Some((name, notes)) if !name.trim().is_empty() => Self {
                name: name.trim().to_string(),
                notes: non_empty(Some(notes.to_string())),
            },
            _ => Self {
                name: text.trim().to_string(),
                notes: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisDecision {
    pub choice: Choice,
    pub reason: String,
    pub content: Option<String>,
    pub inner_shift: String,
    pub mood: String,
    /// Already clamped to the configured bound.
    pub energy_delta: f64,
    pub learned_identity: Option<LearnedIdentity>,
    pub fluid_surface: Option<String>,
    pub crystal_seed: Option<SeedSubmission>,
    pub dissolve: Option<DissolveRequest>,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    choice: Option<String>,
    reason: Option<String>,
    content: Option<String>,
    inner_shift: Option<String>,
    mood: Option<String>,
    energy_delta: Option<f64>,
    learned_identity: Option<String>,
    fluid_surface: Option<String>,
    crystal_seed: Option<String>,
    dissolve: Option<String>,
}

impl SynthesisDecision {
    /// Validate a raw generation response. `bound` caps `|energy_delta|`.
    pub fn parse(text: &str, bound: f64) -> Result<Self, DecisionError> {
        let raw: RawDecision = parse_json_lenient(text)?;

        let choice_text = non_empty(raw.choice).ok_or(DecisionError::MissingField("choice"))?;
        let choice = choice_text
            .to_lowercase()
            .parse::<Choice>()
            .map_err(|_| DecisionError::UnknownChoice(choice_text.clone()))?;
        let reason = non_empty(raw.reason).ok_or(DecisionError::MissingField("reason"))?;
        let mood = non_empty(raw.mood).ok_or(DecisionError::MissingField("mood"))?;

        let content = non_empty(raw.content);
        if choice.is_outward() && content.is_none() {
            return Err(DecisionError::MissingContent(choice));
        }

        let energy_delta = raw.energy_delta.unwrap_or(0.0);
        if !energy_delta.is_finite() {
            return Err(DecisionError::NonFiniteEnergy);
        }
        let bound = bound.abs();
        let energy_delta = energy_delta.clamp(-bound, bound);

        let crystal_seed = non_empty(raw.crystal_seed)
            .map(|s| SeedSubmission::parse(&s))
            .transpose()?;
        let dissolve = non_empty(raw.dissolve)
            .map(|s| DissolveRequest::parse(&s))
            .transpose()?;

        Ok(Self {
            choice,
            reason,
            content,
            inner_shift: raw.inner_shift.map(|s| s.trim().to_string()).unwrap_or_default(),
            mood,
            energy_delta,
            learned_identity: non_empty(raw.learned_identity).map(|s| LearnedIdentity::parse(&s)),
            fluid_surface: non_empty(raw.fluid_surface),
            crystal_seed,
            dissolve,
        })
    }
}

/// Parse a JSON object out of a generation response, tolerating code fences
/// and surrounding prose.
pub(crate) fn parse_json_lenient<T: DeserializeOwned>(text: &str) -> Result<T, DecisionError> {
    let trimmed = text.trim();

    // Try direct parse first
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find('{').ok_or(DecisionError::NoJson)?;
    let end = trimmed.rfind('}').ok_or(DecisionError::NoJson)?;
    if end < start {
        return Err(DecisionError::NoJson);
    }
    Ok(serde_json::from_str::<T>(&trimmed[start..=end])?)
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
