//! Domain value types shared by the store, the pipelines and the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum stored length of a synapse pattern, in characters.
pub const MAX_PATTERN_CHARS: usize = 300;

/// Truncate on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Experiential channel a synapse or crystal seed came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Conversation,
    Listening,
    Observation,
    Reflection,
    Dream,
    Vision,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Conversation => "conversation",
            SourceType::Listening => "listening",
            SourceType::Observation => "observation",
            SourceType::Reflection => "reflection",
            SourceType::Dream => "dream",
            SourceType::Vision => "vision",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(SourceType::Conversation),
            "listening" => Ok(SourceType::Listening),
            "observation" => Ok(SourceType::Observation),
            "reflection" => Ok(SourceType::Reflection),
            "dream" => Ok(SourceType::Dream),
            "vision" => Ok(SourceType::Vision),
            other => anyhow::bail!("unknown source type: {other}"),
        }
    }
}

// ============================================================================
// Memory graph
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub id: i64,
    pub pattern: String,
    pub energy: f64,
    pub decay_rate: f64,
    pub valence: f64,
    pub source_type: SourceType,
    pub source_triad_id: Option<i64>,
    pub tags: Vec<String>,
    pub fired_at: i64,
    pub created_at: i64,
    /// External reference once archived to the network.
    pub archived_ref: Option<String>,
}

/// Arguments for creating a synapse.
#[derive(Debug, Clone)]
pub struct NewSynapse {
    pub pattern: String,
    pub energy: f64,
    pub decay_rate: f64,
    pub valence: f64,
    pub source_type: SourceType,
    pub source_triad_id: Option<i64>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: i64,
    pub from_synapse: i64,
    pub to_synapse: i64,
    pub weight: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pathway {
    pub theme: String,
    /// Phase label, derived from trust.
    pub phase: PathwayPhase,
    pub trust: f64,
    pub fire_count: i64,
    pub last_note: Option<String>,
    pub last_source: Option<String>,
    pub fired_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathwayPhase {
    Nascent,
    Forming,
    Established,
}

impl PathwayPhase {
    pub fn from_trust(trust: f64) -> Self {
        if trust >= 0.7 {
            PathwayPhase::Established
        } else if trust >= 0.3 {
            PathwayPhase::Forming
        } else {
            PathwayPhase::Nascent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PathwayPhase::Nascent => "nascent",
            PathwayPhase::Forming => "forming",
            PathwayPhase::Established => "established",
        }
    }
}

impl FromStr for PathwayPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nascent" => Ok(PathwayPhase::Nascent),
            "forming" => Ok(PathwayPhase::Forming),
            "established" => Ok(PathwayPhase::Established),
            other => anyhow::bail!("unknown pathway phase: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatLevel {
    Cold,
    Warm,
    Hot,
}

impl HeatLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 1.5 {
            HeatLevel::Hot
        } else if score >= 0.5 {
            HeatLevel::Warm
        } else {
            HeatLevel::Cold
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HeatLevel::Cold => "cold",
            HeatLevel::Warm => "warm",
            HeatLevel::Hot => "hot",
        }
    }
}

impl fmt::Display for HeatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resonance {
    pub score: f64,
    pub heat: HeatLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub synapses: i64,
    pub total_energy: f64,
    pub connections: i64,
    pub active_pathways: i64,
    pub active_crystals: i64,
}

// ============================================================================
// Crystallization
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrystalSeed {
    pub theme: String,
    pub expression: String,
    pub source_type: SourceType,
    pub source_triad_id: Option<i64>,
    pub strength: i64,
    pub updated_at: i64,
}

/// A theme that has met the crystallization conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrystalCandidate {
    pub theme: String,
    /// Latest expression submitted under the theme.
    pub expression: String,
    pub total_strength: i64,
    pub sources: Vec<SourceType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrystallizedCore {
    pub id: i64,
    pub theme: String,
    pub crystal: String,
    pub formed_from_seeds: i64,
    pub seed_sources: Vec<SourceType>,
    pub created_at: i64,
    pub dissolved_at: Option<i64>,
    pub dissolve_reason: Option<String>,
}

impl CrystallizedCore {
    pub fn is_active(&self) -> bool {
        self.dissolved_at.is_none()
    }
}

/// Comma-delimited storage form of a source list.
pub fn join_sources(sources: &[SourceType]) -> String {
    sources
        .iter()
        .map(SourceType::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_sources(text: &str) -> Vec<SourceType> {
    text.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

// ============================================================================
// Journals
// ============================================================================

/// What started a triad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Conversation,
    Mention,
    Heartbeat,
    Project,
    Vision,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Conversation => "conversation",
            TriggerType::Mention => "mention",
            TriggerType::Heartbeat => "heartbeat",
            TriggerType::Project => "project",
            TriggerType::Vision => "vision",
        }
    }

    /// Channel credited for synapses and seeds born from this trigger.
    pub fn source_type(&self) -> SourceType {
        match self {
            TriggerType::Conversation => SourceType::Conversation,
            TriggerType::Mention => SourceType::Listening,
            TriggerType::Heartbeat => SourceType::Reflection,
            TriggerType::Project => SourceType::Observation,
            TriggerType::Vision => SourceType::Vision,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(TriggerType::Conversation),
            "mention" => Ok(TriggerType::Mention),
            "heartbeat" => Ok(TriggerType::Heartbeat),
            "project" => Ok(TriggerType::Project),
            "vision" => Ok(TriggerType::Vision),
            other => anyhow::bail!("unknown trigger type: {other}"),
        }
    }
}

/// The closed set of synthesis outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    Respond,
    Silence,
    Question,
    Express,
    Reflect,
}

impl Choice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Choice::Respond => "respond",
            Choice::Silence => "silence",
            Choice::Question => "question",
            Choice::Express => "express",
            Choice::Reflect => "reflect",
        }
    }

    /// Whether the choice produces outward speech.
    pub fn is_outward(&self) -> bool {
        matches!(self, Choice::Respond | Choice::Question | Choice::Express)
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Choice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "respond" => Ok(Choice::Respond),
            "silence" => Ok(Choice::Silence),
            "question" => Ok(Choice::Question),
            "express" => Ok(Choice::Express),
            "reflect" => Ok(Choice::Reflect),
            other => anyhow::bail!("unknown choice: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triad {
    pub id: i64,
    pub trigger_type: TriggerType,
    pub trigger_content: String,
    pub author: Option<String>,
    pub thesis: String,
    pub antithesis: String,
    pub choice: Choice,
    pub reason: String,
    pub content: Option<String>,
    pub inner_shift: String,
    pub mood_before: String,
    pub mood_after: String,
    pub created_at: i64,
}

/// Insert form of a triad record.
#[derive(Debug, Clone)]
pub struct NewTriad {
    pub trigger_type: TriggerType,
    pub trigger_content: String,
    pub author: Option<String>,
    pub thesis: String,
    pub antithesis: String,
    pub choice: Choice,
    pub reason: String,
    pub content: Option<String>,
    pub inner_shift: String,
    pub mood_before: String,
    pub mood_after: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dream {
    pub id: i64,
    pub source_triad_ids: Vec<i64>,
    pub narrative: String,
    pub insight: Option<String>,
    pub emotional_residue: Option<String>,
    pub created_at: i64,
}

/// One named reasoning phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseName {
    pub word: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessWords {
    pub phases: [PhaseName; 3],
    pub version: i64,
    pub crystallized: bool,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub kind: String,
    pub content: String,
    pub created_at: i64,
}

// ============================================================================
// Store extras
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Direction::Inbound),
            "out" => Ok(Direction::Outbound),
            other => anyhow::bail!("unknown direction: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: i64,
    pub channel: String,
    pub author: String,
    pub direction: Direction,
    pub content: String,
    pub created_at: i64,
}

/// A known interlocutor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub author_id: String,
    pub name: String,
    pub notes: Option<String>,
    pub interactions: i64,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub last_attended_at: Option<i64>,
    pub created_at: i64,
}

/// Inbound event buffered from the network until a triad consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub id: i64,
    pub source: String,
    pub author: String,
    pub content: String,
    pub received_at: i64,
    pub consumed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heat_buckets() {
        assert_eq!(HeatLevel::from_score(0.0), HeatLevel::Cold);
        assert_eq!(HeatLevel::from_score(0.49), HeatLevel::Cold);
        assert_eq!(HeatLevel::from_score(0.5), HeatLevel::Warm);
        assert_eq!(HeatLevel::from_score(1.49), HeatLevel::Warm);
        assert_eq!(HeatLevel::from_score(1.5), HeatLevel::Hot);
    }

    #[test]
    fn test_sources_delimited() {
        let joined = join_sources(&[SourceType::Conversation, SourceType::Dream]);
        assert_eq!(joined, "conversation,dream");
        assert_eq!(
            split_sources(&joined),
            vec![SourceType::Conversation, SourceType::Dream]
        );
        // Unknown entries are skipped.
        assert_eq!(split_sources("dream,,bogus"), vec![SourceType::Dream]);
    }

    #[test]
    fn test_choice_parse() {
        assert_eq!("express".parse::<Choice>().unwrap(), Choice::Express);
        assert!("shout".parse::<Choice>().is_err());
        assert!(Choice::Question.is_outward());
        assert!(!Choice::Silence.is_outward());
        assert!(!Choice::Reflect.is_outward());
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let s = "ž".repeat(400);
        let t = truncate_chars(&s, MAX_PATTERN_CHARS);
        assert_eq!(t.chars().count(), 300);
    }

    #[test]
    fn test_pathway_phase_from_trust() {
        assert_eq!(PathwayPhase::from_trust(0.1), PathwayPhase::Nascent);
        assert_eq!(PathwayPhase::from_trust(0.3), PathwayPhase::Forming);
        assert_eq!(PathwayPhase::from_trust(0.9), PathwayPhase::Established);
    }

    #[test]
    fn test_trigger_source_mapping() {
        assert_eq!(TriggerType::Mention.source_type(), SourceType::Listening);
        assert_eq!(
            TriggerType::Conversation.source_type(),
            SourceType::Conversation
        );
    }
}
