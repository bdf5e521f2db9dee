use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KresnikConfig {
    pub llm: LlmConfig,
    pub organism: OrganismDefaults,
    pub memory: MemoryConfig,
    pub triad: TriadConfig,
    pub heartbeat: HeartbeatConfig,
}

impl KresnikConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: KresnikConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(n) = v.parse() {
                self.llm.temperature = n;
            }
        }
        if let Ok(v) = std::env::var("KRESNIK_DB") {
            self.organism.db_path = v;
        }
        if let Ok(v) = std::env::var("KRESNIK_VISION") {
            self.organism.vision_path = Some(v);
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: None,
            max_tokens: 1024,
            temperature: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrganismDefaults {
    pub db_path: String,
    /// Name used before the entity has chosen one for itself.
    pub name: String,
    pub tick_interval_secs: u64,
    /// Optional "founding vision" document reflected on during childhood.
    pub vision_path: Option<String>,
}

impl Default for OrganismDefaults {
    fn default() -> Self {
        Self {
            db_path: "kresnik.db".to_string(),
            name: "kresnik".to_string(),
            tick_interval_secs: 60,
            vision_path: None,
        }
    }
}

/// Memory graph and crystallization tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Synapses at or below this energy are pruned by the decay pass.
    pub prune_floor: f64,
    /// Energy added each time a synapse fires.
    pub fire_boost: f64,
    pub default_decay_rate: f64,
    pub conversation_synapse_energy: f64,
    pub dream_synapse_energy: f64,
    /// Summed seed strength a theme needs before it can crystallize.
    pub crystallization_threshold: i64,
    /// Max synapses archived to the network per dream.
    pub archive_limit: i64,
    pub archive_min_energy: f64,
    pub archive_min_age_hours: i64,
    /// Pathways fired within this window count as active.
    pub pathway_window_hours: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            prune_floor: 0.05,
            fire_boost: 0.15,
            default_decay_rate: 0.05,
            conversation_synapse_energy: 0.6,
            dream_synapse_energy: 0.5,
            crystallization_threshold: 5,
            archive_limit: 3,
            archive_min_energy: 1.5,
            archive_min_age_hours: 72,
            pathway_window_hours: 168,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriadConfig {
    /// Pre-verbal triads accumulated before the phases get named.
    pub naming_after_triads: i64,
    /// Triad interval between process reflections.
    pub reflect_every_triads: i64,
    pub beliefs_cap: usize,
    pub energy_delta_bound: f64,
}

impl Default for TriadConfig {
    fn default() -> Self {
        Self {
            naming_after_triads: 20,
            reflect_every_triads: 50,
            beliefs_cap: 20,
            energy_delta_bound: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Idle time after which each heartbeat recovers a little energy.
    pub idle_recovery_secs: i64,
    pub idle_energy_recovery: f64,
    pub dream_cooldown_secs: i64,
    pub dream_idle_secs: i64,
    pub dream_probability: f64,
    /// Reflect on the founding vision every Nth heartbeat.
    pub vision_every_beats: i64,
    pub vision_min_interval_secs: i64,
    /// Reflections needed before childhood may end.
    pub vision_reflections_needed: i64,
    /// Hard ceiling on vision reflections.
    pub vision_reflection_cap: i64,
    /// Minimum crystallized beliefs before childhood may end.
    pub maturity_min_crystals: i64,
    pub crystallizing_timeout_secs: i64,
    pub project_sweep_every: i64,
    pub project_attention_secs: i64,
    /// Spontaneous triad probability is `energy * spontaneous_scale`.
    pub spontaneous_scale: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            idle_recovery_secs: 30 * 60,
            idle_energy_recovery: 0.02,
            dream_cooldown_secs: 4 * 3600,
            dream_idle_secs: 30 * 60,
            dream_probability: 0.3,
            vision_every_beats: 10,
            vision_min_interval_secs: 6 * 3600,
            vision_reflections_needed: 5,
            vision_reflection_cap: 12,
            maturity_min_crystals: 1,
            crystallizing_timeout_secs: 48 * 3600,
            project_sweep_every: 30,
            project_attention_secs: 24 * 3600,
            spontaneous_scale: 0.15,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
