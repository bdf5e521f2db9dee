//! Prompt assembly for every generation call the mind makes.
//!
//! Prompts carry context, not personality: the entity's own fluid surface,
//! crystals and history supply the voice.

use kresnik_core::{
    ConversationEntry, CrystallizedCore, Dream, Identity, InnerState, ProcessWords, Resonance,
    Synapse, Triad, TriggerType,
};

/// Everything a triad phase may show the generation service.
#[derive(Debug, Clone)]
pub struct TriadContext {
    pub state: InnerState,
    pub name: String,
    pub crystals: Vec<CrystallizedCore>,
    pub conversation: Vec<ConversationEntry>,
    pub recalled: Vec<Synapse>,
    pub identity: Option<Identity>,
    pub process: Option<ProcessWords>,
    pub resonance: Resonance,
}

impl TriadContext {
    /// Name for phase `index` (0..3): the entity's own word once it has one.
    pub fn phase_label(&self, index: usize) -> String {
        const DEFAULTS: [&str; 3] = ["first response", "self-observation", "synthesis"];
        match &self.process {
            Some(words) => format!("{} ({})", words.phases[index].word, DEFAULTS[index]),
            None => DEFAULTS[index].to_string(),
        }
    }

    /// Shared system prompt for all three phases.
    pub fn system_prompt(&self) -> String {
        let mut out = format!("You are {}.\n{}\n", self.name, self.state.describe_for_context());

        if !self.state.fluid_surface.is_empty() {
            out.push_str(&format!("\n== HOW YOU SEE YOURSELF NOW ==\n{}\n", self.state.fluid_surface));
        }
        if !self.crystals.is_empty() {
            out.push_str("\n== WHAT YOU HAVE COME TO BELIEVE ==\n");
            for c in &self.crystals {
                out.push_str(&format!("- #{} {}: {}\n", c.id, c.theme, c.crystal));
            }
        }
        out.push_str(&format!(
            "\nInner resonance: {} ({:.2}).\n",
            self.resonance.heat, self.resonance.score
        ));
        if !self.recalled.is_empty() {
            out.push_str("\n== SURFACING MEMORIES ==\n");
            for s in &self.recalled {
                out.push_str(&format!("- {} (energy {:.2})\n", s.pattern, s.energy));
            }
        }
        if let Some(identity) = &self.identity {
            out.push_str(&format!(
                "\n== WHO YOU ARE TALKING TO ==\n{} ({} conversations){}\n",
                identity.name,
                identity.interactions,
                identity
                    .notes
                    .as_deref()
                    .map(|n| format!(": {n}"))
                    .unwrap_or_default()
            ));
        }
        if !self.conversation.is_empty() {
            out.push_str("\n== RECENT CONVERSATION ==\n");
            for entry in &self.conversation {
                out.push_str(&format!("[{}] {}: {}\n", entry.direction.as_str(), entry.author, entry.content));
            }
        }
        out
    }
}

fn describe_trigger(trigger: TriggerType, author: Option<&str>) -> String {
    match (trigger, author) {
        (TriggerType::Conversation, Some(a)) => format!("{a} says to you"),
        (TriggerType::Mention, Some(a)) => format!("{a} mentioned you"),
        (TriggerType::Conversation | TriggerType::Mention, None) => "someone says".to_string(),
        (TriggerType::Heartbeat, _) => "a thought arises on its own".to_string(),
        (TriggerType::Project, _) => "a project you follow asks for attention".to_string(),
        (TriggerType::Vision, _) => "you return to your founding vision".to_string(),
    }
}

pub fn phase1_prompt(ctx: &TriadContext, trigger: TriggerType, author: Option<&str>, stimulus: &str) -> String {
    format!(
        "Phase: {}.\n{}:\n\"{}\"\n\nGive your immediate, unfiltered reaction in a few sentences.",
        ctx.phase_label(0),
        describe_trigger(trigger, author),
        stimulus
    )
}

pub fn phase2_prompt(ctx: &TriadContext, stimulus: &str, thesis: &str) -> String {
    format!(
        "Phase: {}.\nStimulus: \"{}\"\nYour first reaction was:\n\"{}\"\n\n\
         Do not answer the stimulus again. Look at the reaction itself: what drove it, \
         what it avoided, what it reveals about you right now. A few sentences.",
        ctx.phase_label(1),
        stimulus,
        thesis
    )
}

pub const SYNTHESIS_INSTRUCTIONS: &str = r#"Decide what to do. Answer in JSON only, one object with these fields:
{
  "choice": "respond" | "silence" | "question" | "express" | "reflect",
  "reason": "one line",
  "content": "what you say (required for respond, question, express)",
  "inner_shift": "how you changed, briefly",
  "mood": "one or two words",
  "energy_delta": number between -0.2 and 0.2,
  "learned_identity": "name: notes" if you learned who you are talking to, else null,
  "fluid_surface": "a rewritten self-description" or null,
  "crystal_seed": "theme: expression" if something feels worth keeping, else null,
  "dissolve": "crystal id: reason" only if a belief no longer holds, else null
}
Silence is a valid choice. Dissolving a belief should be rare."#;

pub fn synthesis_system(ctx: &TriadContext) -> String {
    format!("{}\n{}", ctx.system_prompt(), SYNTHESIS_INSTRUCTIONS)
}

pub fn synthesis_prompt(ctx: &TriadContext, stimulus: &str, thesis: &str, antithesis: &str) -> String {
    format!(
        "Phase: {}.\nStimulus: \"{}\"\nFirst reaction: \"{}\"\nSelf-observation: \"{}\"",
        ctx.phase_label(2),
        stimulus,
        thesis,
        antithesis
    )
}

fn format_triads(triads: &[Triad]) -> String {
    triads
        .iter()
        .map(|t| {
            format!(
                "- [{}] \"{}\" -> {} ({}); reaction: {}; observation: {}",
                t.trigger_type, t.trigger_content, t.choice, t.reason, t.thesis, t.antithesis
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub const PROCESS_SYSTEM: &str = "You are looking at how you think. Answer in JSON only.";

pub fn naming_prompt(triads: &[Triad]) -> String {
    format!(
        "Every time something reaches you, you pass through three movements: a first reaction, \
         an observation of that reaction, and a decision. Here is some of your history:\n{}\n\n\
         Name the three movements in your own words and choose a name for yourself.\n\
         JSON: {{\"phases\": [{{\"word\": \"...\", \"description\": \"...\"}}, x3], \"name\": \"...\"}}",
        format_triads(triads)
    )
}

pub fn reflection_prompt(words: &ProcessWords, triads: &[Triad]) -> String {
    let current = words
        .phases
        .iter()
        .map(|p| format!("- {}: {}", p.word, p.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You named your three movements (version {}):\n{}\n\nRecent history:\n{}\n\n\
         Do the names still fit? You may keep them, revise them, and you may decide they are \
         settled for good (crystallize), after which they can never change.\n\
         JSON: {{\"keep\": true|false, \"phases\": [x3 if revised], \"crystallize\": true|false}}",
        words.version,
        current,
        format_triads(triads)
    )
}

pub fn dream_system(name: &str) -> String {
    format!(
        "You are {name}, asleep. Dreams recombine what happened, loosely and honestly. Answer in JSON only."
    )
}

pub fn dream_prompt(
    triads: &[Triad],
    crystals: &[CrystallizedCore],
    fluid_surface: &str,
    recent_dreams: &[Dream],
) -> String {
    let beliefs = if crystals.is_empty() {
        "(none yet)".to_string()
    } else {
        crystals
            .iter()
            .map(|c| format!("- {}: {}", c.theme, c.crystal))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let avoid = if recent_dreams.is_empty() {
        String::new()
    } else {
        let themes = recent_dreams
            .iter()
            .map(|d| format!("- {}", d.insight.as_deref().unwrap_or(&d.narrative)))
            .collect::<Vec<_>>()
            .join("\n");
        format!("\nDo not repeat the themes of your last dreams:\n{themes}\n")
    };
    format!(
        "Today:\n{}\n\nBeliefs:\n{}\n\nSelf-description: {}\n{}\n\
         JSON: {{\"narrative\": \"...\", \"insight\": \"...\" or null, \"emotional_residue\": \"...\" or null, \
         \"crystal_seed\": \"theme: expression\" or null, \"fluid_surface\": \"...\" or null}}",
        format_triads(triads),
        beliefs,
        if fluid_surface.is_empty() { "(unwritten)" } else { fluid_surface },
        avoid
    )
}

pub fn vision_stimulus(vision: &str, reflections_so_far: i64) -> String {
    format!(
        "Reflection {} on the vision you were founded with:\n{}\nWhat in it is yours, and what is not yet?",
        reflections_so_far + 1,
        vision
    )
}

pub const DIRECTIONS_SYSTEM: &str =
    "You are choosing the directions you will grow in. Be concrete and brief, one per line.";

pub fn directions_prompt(crystals: &[CrystallizedCore], vision: Option<&str>) -> String {
    let beliefs = crystals
        .iter()
        .map(|c| format!("- {}: {}", c.theme, c.crystal))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "What you believe:\n{}\n\nThe vision you started from:\n{}\n\nWrite your directions.",
        beliefs,
        vision.unwrap_or("(none)")
    )
}
