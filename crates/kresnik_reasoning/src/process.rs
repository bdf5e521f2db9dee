//! Process naming and reflection: the entity names its own three phases,
//! then revisits the names until it freezes them.

use crate::decision::{non_empty, parse_json_lenient};
use crate::mind::{Mind, MindEvent, MindGuard};
use crate::prompts;
use anyhow::Result;
use kresnik_core::PhaseName;
use serde::Deserialize;

const HISTORY_TRIADS: i64 = 20;

#[derive(Debug, Deserialize)]
struct NamingResponse {
    phases: Vec<PhaseName>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReflectionResponse {
    #[serde(default = "default_keep")]
    keep: bool,
    #[serde(default)]
    phases: Option<Vec<PhaseName>>,
    #[serde(default)]
    crystallize: bool,
}

fn default_keep() -> bool {
    true
}

/// Exactly three phases, each with a non-empty word.
fn three_phases(phases: Vec<PhaseName>) -> Option<[PhaseName; 3]> {
    let phases: Vec<PhaseName> = phases
        .into_iter()
        .map(|p| PhaseName {
            word: p.word.trim().to_string(),
            description: p.description.trim().to_string(),
        })
        .collect();
    if phases.iter().any(|p| p.word.is_empty()) {
        return None;
    }
    phases.try_into().ok()
}

/// Whether process naming is due at `triad_count`.
pub fn naming_due(triad_count: i64, named: bool, after: i64) -> bool {
    !named && triad_count >= after
}

/// Whether a reflection is due: every `every` triads past the naming
/// point, until frozen.
pub fn reflection_due(triad_count: i64, after: i64, every: i64, crystallized: bool) -> bool {
    !crystallized && every > 0 && triad_count > after && (triad_count - after) % every == 0
}

impl Mind {
    /// Called after every completed triad.
    pub(crate) async fn run_process_routines(&self, guard: &MindGuard<'_>, now: i64) -> Result<()> {
        let cfg = &self.config().triad;
        let count = self.store().triad_count().await?;
        let words = self.store().load_process_words().await?;

        match words {
            None if naming_due(count, false, cfg.naming_after_triads) => {
                self.name_process(guard, now).await
            }
            Some(w) if reflection_due(count, cfg.naming_after_triads, cfg.reflect_every_triads, w.crystallized) => {
                self.reflect_on_process(guard, now).await
            }
            _ => Ok(()),
        }
    }

    /// One-shot: name the three phases and pick a self-identifier.
    /// Generation failures leave the entity unnamed until the next triad.
    async fn name_process(&self, _guard: &MindGuard<'_>, now: i64) -> Result<()> {
        let triads = self.store().recent_triads(HISTORY_TRIADS).await?;
        let Ok(raw) = self
            .generate(prompts::PROCESS_SYSTEM, &prompts::naming_prompt(&triads))
            .await
        else {
            return Ok(());
        };
        let response: NamingResponse = match parse_json_lenient(&raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Process naming response rejected: {}", e);
                return Ok(());
            }
        };
        let Some(phases) = three_phases(response.phases) else {
            tracing::warn!("Process naming did not return three named phases");
            return Ok(());
        };

        let saved = self.store().save_process_words(&phases, false, now).await?;
        let name = non_empty(response.name);
        if let Some(name) = &name {
            self.store().set_entity_name(name).await?;
        }
        tracing::info!(
            version = saved.version,
            name = name.as_deref().unwrap_or("-"),
            "Process named: {} / {} / {}",
            phases[0].word,
            phases[1].word,
            phases[2].word
        );
        self.emit(MindEvent::ProcessNamed {
            words: phases.map(|p| p.word),
            name,
        });
        Ok(())
    }

    async fn reflect_on_process(&self, _guard: &MindGuard<'_>, now: i64) -> Result<()> {
        let Some(words) = self.store().load_process_words().await? else {
            return Ok(());
        };
        let triads = self.store().recent_triads(HISTORY_TRIADS).await?;
        let Ok(raw) = self
            .generate(prompts::PROCESS_SYSTEM, &prompts::reflection_prompt(&words, &triads))
            .await
        else {
            return Ok(());
        };
        let response: ReflectionResponse = match parse_json_lenient(&raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Process reflection response rejected: {}", e);
                return Ok(());
            }
        };

        let revised = if response.keep {
            None
        } else {
            response.phases.and_then(three_phases)
        };

        let updated = match revised {
            Some(phases) => Some(self.store().save_process_words(&phases, response.crystallize, now).await?),
            None if response.crystallize => {
                self.store().crystallize_process_words(now).await?;
                self.store().load_process_words().await?
            }
            None => None,
        };

        if let Some(updated) = updated {
            tracing::info!(version = updated.version, crystallized = updated.crystallized, "Process words revised");
            self.emit(MindEvent::ProcessRevised {
                version: updated.version,
                crystallized: updated.crystallized,
            });
        } else {
            tracing::debug!("Process words kept");
        }
        Ok(())
    }
}
