//! Memory graph: synapses, connections and thematic pathways.

use crate::similarity::{cosine_similarity, embed};
use crate::sqlite::SqliteStore;
use anyhow::{Context, Result};
use kresnik_core::{
    truncate_chars, Connection, HeatLevel, MemoryStats, NewSynapse, Pathway, PathwayPhase,
    Resonance, SourceType, Synapse, MAX_PATTERN_CHARS,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const SECS_PER_DAY: f64 = 86_400.0;
/// Recency half-scale for pathway resonance, in hours.
const RESONANCE_DECAY_HOURS: f64 = 48.0;
const NEW_PATHWAY_TRUST: f64 = 0.1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayReport {
    pub decayed: u64,
    pub pruned: u64,
}

impl SqliteStore {
    pub async fn create_synapse(&self, synapse: &NewSynapse, now: i64) -> Result<i64> {
        let pattern = truncate_chars(synapse.pattern.trim(), MAX_PATTERN_CHARS);
        let energy = if synapse.energy.is_finite() { synapse.energy.max(0.0) } else { 0.0 };
        let valence = if synapse.valence.is_finite() { synapse.valence.clamp(-1.0, 1.0) } else { 0.0 };
        let tags = serde_json::to_string(&synapse.tags).context("Failed to serialize tags")?;

        let result = sqlx::query(
            r#"
            INSERT INTO synapses
                (pattern, energy, decay_rate, valence, source_type, source_triad_id, tags, fired_at, decayed_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pattern)
        .bind(energy)
        .bind(synapse.decay_rate.max(0.0))
        .bind(valence)
        .bind(synapse.source_type.as_str())
        .bind(synapse.source_triad_id)
        .bind(&tags)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert synapse")?;

        let id = result.last_insert_rowid();
        tracing::debug!(synapse_id = id, source = %synapse.source_type, "Synapse created");
        Ok(id)
    }

    pub async fn get_synapse(&self, id: i64) -> Result<Option<Synapse>> {
        let row = sqlx::query("SELECT * FROM synapses WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query synapse")?;
        row.as_ref().map(synapse_from_row).transpose()
    }

    /// Reinforce a synapse. Returns false if it no longer exists.
    pub async fn fire_synapse(&self, id: i64, boost: f64, now: i64) -> Result<bool> {
        let boost = if boost.is_finite() { boost.max(0.0) } else { 0.0 };
        let result = sqlx::query("UPDATE synapses SET energy = energy + ?, fired_at = ? WHERE id = ?")
            .bind(boost)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to fire synapse")?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply elapsed-time decay to every synapse, then prune those at or
    /// below `floor` together with their connections.
    pub async fn decay_synapses(&self, floor: f64, now: i64) -> Result<DecayReport> {
        let mut tx = self.pool.begin().await?;

        let decayed = sqlx::query(
            r#"
            UPDATE synapses SET
                energy = energy - decay_rate * ((? - decayed_at) / ?),
                decayed_at = ?
            WHERE decayed_at < ?
            "#,
        )
        .bind(now)
        .bind(SECS_PER_DAY)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to decay synapses")?
        .rows_affected();

        let pruned = sqlx::query("DELETE FROM synapses WHERE energy <= ?")
            .bind(floor)
            .execute(&mut *tx)
            .await
            .context("Failed to prune synapses")?
            .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM connections
            WHERE from_synapse NOT IN (SELECT id FROM synapses)
               OR to_synapse NOT IN (SELECT id FROM synapses)
            "#,
        )
        .execute(&mut *tx)
        .await
        .context("Failed to remove orphaned connections")?;

        tx.commit().await?;

        if pruned > 0 {
            tracing::info!("Decay pass: {} decayed, {} pruned", decayed, pruned);
        }
        Ok(DecayReport { decayed, pruned })
    }

    pub async fn get_top_synapses(&self, n: i64) -> Result<Vec<Synapse>> {
        let rows = sqlx::query("SELECT * FROM synapses ORDER BY energy DESC, id ASC LIMIT ?")
            .bind(n)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query top synapses")?;
        rows.iter().map(synapse_from_row).collect()
    }

    pub async fn get_weak_synapses(&self, n: i64) -> Result<Vec<Synapse>> {
        let rows = sqlx::query("SELECT * FROM synapses ORDER BY energy ASC, id ASC LIMIT ?")
            .bind(n)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query weak synapses")?;
        rows.iter().map(synapse_from_row).collect()
    }

    pub async fn get_strong_synapses(&self, min_energy: f64, limit: i64) -> Result<Vec<Synapse>> {
        let rows = sqlx::query(
            "SELECT * FROM synapses WHERE energy >= ? ORDER BY energy DESC, id ASC LIMIT ?",
        )
        .bind(min_energy)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query strong synapses")?;
        rows.iter().map(synapse_from_row).collect()
    }

    /// Up to `n` synapses lexically closest to `text`. Ties break on energy,
    /// then id. Synapses with no overlap are never returned.
    pub async fn find_similar_synapses(&self, text: &str, n: usize) -> Result<Vec<Synapse>> {
        let query = embed(text);
        let rows = sqlx::query("SELECT * FROM synapses")
            .fetch_all(&self.pool)
            .await
            .context("Failed to scan synapses")?;

        let mut scored: Vec<(f32, Synapse)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let synapse = synapse_from_row(row)?;
            let score = cosine_similarity(&query, &embed(&synapse.pattern));
            if score > 0.0 {
                scored.push((score, synapse));
            }
        }

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa)
                .then_with(|| b.energy.total_cmp(&a.energy))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(scored.into_iter().take(n).map(|(_, s)| s).collect())
    }

    pub async fn synapse_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM synapses")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count synapses")?;
        Ok(count)
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Add a directed edge. Parallel edges are allowed.
    pub async fn create_connection(&self, from: i64, to: i64, weight: f64, now: i64) -> Result<i64> {
        let weight = if weight.is_finite() { weight.clamp(0.0, 1.0) } else { 0.0 };
        let result = sqlx::query(
            "INSERT INTO connections (from_synapse, to_synapse, weight, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(from)
        .bind(to)
        .bind(weight)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert connection")?;
        Ok(result.last_insert_rowid())
    }

    pub async fn connections_from(&self, synapse_id: i64) -> Result<Vec<Connection>> {
        let rows = sqlx::query("SELECT * FROM connections WHERE from_synapse = ? ORDER BY id")
            .bind(synapse_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query connections")?;
        Ok(rows
            .iter()
            .map(|row| Connection {
                id: row.get("id"),
                from_synapse: row.get("from_synapse"),
                to_synapse: row.get("to_synapse"),
                weight: row.get("weight"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn connection_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM connections")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count connections")?;
        Ok(count)
    }

    // =========================================================================
    // Pathways
    // =========================================================================

    /// Pathways whose theme is one of the synapse's tags.
    pub async fn get_pathways_for_synapse(&self, synapse_id: i64) -> Result<Vec<Pathway>> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM synapses s
            JOIN json_each(s.tags) t
            JOIN pathways p ON p.theme = t.value
            WHERE s.id = ?
            ORDER BY p.trust DESC, p.theme ASC
            "#,
        )
        .bind(synapse_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query pathways for synapse")?;
        rows.iter().map(pathway_from_row).collect()
    }

    /// Shift a theme's trust by `delta` (clamped to `[0, 1]`), creating the
    /// pathway if it does not exist yet.
    pub async fn fire_pathway(
        &self,
        theme: &str,
        note: &str,
        delta: f64,
        source: &str,
        now: i64,
    ) -> Result<Pathway> {
        let theme = theme.trim();
        let delta = if delta.is_finite() { delta } else { 0.0 };
        let mut tx = self.pool.begin().await?;

        let current: Option<f64> = sqlx::query_scalar("SELECT trust FROM pathways WHERE theme = ?")
            .bind(theme)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to read pathway")?;
        let trust = (current.unwrap_or(NEW_PATHWAY_TRUST) + delta).clamp(0.0, 1.0);
        let phase = PathwayPhase::from_trust(trust);

        sqlx::query(
            r#"
            INSERT INTO pathways (theme, phase, trust, fire_count, last_note, last_source, fired_at, created_at)
            VALUES (?, ?, ?, 1, ?, ?, ?, ?)
            ON CONFLICT(theme) DO UPDATE SET
                phase = excluded.phase,
                trust = excluded.trust,
                fire_count = fire_count + 1,
                last_note = excluded.last_note,
                last_source = excluded.last_source,
                fired_at = excluded.fired_at
            "#,
        )
        .bind(theme)
        .bind(phase.as_str())
        .bind(trust)
        .bind(note)
        .bind(source)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert pathway")?;

        let row = sqlx::query("SELECT * FROM pathways WHERE theme = ?")
            .bind(theme)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to reload pathway")?;
        tx.commit().await?;

        pathway_from_row(&row)
    }

    /// Pathways fired within the window, most trusted first.
    pub async fn get_active_pathways(&self, n: i64, window_hours: i64, now: i64) -> Result<Vec<Pathway>> {
        let rows = sqlx::query(
            "SELECT * FROM pathways WHERE fired_at >= ? ORDER BY trust DESC, fired_at DESC LIMIT ?",
        )
        .bind(now - window_hours * 3600)
        .bind(n)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query active pathways")?;
        rows.iter().map(pathway_from_row).collect()
    }

    /// Sum of trust over active pathways, each discounted by age.
    pub async fn get_pathway_resonance(&self, window_hours: i64, now: i64) -> Result<Resonance> {
        let active = self.get_active_pathways(i64::MAX, window_hours, now).await?;
        let score = resonance_score(&active, now);
        Ok(Resonance {
            score,
            heat: HeatLevel::from_score(score),
        })
    }

    // =========================================================================
    // Archive
    // =========================================================================

    /// Strong, long-lived synapses not yet archived.
    pub async fn archive_candidates(
        &self,
        limit: i64,
        min_energy: f64,
        min_age_secs: i64,
        now: i64,
    ) -> Result<Vec<Synapse>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM synapses
            WHERE archived_ref IS NULL AND energy >= ? AND created_at <= ?
            ORDER BY energy DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(min_energy)
        .bind(now - min_age_secs)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query archive candidates")?;
        rows.iter().map(synapse_from_row).collect()
    }

    pub async fn mark_archived(&self, id: i64, reference: &str, now: i64) -> Result<()> {
        sqlx::query("UPDATE synapses SET archived_ref = ?, archived_at = ? WHERE id = ?")
            .bind(reference)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to mark synapse archived")?;
        Ok(())
    }

    pub async fn memory_stats(&self, window_hours: i64, now: i64) -> Result<MemoryStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM synapses) AS synapses,
                (SELECT COALESCE(SUM(energy), 0.0) FROM synapses) AS total_energy,
                (SELECT COUNT(*) FROM connections) AS connections,
                (SELECT COUNT(*) FROM pathways WHERE fired_at >= ?) AS active_pathways,
                (SELECT COUNT(*) FROM crystallized_core WHERE dissolved_at IS NULL) AS active_crystals
            "#,
        )
        .bind(now - window_hours * 3600)
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate memory stats")?;

        Ok(MemoryStats {
            synapses: row.get("synapses"),
            total_energy: row.get("total_energy"),
            connections: row.get("connections"),
            active_pathways: row.get("active_pathways"),
            active_crystals: row.get("active_crystals"),
        })
    }
}

pub fn resonance_score(active: &[Pathway], now: i64) -> f64 {
    active
        .iter()
        .map(|p| {
            let age_hours = ((now - p.fired_at).max(0)) as f64 / 3600.0;
            p.trust * (-age_hours / RESONANCE_DECAY_HOURS).exp()
        })
        .sum()
}

pub(crate) fn synapse_from_row(row: &SqliteRow) -> Result<Synapse> {
    let source: String = row.get("source_type");
    let tags: String = row.get("tags");
    Ok(Synapse {
        id: row.get("id"),
        pattern: row.get("pattern"),
        energy: row.get("energy"),
        decay_rate: row.get("decay_rate"),
        valence: row.get("valence"),
        source_type: source.parse().unwrap_or(SourceType::Observation),
        source_triad_id: row.get("source_triad_id"),
        tags: serde_json::from_str(&tags).context("Failed to parse synapse tags")?,
        fired_at: row.get("fired_at"),
        created_at: row.get("created_at"),
        archived_ref: row.get("archived_ref"),
    })
}

fn pathway_from_row(row: &SqliteRow) -> Result<Pathway> {
    let phase: String = row.get("phase");
    Ok(Pathway {
        theme: row.get("theme"),
        phase: phase.parse()?,
        trust: row.get("trust"),
        fire_count: row.get("fire_count"),
        last_note: row.get("last_note"),
        last_source: row.get("last_source"),
        fired_at: row.get("fired_at"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pathway(trust: f64, fired_at: i64) -> Pathway {
        Pathway {
            theme: "t".into(),
            phase: PathwayPhase::from_trust(trust),
            trust,
            fire_count: 1,
            last_note: None,
            last_source: None,
            fired_at,
            created_at: fired_at,
        }
    }

    #[test]
    fn test_resonance_fresh_pathways_sum_trust() {
        let now = 1_000_000;
        let score = resonance_score(&[pathway(0.5, now), pathway(0.25, now)], now);
        assert!((score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_resonance_decays_with_age() {
        let now = 1_000_000;
        let fresh = resonance_score(&[pathway(1.0, now)], now);
        let old = resonance_score(&[pathway(1.0, now - 48 * 3600)], now);
        assert!(old < fresh);
        assert!((old - (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn test_resonance_monotonic_in_trust() {
        let now = 500_000;
        let low = resonance_score(&[pathway(0.2, now - 3600)], now);
        let high = resonance_score(&[pathway(0.8, now - 3600)], now);
        assert!(high > low);
    }
}
