//! Crystallization: seeds accumulate per theme and are promoted to an
//! immutable crystal once strong enough and corroborated by at least two
//! distinct source types.

use crate::sqlite::SqliteStore;
use anyhow::{Context, Result};
use kresnik_core::{
    join_sources, split_sources, CrystalCandidate, CrystalSeed, CrystallizedCore, SourceType,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Distinct source types a theme needs before it may crystallize.
pub const MIN_DISTINCT_SOURCES: i64 = 2;

impl SqliteStore {
    /// Add one unit of strength to `theme` from `source_type`. The latest
    /// expression wins. Returns the theme's total strength afterwards.
    pub async fn add_crystal_seed(
        &self,
        theme: &str,
        expression: &str,
        source_type: SourceType,
        source_triad_id: Option<i64>,
        now: i64,
    ) -> Result<i64> {
        let theme = theme.trim();
        let expression = expression.trim();
        if theme.is_empty() {
            anyhow::bail!("crystal seed theme must not be empty");
        }

        let mut tx = self.pool.begin().await?;
        let seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM crystal_seeds")
            .fetch_one(&mut *tx)
            .await
            .context("Failed to allocate seed sequence")?;

        sqlx::query(
            r#"
            INSERT INTO crystal_seeds (theme, source_type, expression, source_triad_id, strength, seq, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(theme, source_type) DO UPDATE SET
                expression = excluded.expression,
                source_triad_id = excluded.source_triad_id,
                strength = strength + 1,
                seq = excluded.seq,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(theme)
        .bind(source_type.as_str())
        .bind(expression)
        .bind(source_triad_id)
        .bind(seq)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert crystal seed")?;

        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(strength), 0) FROM crystal_seeds WHERE theme = ?")
            .bind(theme)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to sum seed strength")?;
        tx.commit().await?;

        tracing::debug!(theme, source = %source_type, total, "Crystal seed accepted");
        Ok(total)
    }

    pub async fn get_crystal_seeds(&self) -> Result<Vec<CrystalSeed>> {
        let rows = sqlx::query("SELECT * FROM crystal_seeds ORDER BY theme ASC, source_type ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query crystal seeds")?;
        rows.iter().map(seed_from_row).collect()
    }

    /// Themes with summed strength `>= threshold` and at least two distinct
    /// source types, ordered by theme.
    pub async fn check_crystallization(&self, threshold: i64) -> Result<Vec<CrystalCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT
                s.theme AS theme,
                SUM(s.strength) AS total,
                COUNT(DISTINCT s.source_type) AS distinct_sources,
                GROUP_CONCAT(s.source_type) AS sources,
                (SELECT e.expression FROM crystal_seeds e
                 WHERE e.theme = s.theme ORDER BY e.seq DESC LIMIT 1) AS expression
            FROM crystal_seeds s
            GROUP BY s.theme
            HAVING SUM(s.strength) >= ? AND COUNT(DISTINCT s.source_type) >= ?
            ORDER BY s.theme ASC
            "#,
        )
        .bind(threshold)
        .bind(MIN_DISTINCT_SOURCES)
        .fetch_all(&self.pool)
        .await
        .context("Failed to check crystallization")?;

        Ok(rows
            .iter()
            .map(|row| {
                let sources: String = row.get("sources");
                let mut sources = split_sources(&sources);
                sources.sort();
                sources.dedup();
                CrystalCandidate {
                    theme: row.get("theme"),
                    expression: row.get("expression"),
                    total_strength: row.get("total"),
                    sources,
                }
            })
            .collect())
    }

    /// Write an immutable crystal and clear every seed of its theme, in one
    /// transaction.
    pub async fn crystallize(
        &self,
        theme: &str,
        expression: &str,
        strength: i64,
        sources: &[SourceType],
        now: i64,
    ) -> Result<i64> {
        let theme = theme.trim();
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO crystallized_core (theme, crystal, formed_from_seeds, seed_sources, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(theme)
        .bind(expression.trim())
        .bind(strength)
        .bind(join_sources(sources))
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert crystal")?
        .last_insert_rowid();

        sqlx::query("DELETE FROM crystal_seeds WHERE theme = ?")
            .bind(theme)
            .execute(&mut *tx)
            .await
            .context("Failed to clear crystallized seeds")?;

        tx.commit().await?;
        tracing::info!(crystal_id = id, theme, strength, "Theme crystallized");
        Ok(id)
    }

    /// Tombstone a crystal. Returns false if it does not exist or is
    /// already dissolved.
    pub async fn dissolve_crystal(&self, id: i64, reason: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE crystallized_core SET dissolved_at = ?, dissolve_reason = ? WHERE id = ? AND dissolved_at IS NULL",
        )
        .bind(now)
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to dissolve crystal")?;

        let dissolved = result.rows_affected() > 0;
        if dissolved {
            tracing::info!(crystal_id = id, reason, "Crystal dissolved");
        }
        Ok(dissolved)
    }

    pub async fn get_crystal(&self, id: i64) -> Result<Option<CrystallizedCore>> {
        let row = sqlx::query("SELECT * FROM crystallized_core WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query crystal")?;
        Ok(row.as_ref().map(crystal_from_row))
    }

    /// Active (not dissolved) crystals, oldest first.
    pub async fn get_crystallized_core(&self) -> Result<Vec<CrystallizedCore>> {
        let rows = sqlx::query("SELECT * FROM crystallized_core WHERE dissolved_at IS NULL ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query crystallized core")?;
        Ok(rows.iter().map(crystal_from_row).collect())
    }

    /// Every crystal ever formed, dissolved ones included.
    pub async fn get_crystal_history(&self) -> Result<Vec<CrystallizedCore>> {
        let rows = sqlx::query("SELECT * FROM crystallized_core ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query crystal history")?;
        Ok(rows.iter().map(crystal_from_row).collect())
    }
}

fn seed_from_row(row: &SqliteRow) -> Result<CrystalSeed> {
    let source: String = row.get("source_type");
    Ok(CrystalSeed {
        theme: row.get("theme"),
        expression: row.get("expression"),
        source_type: source.parse()?,
        source_triad_id: row.get("source_triad_id"),
        strength: row.get("strength"),
        updated_at: row.get("updated_at"),
    })
}

fn crystal_from_row(row: &SqliteRow) -> CrystallizedCore {
    let sources: String = row.get("seed_sources");
    CrystallizedCore {
        id: row.get("id"),
        theme: row.get("theme"),
        crystal: row.get("crystal"),
        formed_from_seeds: row.get("formed_from_seeds"),
        seed_sources: split_sources(&sources),
        created_at: row.get("created_at"),
        dissolved_at: row.get("dissolved_at"),
        dissolve_reason: row.get("dissolve_reason"),
    }
}
