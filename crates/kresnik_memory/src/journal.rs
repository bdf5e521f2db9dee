//! Append-only triad and dream logs, plus the process-words singleton.

use crate::sqlite::SqliteStore;
use anyhow::{Context, Result};
use kresnik_core::{Dream, NewTriad, PhaseName, ProcessWords, Triad};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl SqliteStore {
    pub async fn insert_triad(&self, triad: &NewTriad, now: i64) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO triads (
                trigger_type, trigger_content, author, thesis, antithesis,
                choice, reason, content, inner_shift, mood_before, mood_after, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(triad.trigger_type.as_str())
        .bind(&triad.trigger_content)
        .bind(&triad.author)
        .bind(&triad.thesis)
        .bind(&triad.antithesis)
        .bind(triad.choice.as_str())
        .bind(&triad.reason)
        .bind(&triad.content)
        .bind(&triad.inner_shift)
        .bind(&triad.mood_before)
        .bind(&triad.mood_after)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert triad")?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_triad(&self, id: i64) -> Result<Option<Triad>> {
        let row = sqlx::query("SELECT * FROM triads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query triad")?;
        row.as_ref().map(triad_from_row).transpose()
    }

    /// Most recent `n` triads, oldest first.
    pub async fn recent_triads(&self, n: i64) -> Result<Vec<Triad>> {
        let rows = sqlx::query("SELECT * FROM triads ORDER BY id DESC LIMIT ?")
            .bind(n)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query recent triads")?;
        let mut triads = rows.iter().map(triad_from_row).collect::<Result<Vec<_>>>()?;
        triads.reverse();
        Ok(triads)
    }

    pub async fn triad_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM triads")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count triads")?;
        Ok(count)
    }

    // =========================================================================
    // Dreams
    // =========================================================================

    pub async fn insert_dream(
        &self,
        source_triad_ids: &[i64],
        narrative: &str,
        insight: Option<&str>,
        emotional_residue: Option<&str>,
        now: i64,
    ) -> Result<i64> {
        let ids = serde_json::to_string(source_triad_ids).context("Failed to serialize triad ids")?;
        let result = sqlx::query(
            "INSERT INTO dreams (source_triad_ids, narrative, insight, emotional_residue, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&ids)
        .bind(narrative)
        .bind(insight)
        .bind(emotional_residue)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert dream")?;
        Ok(result.last_insert_rowid())
    }

    /// Most recent `n` dreams, newest first.
    pub async fn recent_dreams(&self, n: i64) -> Result<Vec<Dream>> {
        let rows = sqlx::query("SELECT * FROM dreams ORDER BY id DESC LIMIT ?")
            .bind(n)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query recent dreams")?;
        rows.iter()
            .map(|row| {
                let ids: String = row.get("source_triad_ids");
                Ok(Dream {
                    id: row.get("id"),
                    source_triad_ids: serde_json::from_str(&ids).context("Failed to parse dream triad ids")?,
                    narrative: row.get("narrative"),
                    insight: row.get("insight"),
                    emotional_residue: row.get("emotional_residue"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    pub async fn last_dream_at(&self) -> Result<Option<i64>> {
        let at: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM dreams")
            .fetch_one(&self.pool)
            .await
            .context("Failed to query last dream time")?;
        Ok(at)
    }

    // =========================================================================
    // Process words
    // =========================================================================

    /// `None` while the entity is still pre-verbal.
    pub async fn load_process_words(&self) -> Result<Option<ProcessWords>> {
        let row = sqlx::query("SELECT * FROM process_words WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query process_words")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let phases: String = row.get("phases");
        let phases: [PhaseName; 3] =
            serde_json::from_str(&phases).context("Failed to parse process phases")?;
        let crystallized: i64 = row.get("crystallized");
        Ok(Some(ProcessWords {
            phases,
            version: row.get("version"),
            crystallized: crystallized != 0,
            updated_at: row.get("updated_at"),
        }))
    }

    /// Store new phase names, bumping the version. Refused once crystallized.
    pub async fn save_process_words(
        &self,
        phases: &[PhaseName; 3],
        crystallize: bool,
        now: i64,
    ) -> Result<ProcessWords> {
        if let Some(existing) = self.load_process_words().await? {
            if existing.crystallized {
                anyhow::bail!("process words are crystallized and cannot be revised");
            }
        }
        let json = serde_json::to_string(phases).context("Failed to serialize process phases")?;
        sqlx::query(
            r#"
            INSERT INTO process_words (id, phases, version, crystallized, updated_at)
            VALUES (1, ?, 1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                phases = excluded.phases,
                version = version + 1,
                crystallized = excluded.crystallized,
                updated_at = excluded.updated_at
            WHERE crystallized = 0
            "#,
        )
        .bind(&json)
        .bind(crystallize as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to save process_words")?;

        self.load_process_words()
            .await?
            .context("process_words missing after save")
    }

    /// Freeze the current phase names without changing them.
    pub async fn crystallize_process_words(&self, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE process_words SET crystallized = 1, updated_at = ? WHERE id = 1 AND crystallized = 0",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to crystallize process_words")?;
        Ok(result.rows_affected() > 0)
    }
}

fn triad_from_row(row: &SqliteRow) -> Result<Triad> {
    let trigger: String = row.get("trigger_type");
    let choice: String = row.get("choice");
    Ok(Triad {
        id: row.get("id"),
        trigger_type: trigger.parse()?,
        trigger_content: row.get("trigger_content"),
        author: row.get("author"),
        thesis: row.get("thesis"),
        antithesis: row.get("antithesis"),
        choice: choice.parse()?,
        reason: row.get("reason"),
        content: row.get("content"),
        inner_shift: row.get("inner_shift"),
        mood_before: row.get("mood_before"),
        mood_after: row.get("mood_after"),
        created_at: row.get("created_at"),
    })
}
