//! Conversation log, identities, observations, projects, the external
//! event inbox and daily snapshot bookkeeping.

use crate::sqlite::SqliteStore;
use anyhow::{Context, Result};
use kresnik_core::{ConversationEntry, Direction, ExternalEvent, Identity, Observation, Project};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl SqliteStore {
    // =========================================================================
    // Conversations
    // =========================================================================

    pub async fn log_conversation(
        &self,
        channel: &str,
        author: &str,
        direction: Direction,
        content: &str,
        now: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO conversations (channel, author, direction, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(channel)
        .bind(author)
        .bind(direction.as_str())
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to log conversation")?;
        Ok(result.last_insert_rowid())
    }

    /// Last `n` conversation entries in chronological order.
    pub async fn recent_conversation(&self, n: i64) -> Result<Vec<ConversationEntry>> {
        let rows = sqlx::query("SELECT * FROM conversations ORDER BY id DESC LIMIT ?")
            .bind(n)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query conversations")?;
        let mut entries = rows
            .iter()
            .map(|row| {
                let direction: String = row.get("direction");
                Ok(ConversationEntry {
                    id: row.get("id"),
                    channel: row.get("channel"),
                    author: row.get("author"),
                    direction: direction.parse()?,
                    content: row.get("content"),
                    created_at: row.get("created_at"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    // =========================================================================
    // Identities
    // =========================================================================

    /// Record what the entity learned about an interlocutor and count the
    /// interaction. Notes are kept when the new value is `None`.
    pub async fn upsert_identity(
        &self,
        author_id: &str,
        name: &str,
        notes: Option<&str>,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO identities (author_id, name, notes, interactions, first_seen_at, last_seen_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(author_id) DO UPDATE SET
                name = excluded.name,
                notes = COALESCE(excluded.notes, notes),
                interactions = interactions + 1,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(author_id)
        .bind(name)
        .bind(notes)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to upsert identity")?;
        Ok(())
    }

    pub async fn get_identity(&self, author_id: &str) -> Result<Option<Identity>> {
        let row = sqlx::query("SELECT * FROM identities WHERE author_id = ?")
            .bind(author_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query identity")?;
        Ok(row.map(|row| Identity {
            author_id: row.get("author_id"),
            name: row.get("name"),
            notes: row.get("notes"),
            interactions: row.get("interactions"),
            first_seen_at: row.get("first_seen_at"),
            last_seen_at: row.get("last_seen_at"),
        }))
    }

    // =========================================================================
    // Observations
    // =========================================================================

    pub async fn record_observation(&self, kind: &str, content: &str, now: i64) -> Result<i64> {
        let result = sqlx::query("INSERT INTO observations (kind, content, created_at) VALUES (?, ?, ?)")
            .bind(kind)
            .bind(content)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to record observation")?;
        Ok(result.last_insert_rowid())
    }

    /// Newest first.
    pub async fn recent_observations(&self, n: i64) -> Result<Vec<Observation>> {
        let rows = sqlx::query("SELECT * FROM observations ORDER BY id DESC LIMIT ?")
            .bind(n)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query observations")?;
        Ok(rows
            .iter()
            .map(|row| Observation {
                id: row.get("id"),
                kind: row.get("kind"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    // =========================================================================
    // Projects
    // =========================================================================

    /// Track a project by name. Re-adding an existing name reactivates it.
    pub async fn add_project(&self, name: &str, description: &str, now: i64) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO projects (name, description, active, created_at) VALUES (?, ?, 1, ?)
            ON CONFLICT(name) DO UPDATE SET description = excluded.description, active = 1
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to add project")?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM projects WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .context("Failed to read project id")?;
        Ok(id)
    }

    pub async fn set_project_active(&self, id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE projects SET active = ? WHERE id = ?")
            .bind(active as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update project")?;
        Ok(())
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list projects")?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    /// Active projects not attended within `interval_secs`, least recently
    /// attended first.
    pub async fn projects_needing_attention(&self, now: i64, interval_secs: i64) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM projects
            WHERE active = 1 AND (last_attended_at IS NULL OR last_attended_at <= ?)
            ORDER BY COALESCE(last_attended_at, 0) ASC, id ASC
            "#,
        )
        .bind(now - interval_secs)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query projects needing attention")?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    pub async fn mark_project_attended(&self, id: i64, now: i64) -> Result<()> {
        sqlx::query("UPDATE projects SET last_attended_at = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to mark project attended")?;
        Ok(())
    }

    // =========================================================================
    // Inbox
    // =========================================================================

    pub async fn push_external_event(
        &self,
        source: &str,
        author: &str,
        content: &str,
        received_at: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO inbox (source, author, content, received_at) VALUES (?, ?, ?, ?)",
        )
        .bind(source)
        .bind(author)
        .bind(content)
        .bind(received_at)
        .execute(&self.pool)
        .await
        .context("Failed to buffer external event")?;
        Ok(result.last_insert_rowid())
    }

    /// Oldest unconsumed event, left in the inbox.
    pub async fn peek_next_external_event(&self) -> Result<Option<ExternalEvent>> {
        let row = sqlx::query(
            "SELECT * FROM inbox WHERE consumed_at IS NULL ORDER BY received_at ASC, id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read inbox")?;
        Ok(row.as_ref().map(event_from_row))
    }

    /// Mark an event handled. Returns false if it was already consumed.
    pub async fn consume_external_event(&self, id: i64, now: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE inbox SET consumed_at = ? WHERE id = ? AND consumed_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to consume inbox event")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn pending_event_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inbox WHERE consumed_at IS NULL")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count inbox")?;
        Ok(count)
    }

    /// Newest `received_at` in the inbox, used as the network poll cursor.
    pub async fn latest_event_at(&self) -> Result<Option<i64>> {
        let at: Option<i64> = sqlx::query_scalar("SELECT MAX(received_at) FROM inbox")
            .fetch_one(&self.pool)
            .await
            .context("Failed to query inbox cursor")?;
        Ok(at)
    }

    // =========================================================================
    // Daily snapshots
    // =========================================================================

    /// Claim `day` for a snapshot. Returns false if one was already recorded.
    pub async fn claim_daily_snapshot(&self, day: &str, payload: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO daily_snapshots (day, payload, created_at) VALUES (?, ?, ?)",
        )
        .bind(day)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to record daily snapshot")?;
        Ok(result.rows_affected() > 0)
    }
}

fn project_from_row(row: &SqliteRow) -> Project {
    let active: i64 = row.get("active");
    Project {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        active: active != 0,
        last_attended_at: row.get("last_attended_at"),
        created_at: row.get("created_at"),
    }
}

fn event_from_row(row: &SqliteRow) -> ExternalEvent {
    ExternalEvent {
        id: row.get("id"),
        source: row.get("source"),
        author: row.get("author"),
        content: row.get("content"),
        received_at: row.get("received_at"),
        consumed_at: row.get("consumed_at"),
    }
}
