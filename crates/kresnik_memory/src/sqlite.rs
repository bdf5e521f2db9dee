use anyhow::{Context, Result};
use kresnik_core::{GrowthPhase, GrowthState, InnerState};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// Durable home of every entity the mind owns.
///
/// No caching: every read goes to the database and every write is committed
/// before the call returns.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: Pool<Sqlite>,
}

/// InnerState counters that are bumped atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Interactions,
    Silences,
    Expressions,
    Dreams,
}

impl Counter {
    fn column(&self) -> &'static str {
        match self {
            Counter::Interactions => "total_interactions",
            Counter::Silences => "total_silences",
            Counter::Expressions => "total_expressions",
            Counter::Dreams => "total_dreams",
        }
    }
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`. `":memory:"`
    /// gives a private in-memory database on a single pooled connection.
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref().display().to_string();
        let in_memory = path == ":memory:";
        let db_url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", path)
        };

        let mut options = SqlitePoolOptions::new().after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(conn).await?;
                Ok(())
            })
        });
        if in_memory {
            // Each in-memory connection is its own database.
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options
            .connect(&db_url)
            .await
            .with_context(|| format!("Failed to connect to SQLite database at {}", path))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inner_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                mood TEXT NOT NULL,
                energy REAL NOT NULL,
                openness REAL NOT NULL,
                silence_affinity REAL NOT NULL,
                total_heartbeats INTEGER NOT NULL DEFAULT 0,
                total_interactions INTEGER NOT NULL DEFAULT 0,
                total_silences INTEGER NOT NULL DEFAULT 0,
                total_expressions INTEGER NOT NULL DEFAULT 0,
                total_dreams INTEGER NOT NULL DEFAULT 0,
                beliefs TEXT NOT NULL DEFAULT '[]',
                self_prompt TEXT NOT NULL DEFAULT '',
                fluid_surface TEXT NOT NULL DEFAULT '',
                entity_name TEXT,
                born_at INTEGER NOT NULL,
                last_interaction_at INTEGER,
                last_heartbeat_at INTEGER,
                growth_phase TEXT NOT NULL DEFAULT 'childhood',
                vision_reflections INTEGER NOT NULL DEFAULT 0,
                last_vision_reflection_at INTEGER,
                directions_requested_at INTEGER,
                directions TEXT,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create inner_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS synapses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern TEXT NOT NULL,
                energy REAL NOT NULL,
                decay_rate REAL NOT NULL,
                valence REAL NOT NULL,
                source_type TEXT NOT NULL,
                source_triad_id INTEGER,
                tags TEXT NOT NULL DEFAULT '[]',
                fired_at INTEGER NOT NULL,
                decayed_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                archived_ref TEXT,
                archived_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create synapses table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_synapses_energy ON synapses(energy)")
            .execute(&self.pool)
            .await
            .context("Failed to create synapse energy index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_synapse INTEGER NOT NULL REFERENCES synapses(id) ON DELETE CASCADE,
                to_synapse INTEGER NOT NULL REFERENCES synapses(id) ON DELETE CASCADE,
                weight REAL NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create connections table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pathways (
                theme TEXT PRIMARY KEY,
                phase TEXT NOT NULL,
                trust REAL NOT NULL,
                fire_count INTEGER NOT NULL DEFAULT 0,
                last_note TEXT,
                last_source TEXT,
                fired_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create pathways table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crystal_seeds (
                theme TEXT NOT NULL,
                source_type TEXT NOT NULL,
                expression TEXT NOT NULL,
                source_triad_id INTEGER,
                strength INTEGER NOT NULL DEFAULT 0,
                seq INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (theme, source_type)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create crystal_seeds table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crystallized_core (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                theme TEXT NOT NULL,
                crystal TEXT NOT NULL,
                formed_from_seeds INTEGER NOT NULL,
                seed_sources TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                dissolved_at INTEGER,
                dissolve_reason TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create crystallized_core table")?;

        // Only the tombstone columns may change once a crystal exists.
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS crystal_immutable
            BEFORE UPDATE OF theme, crystal, formed_from_seeds, seed_sources, created_at
            ON crystallized_core
            BEGIN
                SELECT RAISE(ABORT, 'crystallized core is immutable');
            END;
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create crystal_immutable trigger")?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS crystal_no_delete
            BEFORE DELETE ON crystallized_core
            BEGIN
                SELECT RAISE(ABORT, 'crystals are dissolved, never deleted');
            END;
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create crystal_no_delete trigger")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS triads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trigger_type TEXT NOT NULL,
                trigger_content TEXT NOT NULL,
                author TEXT,
                thesis TEXT NOT NULL,
                antithesis TEXT NOT NULL,
                choice TEXT NOT NULL,
                reason TEXT NOT NULL,
                content TEXT,
                inner_shift TEXT NOT NULL,
                mood_before TEXT NOT NULL,
                mood_after TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create triads table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dreams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_triad_ids TEXT NOT NULL,
                narrative TEXT NOT NULL,
                insight TEXT,
                emotional_residue TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create dreams table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS process_words (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                phases TEXT NOT NULL,
                version INTEGER NOT NULL,
                crystallized INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create process_words table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                author TEXT NOT NULL,
                direction TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create conversations table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS identities (
                author_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                notes TEXT,
                interactions INTEGER NOT NULL DEFAULT 0,
                first_seen_at INTEGER NOT NULL,
                last_seen_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create identities table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create observations table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                last_attended_at INTEGER,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create projects table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                author TEXT NOT NULL,
                content TEXT NOT NULL,
                received_at INTEGER NOT NULL,
                consumed_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create inbox table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_snapshots (
                day TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create daily_snapshots table")?;

        self.ensure_inner_state().await
    }

    /// Insert the singleton row with defaults on first open.
    async fn ensure_inner_state(&self) -> Result<()> {
        let d = InnerState::default();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO inner_state
                (id, mood, energy, openness, silence_affinity, born_at, updated_at)
            VALUES (1, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&d.mood)
        .bind(d.energy)
        .bind(d.openness)
        .bind(d.silence_affinity)
        .bind(d.born_at)
        .bind(d.born_at)
        .execute(&self.pool)
        .await
        .context("Failed to initialize inner_state")?;
        Ok(())
    }

    // =========================================================================
    // Inner state
    // =========================================================================

    pub async fn load_inner_state(&self) -> Result<InnerState> {
        let row = sqlx::query("SELECT * FROM inner_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("Failed to query inner_state")?;
        inner_state_from_row(&row)
    }

    /// Overwrite the whole row. Bounded reals are clamped first.
    pub async fn save_inner_state(&self, state: &InnerState) -> Result<()> {
        let mut state = state.clone();
        state.clamp();
        let beliefs = serde_json::to_string(&state.beliefs).context("Failed to serialize beliefs")?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO inner_state (
                id, mood, energy, openness, silence_affinity,
                total_heartbeats, total_interactions, total_silences, total_expressions, total_dreams,
                beliefs, self_prompt, fluid_surface, entity_name,
                born_at, last_interaction_at, last_heartbeat_at,
                growth_phase, vision_reflections, last_vision_reflection_at,
                directions_requested_at, directions, updated_at
            ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                mood = excluded.mood,
                energy = excluded.energy,
                openness = excluded.openness,
                silence_affinity = excluded.silence_affinity,
                total_heartbeats = excluded.total_heartbeats,
                total_interactions = excluded.total_interactions,
                total_silences = excluded.total_silences,
                total_expressions = excluded.total_expressions,
                total_dreams = excluded.total_dreams,
                beliefs = excluded.beliefs,
                self_prompt = excluded.self_prompt,
                fluid_surface = excluded.fluid_surface,
                entity_name = excluded.entity_name,
                born_at = excluded.born_at,
                last_interaction_at = excluded.last_interaction_at,
                last_heartbeat_at = excluded.last_heartbeat_at,
                growth_phase = excluded.growth_phase,
                vision_reflections = excluded.vision_reflections,
                last_vision_reflection_at = excluded.last_vision_reflection_at,
                directions_requested_at = excluded.directions_requested_at,
                directions = excluded.directions,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.mood)
        .bind(state.energy)
        .bind(state.openness)
        .bind(state.silence_affinity)
        .bind(state.total_heartbeats)
        .bind(state.total_interactions)
        .bind(state.total_silences)
        .bind(state.total_expressions)
        .bind(state.total_dreams)
        .bind(&beliefs)
        .bind(&state.self_prompt)
        .bind(&state.fluid_surface)
        .bind(&state.entity_name)
        .bind(state.born_at)
        .bind(state.last_interaction_at)
        .bind(state.last_heartbeat_at)
        .bind(state.growth.phase.as_str())
        .bind(state.growth.vision_reflections)
        .bind(state.growth.last_vision_reflection_at)
        .bind(state.growth.directions_requested_at)
        .bind(&state.growth.directions)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to save inner_state")?;

        tracing::debug!("Inner state saved");
        Ok(())
    }

    /// Count a heartbeat and, when idle for at least `idle_secs`, recover
    /// `recovery` energy. Returns the state after the update.
    pub async fn record_heartbeat(&self, now: i64, idle_secs: i64, recovery: f64) -> Result<InnerState> {
        let recovery = if recovery.is_finite() { recovery } else { 0.0 };
        sqlx::query(
            r#"
            UPDATE inner_state SET
                total_heartbeats = total_heartbeats + 1,
                last_heartbeat_at = ?,
                energy = CASE
                    WHEN ? - COALESCE(last_interaction_at, born_at) >= ?
                    THEN MAX(0.0, MIN(1.0, energy + ?))
                    ELSE energy
                END,
                updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(idle_secs)
        .bind(recovery)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to record heartbeat")?;

        self.load_inner_state().await
    }

    /// Set the mood label and shift energy, clamped into `[0, 1]`.
    pub async fn apply_mood_energy(&self, mood: &str, energy_delta: f64) -> Result<()> {
        let delta = if energy_delta.is_finite() { energy_delta } else { 0.0 };
        sqlx::query(
            r#"
            UPDATE inner_state SET
                mood = ?,
                energy = MAX(0.0, MIN(1.0, energy + ?)),
                updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(mood)
        .bind(delta)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to apply mood/energy update")?;
        Ok(())
    }

    pub async fn increment_counter(&self, counter: Counter) -> Result<()> {
        let sql = format!(
            "UPDATE inner_state SET {col} = {col} + 1 WHERE id = 1",
            col = counter.column()
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to increment {}", counter.column()))?;
        Ok(())
    }

    /// Count an inbound interaction and stamp its time.
    pub async fn touch_interaction(&self, now: i64) -> Result<()> {
        sqlx::query(
            "UPDATE inner_state SET total_interactions = total_interactions + 1, last_interaction_at = ? WHERE id = 1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to record interaction")?;
        Ok(())
    }

    pub async fn set_fluid_surface(&self, text: &str) -> Result<()> {
        sqlx::query("UPDATE inner_state SET fluid_surface = ? WHERE id = 1")
            .bind(text)
            .execute(&self.pool)
            .await
            .context("Failed to set fluid surface")?;
        Ok(())
    }

    pub async fn set_self_prompt(&self, text: &str) -> Result<()> {
        sqlx::query("UPDATE inner_state SET self_prompt = ? WHERE id = 1")
            .bind(text)
            .execute(&self.pool)
            .await
            .context("Failed to set self prompt")?;
        Ok(())
    }

    pub async fn set_entity_name(&self, name: &str) -> Result<()> {
        sqlx::query("UPDATE inner_state SET entity_name = ? WHERE id = 1")
            .bind(name)
            .execute(&self.pool)
            .await
            .context("Failed to set entity name")?;
        Ok(())
    }

    /// Append a belief, keeping at most `cap` (oldest dropped).
    pub async fn push_belief(&self, belief: &str, cap: usize) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let json: String = sqlx::query_scalar("SELECT beliefs FROM inner_state WHERE id = 1")
            .fetch_one(&mut *tx)
            .await
            .context("Failed to read beliefs")?;
        let mut state = InnerState {
            beliefs: serde_json::from_str(&json).context("Failed to parse beliefs")?,
            ..Default::default()
        };
        state.push_belief(belief, cap);
        let json = serde_json::to_string(&state.beliefs).context("Failed to serialize beliefs")?;
        sqlx::query("UPDATE inner_state SET beliefs = ? WHERE id = 1")
            .bind(&json)
            .execute(&mut *tx)
            .await
            .context("Failed to write beliefs")?;
        tx.commit().await?;
        Ok(state.beliefs)
    }

    pub async fn set_growth(&self, growth: &GrowthState) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE inner_state SET
                growth_phase = ?,
                vision_reflections = ?,
                last_vision_reflection_at = ?,
                directions_requested_at = ?,
                directions = ?
            WHERE id = 1
            "#,
        )
        .bind(growth.phase.as_str())
        .bind(growth.vision_reflections)
        .bind(growth.last_vision_reflection_at)
        .bind(growth.directions_requested_at)
        .bind(&growth.directions)
        .execute(&self.pool)
        .await
        .context("Failed to save growth state")?;
        Ok(())
    }

    /// Crystallizing -> matured with `directions`, only if the phase is still
    /// crystallizing. Returns whether this call made the transition.
    pub async fn complete_growth(&self, directions: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE inner_state SET growth_phase = ?, directions = ? WHERE id = 1 AND growth_phase = ?",
        )
        .bind(GrowthPhase::Matured.as_str())
        .bind(directions)
        .bind(GrowthPhase::Crystallizing.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to complete growth")?;
        Ok(result.rows_affected() > 0)
    }
}

fn inner_state_from_row(row: &SqliteRow) -> Result<InnerState> {
    let beliefs: String = row.get("beliefs");
    let phase: String = row.get("growth_phase");
    let mut state = InnerState {
        mood: row.get("mood"),
        energy: row.get("energy"),
        openness: row.get("openness"),
        silence_affinity: row.get("silence_affinity"),
        total_heartbeats: row.get("total_heartbeats"),
        total_interactions: row.get("total_interactions"),
        total_silences: row.get("total_silences"),
        total_expressions: row.get("total_expressions"),
        total_dreams: row.get("total_dreams"),
        beliefs: serde_json::from_str(&beliefs).context("Failed to parse beliefs")?,
        self_prompt: row.get("self_prompt"),
        fluid_surface: row.get("fluid_surface"),
        entity_name: row.get("entity_name"),
        born_at: row.get("born_at"),
        last_interaction_at: row.get("last_interaction_at"),
        last_heartbeat_at: row.get("last_heartbeat_at"),
        growth: GrowthState {
            phase: phase.parse().unwrap_or(GrowthPhase::Childhood),
            vision_reflections: row.get("vision_reflections"),
            last_vision_reflection_at: row.get("last_vision_reflection_at"),
            directions_requested_at: row.get("directions_requested_at"),
            directions: row.get("directions"),
        },
    };
    state.clamp();
    Ok(state)
}
