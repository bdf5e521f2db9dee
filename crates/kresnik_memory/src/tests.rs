use crate::sqlite::{Counter, SqliteStore};
use kresnik_core::{
    Choice, Direction, GrowthPhase, HeatLevel, InnerState, NewSynapse, NewTriad, PhaseName,
    SourceType, TriggerType,
};

const DAY: i64 = 86_400;
const T0: i64 = 1_700_000_000;

async fn store() -> SqliteStore {
    SqliteStore::open(":memory:")
        .await
        .expect("Failed to open store")
}

fn synapse(pattern: &str, energy: f64, decay_rate: f64) -> NewSynapse {
    NewSynapse {
        pattern: pattern.to_string(),
        energy,
        decay_rate,
        valence: 0.0,
        source_type: SourceType::Conversation,
        source_triad_id: None,
        tags: Vec::new(),
    }
}

fn phases(a: &str, b: &str, c: &str) -> [PhaseName; 3] {
    [a, b, c].map(|w| PhaseName {
        word: w.to_string(),
        description: format!("the {w} phase"),
    })
}

// ============================================================================
// Inner state
// ============================================================================

#[tokio::test]
async fn test_inner_state_defaults_on_open() {
    let store = store().await;
    let state = store.load_inner_state().await.unwrap();
    assert_eq!(state.total_heartbeats, 0);
    assert_eq!(state.growth.phase, GrowthPhase::Childhood);
    assert!(state.beliefs.is_empty());
}

#[tokio::test]
async fn test_save_inner_state_clamps() {
    let store = store().await;
    let state = InnerState {
        energy: 4.0,
        openness: -1.0,
        silence_affinity: 0.3,
        mood: "restless".into(),
        ..Default::default()
    };
    store.save_inner_state(&state).await.unwrap();

    let loaded = store.load_inner_state().await.unwrap();
    assert_eq!(loaded.energy, 1.0);
    assert_eq!(loaded.openness, 0.0);
    assert_eq!(loaded.mood, "restless");
}

#[tokio::test]
async fn test_apply_mood_energy_clamps_in_sql() {
    let store = store().await;
    store.apply_mood_energy("elated", 5.0).await.unwrap();
    let s = store.load_inner_state().await.unwrap();
    assert_eq!(s.energy, 1.0);
    assert_eq!(s.mood, "elated");

    store.apply_mood_energy("flat", -9.0).await.unwrap();
    assert_eq!(store.load_inner_state().await.unwrap().energy, 0.0);

    store.apply_mood_energy("flat", f64::NAN).await.unwrap();
    assert_eq!(store.load_inner_state().await.unwrap().energy, 0.0);
}

#[tokio::test]
async fn test_heartbeat_recovers_energy_only_when_idle() {
    let store = store().await;
    let mut s = store.load_inner_state().await.unwrap();
    s.energy = 0.5;
    s.born_at = T0;
    s.last_interaction_at = Some(T0);
    store.save_inner_state(&s).await.unwrap();

    // Not idle long enough
    let after = store.record_heartbeat(T0 + 60, 1800, 0.1).await.unwrap();
    assert_eq!(after.total_heartbeats, 1);
    assert!((after.energy - 0.5).abs() < 1e-9);
    assert_eq!(after.last_heartbeat_at, Some(T0 + 60));

    let after = store.record_heartbeat(T0 + 3600, 1800, 0.1).await.unwrap();
    assert_eq!(after.total_heartbeats, 2);
    assert!((after.energy - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_counters_and_beliefs() {
    let store = store().await;
    store.increment_counter(Counter::Silences).await.unwrap();
    store.increment_counter(Counter::Silences).await.unwrap();
    store.increment_counter(Counter::Expressions).await.unwrap();
    store.increment_counter(Counter::Dreams).await.unwrap();
    store.touch_interaction(T0).await.unwrap();

    for i in 0..22 {
        store.push_belief(&format!("belief {i}"), 20).await.unwrap();
    }

    let s = store.load_inner_state().await.unwrap();
    assert_eq!(s.total_silences, 2);
    assert_eq!(s.total_expressions, 1);
    assert_eq!(s.total_dreams, 1);
    assert_eq!(s.total_interactions, 1);
    assert_eq!(s.last_interaction_at, Some(T0));
    assert_eq!(s.beliefs.len(), 20);
    assert_eq!(s.beliefs[0], "belief 2");
}

#[tokio::test]
async fn test_growth_round_trip() {
    let store = store().await;
    let mut s = store.load_inner_state().await.unwrap();
    s.growth.phase = GrowthPhase::Crystallizing;
    s.growth.vision_reflections = 4;
    s.growth.directions_requested_at = Some(T0);
    store.set_growth(&s.growth).await.unwrap();

    let loaded = store.load_inner_state().await.unwrap();
    assert_eq!(loaded.growth, s.growth);
}

#[tokio::test]
async fn test_complete_growth_only_from_crystallizing() {
    let store = store().await;
    assert!(!store.complete_growth("too early").await.unwrap());
    assert_eq!(store.load_inner_state().await.unwrap().growth.phase, GrowthPhase::Childhood);

    let mut s = store.load_inner_state().await.unwrap();
    s.growth.phase = GrowthPhase::Crystallizing;
    store.set_growth(&s.growth).await.unwrap();

    assert!(store.complete_growth("first answer").await.unwrap());
    assert!(!store.complete_growth("second answer").await.unwrap());
    let growth = store.load_inner_state().await.unwrap().growth;
    assert_eq!(growth.phase, GrowthPhase::Matured);
    assert_eq!(growth.directions.as_deref(), Some("first answer"));
}

// ============================================================================
// Memory graph
// ============================================================================

#[tokio::test]
async fn test_fire_synapse_increases_energy() {
    let store = store().await;
    let id = store.create_synapse(&synapse("first light", 0.5, 0.05), T0).await.unwrap();
    assert!(store.fire_synapse(id, 0.15, T0 + 10).await.unwrap());

    let s = store.get_synapse(id).await.unwrap().unwrap();
    assert!((s.energy - 0.65).abs() < 1e-9);
    assert_eq!(s.fired_at, T0 + 10);

    assert!(!store.fire_synapse(9999, 0.15, T0).await.unwrap());
}

#[tokio::test]
async fn test_pattern_truncated_to_300_chars() {
    let store = store().await;
    let long = "x".repeat(1000);
    let id = store.create_synapse(&synapse(&long, 1.0, 0.1), T0).await.unwrap();
    let s = store.get_synapse(id).await.unwrap().unwrap();
    assert_eq!(s.pattern.chars().count(), 300);
}

#[tokio::test]
async fn test_decay_is_monotonic_until_pruned() {
    let store = store().await;
    let id = store.create_synapse(&synapse("fading", 0.5, 0.1), T0).await.unwrap();

    let mut last = 0.5;
    let mut day = 1;
    loop {
        let report = store.decay_synapses(0.05, T0 + day * DAY).await.unwrap();
        match store.get_synapse(id).await.unwrap() {
            Some(s) => {
                assert!(s.energy < last, "energy must strictly decrease");
                last = s.energy;
                assert_eq!(report.pruned, 0);
            }
            None => {
                assert_eq!(report.pruned, 1);
                break;
            }
        }
        day += 1;
        assert!(day < 20, "synapse never pruned");
    }

    // Gone from every view
    assert!(store.get_top_synapses(10).await.unwrap().is_empty());
    assert!(store.get_weak_synapses(10).await.unwrap().is_empty());
    assert!(store.get_strong_synapses(0.0, 10).await.unwrap().is_empty());
    assert!(store.find_similar_synapses("fading", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_decay_twice_at_same_instant_prunes_nothing_new() {
    let store = store().await;
    store.create_synapse(&synapse("a", 0.08, 0.05), T0).await.unwrap();
    store.create_synapse(&synapse("b", 0.9, 0.05), T0).await.unwrap();

    let first = store.decay_synapses(0.05, T0 + DAY).await.unwrap();
    assert_eq!(first.pruned, 1);
    let before = store.get_top_synapses(10).await.unwrap();

    let second = store.decay_synapses(0.05, T0 + DAY).await.unwrap();
    assert_eq!(second.pruned, 0);
    assert_eq!(second.decayed, 0);
    assert_eq!(store.get_top_synapses(10).await.unwrap(), before);
}

#[tokio::test]
async fn test_prune_floor_is_inclusive() {
    let store = store().await;
    store.create_synapse(&synapse("edge", 0.05, 0.0), T0).await.unwrap();
    let report = store.decay_synapses(0.05, T0 + DAY).await.unwrap();
    assert_eq!(report.pruned, 1);
}

#[tokio::test]
async fn test_prune_removes_connections() {
    let store = store().await;
    let weak = store.create_synapse(&synapse("weak", 0.06, 0.1), T0).await.unwrap();
    let strong = store.create_synapse(&synapse("strong", 2.0, 0.1), T0).await.unwrap();
    store.create_connection(strong, weak, 0.5, T0).await.unwrap();
    store.create_connection(strong, weak, 0.5, T0).await.unwrap();
    assert_eq!(store.connection_count().await.unwrap(), 2);

    store.decay_synapses(0.05, T0 + DAY).await.unwrap();
    assert!(store.get_synapse(weak).await.unwrap().is_none());
    assert_eq!(store.connection_count().await.unwrap(), 0);
    assert!(store.connections_from(strong).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ordered_views() {
    let store = store().await;
    for (p, e) in [("low", 0.2), ("mid", 0.8), ("high", 1.7)] {
        store.create_synapse(&synapse(p, e, 0.05), T0).await.unwrap();
    }
    let top: Vec<_> = store.get_top_synapses(2).await.unwrap().into_iter().map(|s| s.pattern).collect();
    assert_eq!(top, vec!["high", "mid"]);
    let weak: Vec<_> = store.get_weak_synapses(1).await.unwrap().into_iter().map(|s| s.pattern).collect();
    assert_eq!(weak, vec!["low"]);
    let strong = store.get_strong_synapses(0.5, 10).await.unwrap();
    assert_eq!(strong.len(), 2);
}

#[tokio::test]
async fn test_find_similar_is_deterministic_and_ranked() {
    let store = store().await;
    store.create_synapse(&synapse("the quiet sea at dawn", 0.5, 0.05), T0).await.unwrap();
    store.create_synapse(&synapse("a loud market street", 0.9, 0.05), T0).await.unwrap();
    store.create_synapse(&synapse("the sea", 0.3, 0.05), T0).await.unwrap();

    let a = store.find_similar_synapses("the sea", 2).await.unwrap();
    let b = store.find_similar_synapses("the sea", 2).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a[0].pattern, "the sea");
    assert_eq!(a[1].pattern, "the quiet sea at dawn");
}

#[tokio::test]
async fn test_pathways_fire_and_resonance() {
    let store = store().await;
    let p = store.fire_pathway("solitude", "first", 0.2, "dream", T0).await.unwrap();
    assert!((p.trust - 0.3).abs() < 1e-9);
    assert_eq!(p.fire_count, 1);

    let p = store.fire_pathway("solitude", "again", 5.0, "dream", T0).await.unwrap();
    assert_eq!(p.trust, 1.0);
    assert_eq!(p.fire_count, 2);
    assert_eq!(p.last_note.as_deref(), Some("again"));

    let p = store.fire_pathway("doubt", "", -1.0, "triad", T0).await.unwrap();
    assert_eq!(p.trust, 0.0);

    let active = store.get_active_pathways(10, 168, T0).await.unwrap();
    assert_eq!(active[0].theme, "solitude");

    let r = store.get_pathway_resonance(168, T0).await.unwrap();
    assert!((r.score - 1.0).abs() < 1e-9);
    assert_eq!(r.heat, HeatLevel::Warm);

    // Outside the window nothing is active
    let later = T0 + 200 * 3600;
    assert!(store.get_active_pathways(10, 168, later).await.unwrap().is_empty());
    assert_eq!(store.get_pathway_resonance(168, later).await.unwrap().heat, HeatLevel::Cold);
}

#[tokio::test]
async fn test_pathways_for_synapse_follow_tags() {
    let store = store().await;
    let mut s = synapse("walking by the river", 0.6, 0.05);
    s.tags = vec!["water".into(), "motion".into()];
    let id = store.create_synapse(&s, T0).await.unwrap();
    store.fire_pathway("water", "", 0.1, "test", T0).await.unwrap();
    store.fire_pathway("unrelated", "", 0.1, "test", T0).await.unwrap();

    let pathways = store.get_pathways_for_synapse(id).await.unwrap();
    assert_eq!(pathways.len(), 1);
    assert_eq!(pathways[0].theme, "water");
}

#[tokio::test]
async fn test_archive_candidates() {
    let store = store().await;
    let old_strong = store.create_synapse(&synapse("old strong", 2.0, 0.0), T0).await.unwrap();
    store.create_synapse(&synapse("young strong", 2.0, 0.0), T0 + 10 * DAY).await.unwrap();
    store.create_synapse(&synapse("old weak", 0.3, 0.0), T0).await.unwrap();

    let now = T0 + 10 * DAY;
    let c = store.archive_candidates(5, 1.5, 3 * DAY, now).await.unwrap();
    assert_eq!(c.len(), 1);
    assert_eq!(c[0].id, old_strong);

    store.mark_archived(old_strong, "note-1", now).await.unwrap();
    assert!(store.archive_candidates(5, 1.5, 3 * DAY, now).await.unwrap().is_empty());
    let s = store.get_synapse(old_strong).await.unwrap().unwrap();
    assert_eq!(s.archived_ref.as_deref(), Some("note-1"));
}

// ============================================================================
// Crystallization
// ============================================================================

#[tokio::test]
async fn test_seed_scenario_crystallizes_with_two_sources() {
    let store = store().await;
    let mut total = 0;
    for _ in 0..3 {
        total = store
            .add_crystal_seed("A", "conversation view", SourceType::Conversation, None, T0)
            .await
            .unwrap();
    }
    assert_eq!(total, 3);
    assert!(store.check_crystallization(5).await.unwrap().is_empty());

    store.add_crystal_seed("A", "dreamt", SourceType::Dream, None, T0).await.unwrap();
    let total = store
        .add_crystal_seed("A", "dreamt again", SourceType::Dream, None, T0)
        .await
        .unwrap();
    assert_eq!(total, 5);

    let candidates = store.check_crystallization(5).await.unwrap();
    assert_eq!(candidates.len(), 1);
    let c = &candidates[0];
    assert_eq!(c.theme, "A");
    assert_eq!(c.total_strength, 5);
    assert_eq!(c.expression, "dreamt again");
    assert_eq!(c.sources, vec![SourceType::Conversation, SourceType::Dream]);

    let id = store
        .crystallize(&c.theme, &c.expression, c.total_strength, &c.sources, T0)
        .await
        .unwrap();

    let seeds = store.get_crystal_seeds().await.unwrap();
    assert!(seeds.iter().all(|s| s.theme != "A"));
    let core = store.get_crystallized_core().await.unwrap();
    assert_eq!(core.len(), 1);
    assert_eq!(core[0].id, id);
    assert_eq!(core[0].formed_from_seeds, 5);

    // Re-seeding starts from zero
    let total = store
        .add_crystal_seed("A", "anew", SourceType::Conversation, None, T0)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_single_source_never_crystallizes() {
    let store = store().await;
    for _ in 0..50 {
        store
            .add_crystal_seed("loop", "same again", SourceType::Conversation, None, T0)
            .await
            .unwrap();
    }
    assert!(store.check_crystallization(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_theme_rejected() {
    let store = store().await;
    assert!(store
        .add_crystal_seed("   ", "x", SourceType::Dream, None, T0)
        .await
        .is_err());
}

#[tokio::test]
async fn test_dissolve_keeps_history() {
    let store = store().await;
    let id = store
        .crystallize("trust", "I can rely on return", 6, &[SourceType::Conversation, SourceType::Dream], T0)
        .await
        .unwrap();

    assert!(store.dissolve_crystal(id, "no longer true", T0 + 5).await.unwrap());
    // Second dissolve is a no-op
    assert!(!store.dissolve_crystal(id, "again", T0 + 6).await.unwrap());
    // Missing crystal is ignored
    assert!(!store.dissolve_crystal(424242, "nope", T0).await.unwrap());

    assert!(store.get_crystallized_core().await.unwrap().is_empty());
    let history = store.get_crystal_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].dissolved_at, Some(T0 + 5));
    assert_eq!(history[0].crystal, "I can rely on return");
}

#[tokio::test]
async fn test_crystal_text_is_immutable_at_the_store() {
    let store = store().await;
    let id = store
        .crystallize("t", "frozen", 5, &[SourceType::Conversation, SourceType::Dream], T0)
        .await
        .unwrap();

    let update = sqlx::query("UPDATE crystallized_core SET crystal = 'thawed' WHERE id = ?")
        .bind(id)
        .execute(&store.pool)
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM crystallized_core WHERE id = ?")
        .bind(id)
        .execute(&store.pool)
        .await;
    assert!(delete.is_err());

    let c = store.get_crystal(id).await.unwrap().unwrap();
    assert_eq!(c.crystal, "frozen");
}

// ============================================================================
// Journals and ledger
// ============================================================================

fn new_triad(content: &str, choice: Choice) -> NewTriad {
    NewTriad {
        trigger_type: TriggerType::Conversation,
        trigger_content: content.into(),
        author: Some("ana".into()),
        thesis: "t".into(),
        antithesis: "a".into(),
        choice,
        reason: "r".into(),
        content: None,
        inner_shift: "s".into(),
        mood_before: "calm".into(),
        mood_after: "calm".into(),
    }
}

#[tokio::test]
async fn test_triad_log_order() {
    let store = store().await;
    for i in 0..5 {
        store.insert_triad(&new_triad(&format!("m{i}"), Choice::Silence), T0 + i).await.unwrap();
    }
    assert_eq!(store.triad_count().await.unwrap(), 5);
    let recent = store.recent_triads(2).await.unwrap();
    assert_eq!(recent[0].trigger_content, "m3");
    assert_eq!(recent[1].trigger_content, "m4");
}

#[tokio::test]
async fn test_dreams_log() {
    let store = store().await;
    assert_eq!(store.last_dream_at().await.unwrap(), None);
    store.insert_dream(&[1, 2], "a long corridor", Some("doors open"), Some("calm"), T0).await.unwrap();
    store.insert_dream(&[3], "water", None, None, T0 + 50).await.unwrap();

    assert_eq!(store.last_dream_at().await.unwrap(), Some(T0 + 50));
    let dreams = store.recent_dreams(5).await.unwrap();
    assert_eq!(dreams[0].narrative, "water");
    assert_eq!(dreams[1].source_triad_ids, vec![1, 2]);
}

#[tokio::test]
async fn test_process_words_freeze() {
    let store = store().await;
    assert!(store.load_process_words().await.unwrap().is_none());

    let w = store.save_process_words(&phases("feel", "watch", "choose"), false, T0).await.unwrap();
    assert_eq!(w.version, 1);
    assert!(!w.crystallized);

    let w = store.save_process_words(&phases("sense", "notice", "decide"), true, T0).await.unwrap();
    assert_eq!(w.version, 2);
    assert!(w.crystallized);

    assert!(store.save_process_words(&phases("x", "y", "z"), false, T0).await.is_err());
    let w = store.load_process_words().await.unwrap().unwrap();
    assert_eq!(w.phases[0].word, "sense");
}

#[tokio::test]
async fn test_conversation_identity_observation() {
    let store = store().await;
    store.log_conversation("stdin", "ana", Direction::Inbound, "hello", T0).await.unwrap();
    store.log_conversation("stdin", "kresnik", Direction::Outbound, "hi", T0 + 1).await.unwrap();
    let log = store.recent_conversation(10).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].direction, Direction::Inbound);

    store.upsert_identity("ana", "Ana", Some("likes rivers"), T0).await.unwrap();
    store.upsert_identity("ana", "Ana K.", None, T0 + 5).await.unwrap();
    let id = store.get_identity("ana").await.unwrap().unwrap();
    assert_eq!(id.name, "Ana K.");
    assert_eq!(id.notes.as_deref(), Some("likes rivers"));
    assert_eq!(id.interactions, 2);

    store.record_observation("inner_shift", "softened", T0).await.unwrap();
    let obs = store.recent_observations(1).await.unwrap();
    assert_eq!(obs[0].content, "softened");
}

#[tokio::test]
async fn test_projects_attention_sweep() {
    let store = store().await;
    let a = store.add_project("garden", "tend the garden", T0).await.unwrap();
    let b = store.add_project("letters", "answer letters", T0).await.unwrap();

    let due = store.projects_needing_attention(T0, DAY).await.unwrap();
    assert_eq!(due.len(), 2);

    store.mark_project_attended(a, T0).await.unwrap();
    let due = store.projects_needing_attention(T0 + 60, DAY).await.unwrap();
    assert_eq!(due.iter().map(|p| p.id).collect::<Vec<_>>(), vec![b]);

    store.set_project_active(b, false).await.unwrap();
    assert!(store.projects_needing_attention(T0 + 60, DAY).await.unwrap().is_empty());
    assert_eq!(store.projects_needing_attention(T0 + 2 * DAY, DAY).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_inbox_fifo() {
    let store = store().await;
    assert!(store.peek_next_external_event().await.unwrap().is_none());
    store.push_external_event("network", "bo", "second", T0 + 2).await.unwrap();
    store.push_external_event("network", "ana", "first", T0 + 1).await.unwrap();
    assert_eq!(store.pending_event_count().await.unwrap(), 2);
    assert_eq!(store.latest_event_at().await.unwrap(), Some(T0 + 2));

    // Peeking leaves the event in place
    let e = store.peek_next_external_event().await.unwrap().unwrap();
    assert_eq!(e.content, "first");
    assert!(e.consumed_at.is_none());
    assert_eq!(store.peek_next_external_event().await.unwrap().unwrap().id, e.id);

    assert!(store.consume_external_event(e.id, T0 + 10).await.unwrap());
    assert!(!store.consume_external_event(e.id, T0 + 11).await.unwrap());
    assert_eq!(store.pending_event_count().await.unwrap(), 1);
    assert_eq!(store.peek_next_external_event().await.unwrap().unwrap().content, "second");
}

#[tokio::test]
async fn test_daily_snapshot_once_per_day() {
    let store = store().await;
    assert!(store.claim_daily_snapshot("2026-01-01", "{}", T0).await.unwrap());
    assert!(!store.claim_daily_snapshot("2026-01-01", "{}", T0).await.unwrap());
    assert!(store.claim_daily_snapshot("2026-01-02", "{}", T0).await.unwrap());
}

#[tokio::test]
async fn test_memory_stats() {
    let store = store().await;
    let a = store.create_synapse(&synapse("a", 1.0, 0.1), T0).await.unwrap();
    let b = store.create_synapse(&synapse("b", 0.5, 0.1), T0).await.unwrap();
    store.create_connection(a, b, 0.4, T0).await.unwrap();
    store.fire_pathway("x", "", 0.1, "t", T0).await.unwrap();

    let stats = store.memory_stats(168, T0).await.unwrap();
    assert_eq!(stats.synapses, 2);
    assert!((stats.total_energy - 1.5).abs() < 1e-9);
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.active_pathways, 1);
    assert_eq!(stats.active_crystals, 0);
}
