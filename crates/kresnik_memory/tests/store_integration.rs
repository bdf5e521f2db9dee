//! Integration tests for SqliteStore against on-disk databases.
//!
//! Uses tempfile::TempDir for isolated SQLite files.

use kresnik_core::{NewSynapse, SourceType};
use kresnik_memory::SqliteStore;
use std::sync::Arc;

const T0: i64 = 1_700_000_000;

async fn open(dir: &tempfile::TempDir) -> SqliteStore {
    let db_path = dir.path().join("kresnik.db");
    SqliteStore::open(db_path.to_str().unwrap()).await.unwrap()
}

/// Everything written is visible after a reopen: no flush step exists.
#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let store = open(&dir).await;
        store.apply_mood_energy("wistful", -0.2).await.unwrap();
        store.set_fluid_surface("I am the weather today").await.unwrap();
        store
            .add_crystal_seed("rivers", "rivers remember", SourceType::Listening, None, T0)
            .await
            .unwrap();
        store
            .crystallize("kin", "I belong to few", 5, &[SourceType::Conversation, SourceType::Dream], T0)
            .await
            .unwrap();
        store.close().await;
    }

    let store = open(&dir).await;
    let state = store.load_inner_state().await.unwrap();
    assert_eq!(state.mood, "wistful");
    assert!((state.energy - 0.5).abs() < 1e-9);
    assert_eq!(state.fluid_surface, "I am the weather today");
    assert_eq!(store.get_crystal_seeds().await.unwrap().len(), 1);
    assert_eq!(store.get_crystallized_core().await.unwrap().len(), 1);
}

/// Reopening must not reset the singleton row.
#[tokio::test]
async fn test_reopen_keeps_born_at() {
    let dir = tempfile::TempDir::new().unwrap();
    let born = {
        let store = open(&dir).await;
        store.load_inner_state().await.unwrap().born_at
    };
    let store = open(&dir).await;
    assert_eq!(store.load_inner_state().await.unwrap().born_at, born);
}

/// Concurrent atomic counter updates from many tasks lose nothing.
#[tokio::test]
async fn test_concurrent_heartbeats_do_not_lose_updates() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(open(&dir).await);

    let mut handles = Vec::new();
    for i in 0..20 {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.record_heartbeat(T0 + i, 1800, 0.0).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(store.load_inner_state().await.unwrap().total_heartbeats, 20);
}

#[tokio::test]
async fn test_foreign_keys_enforced() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = open(&dir).await;
    let id = store
        .create_synapse(
            &NewSynapse {
                pattern: "anchor".into(),
                energy: 1.0,
                decay_rate: 0.1,
                valence: 0.2,
                source_type: SourceType::Observation,
                source_triad_id: None,
                tags: vec![],
            },
            T0,
        )
        .await
        .unwrap();
    assert!(store.create_connection(id, id + 1000, 0.5, T0).await.is_err());
    assert!(store.create_connection(id, id, 0.5, T0).await.is_ok());
}
