//! Property tests for the crystallization invariants.

use kresnik_core::SourceType;
use kresnik_memory::SqliteStore;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

const THEMES: &[&str] = &["a", "b", "c"];
const SOURCES: &[SourceType] = &[
    SourceType::Conversation,
    SourceType::Dream,
    SourceType::Listening,
];

fn arb_submissions() -> impl Strategy<Value = Vec<(usize, usize)>> {
    proptest::collection::vec((0..THEMES.len(), 0..SOURCES.len()), 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn candidates_need_threshold_and_two_sources(
        subs in arb_submissions(),
        threshold in 1i64..8,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = SqliteStore::open(":memory:").await.unwrap();
            let mut totals: HashMap<&str, i64> = HashMap::new();
            let mut sources: HashMap<&str, HashSet<SourceType>> = HashMap::new();

            for (t, s) in &subs {
                let theme = THEMES[*t];
                let total = store
                    .add_crystal_seed(theme, "expr", SOURCES[*s], None, 0)
                    .await
                    .unwrap();
                *totals.entry(theme).or_default() += 1;
                sources.entry(theme).or_default().insert(SOURCES[*s]);
                assert_eq!(total, totals[theme]);
            }

            let candidates = store.check_crystallization(threshold).await.unwrap();
            for c in &candidates {
                assert!(c.total_strength >= threshold);
                assert!(c.sources.len() >= 2);
            }

            let expected: HashSet<&str> = THEMES
                .iter()
                .copied()
                .filter(|t| {
                    totals.get(t).copied().unwrap_or(0) >= threshold
                        && sources.get(t).map_or(0, |s| s.len()) >= 2
                })
                .collect();
            let got: HashSet<&str> = candidates.iter().map(|c| c.theme.as_str()).collect();
            assert_eq!(got, expected);

            // Crystallizing clears exactly that theme's seeds.
            for c in &candidates {
                store
                    .crystallize(&c.theme, &c.expression, c.total_strength, &c.sources, 0)
                    .await
                    .unwrap();
            }
            let remaining = store.get_crystal_seeds().await.unwrap();
            assert!(remaining.iter().all(|s| !expected.contains(s.theme.as_str())));
            assert!(store.check_crystallization(threshold).await.unwrap().is_empty());
        });
    }
}
