//! Property-based tests for kresnik_core.
//!
//! The bounded reals on InnerState must stay in [0, 1] for any input,
//! including non-finite ones.

use kresnik_core::{clamp_unit, InnerState, KeywordValence, ValenceScorer};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn arb_f64() -> impl Strategy<Value = f64> {
    prop_oneof![
        -1e6f64..1e6,
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
    ]
}

fn arb_state() -> impl Strategy<Value = InnerState> {
    (arb_f64(), arb_f64(), arb_f64()).prop_map(|(energy, openness, silence_affinity)| {
        InnerState {
            energy,
            openness,
            silence_affinity,
            ..Default::default()
        }
    })
}

proptest! {
    #[test]
    fn clamp_always_in_unit_interval(mut s in arb_state()) {
        s.clamp();
        prop_assert!((0.0..=1.0).contains(&s.energy));
        prop_assert!((0.0..=1.0).contains(&s.openness));
        prop_assert!((0.0..=1.0).contains(&s.silence_affinity));
    }

    #[test]
    fn energy_delta_sequence_stays_bounded(
        start in 0.0f64..=1.0,
        deltas in proptest::collection::vec(arb_f64(), 0..40),
    ) {
        let mut s = InnerState { energy: start, ..Default::default() };
        for d in deltas {
            s.apply_energy_delta(d);
            prop_assert!((0.0..=1.0).contains(&s.energy));
        }
    }

    #[test]
    fn clamp_unit_is_idempotent(v in arb_f64()) {
        let once = clamp_unit(v, 0.5);
        prop_assert_eq!(once, clamp_unit(once, 0.5));
    }

    #[test]
    fn beliefs_never_exceed_cap(n in 0usize..80, cap in 1usize..30) {
        let mut s = InnerState::default();
        for i in 0..n {
            s.push_belief(format!("belief {i}"), cap);
        }
        prop_assert!(s.beliefs.len() <= cap);
        if n > 0 {
            let last = format!("belief {}", n - 1);
            prop_assert_eq!(s.beliefs.last(), Some(&last));
        }
    }

    #[test]
    fn valence_within_unit(text in ".{0,120}", seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let v = KeywordValence.score(&text, &mut rng);
        prop_assert!((-1.0..=1.0).contains(&v));
    }
}
