use proptest::prelude::*;
use torus_memory::{
    loc_key, unpack_loc_key, CheckpointManager, CheckpointPolicy, CheckpointSignals, DisplacementConfig,
    DisplacementEncoder, EpisodicStore, HeavyHitters, LocationIndex, Replayer, StateModel,
};

struct Sum;

impl StateModel for Sum {
    type State = i64;
    type Event = i64;

    fn init(&self) -> i64 {
        0
    }

    fn apply(&self, state: &mut i64, event: &i64) {
        *state = state.wrapping_mul(3).wrapping_add(*event);
    }
}

proptest! {
    #[test]
    fn prop_encoders_with_same_config_agree(tokens in prop::collection::vec(any::<u32>(), 1..200), seed in any::<u32>()) {
        let config = DisplacementConfig { seed, ..Default::default() };
        let mut a = DisplacementEncoder::new(config.clone()).unwrap();
        let mut b = DisplacementEncoder::new(config).unwrap();
        for &t in &tokens {
            let (da, db) = (a.step(t), b.step(t));
            prop_assert_eq!(da, db);
            prop_assert!(da.dx.abs() <= 3 && da.dy.abs() <= 3);
            prop_assert!(!da.is_zero());
        }
    }

    #[test]
    fn prop_heavy_hitters_stay_bounded(k in 1usize..16, updates in prop::collection::vec((0u32..64, 0.0f32..4.0), 0..300)) {
        let mut hh = HeavyHitters::new(k);
        for (token, weight) in updates {
            hh.update(token, weight);
            prop_assert!(hh.len() <= k);
        }
        let top = hh.top_k(k);
        prop_assert!(top.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn prop_loc_key_round_trips(x in 0u32..=0xFFFF, y in 0u32..=0xFFFF) {
        let loc = unpack_loc_key(loc_key(x, y));
        prop_assert_eq!((loc.x, loc.y), (x, y));
    }

    #[test]
    fn prop_index_respects_cap(cap in 1usize..8, writes in prop::collection::vec((0u32..4, 0u32..32, 0u32..32), 1..200)) {
        let mut index = LocationIndex::new(cap);
        for (step, (token, x, y)) in writes.into_iter().enumerate() {
            index.update(token, x, y, step as u64);
        }
        for token in 0..4 {
            prop_assert!(index.get_candidates(token, usize::MAX).len() <= cap);
        }
    }

    #[test]
    fn prop_checkpointed_replay_matches_full(events in prop::collection::vec(-50i64..50, 1..120), interval in 1u64..20) {
        let mut store = EpisodicStore::new(events.len());
        let mut checkpoints = CheckpointManager::new(CheckpointPolicy::Fixed { interval }).unwrap();
        let mut state = Sum.init();
        for (step, event) in events.iter().enumerate() {
            Sum.apply(&mut state, event);
            store.append(step as u64, *event, None).unwrap();
            checkpoints.maybe_checkpoint(step as u64, &state, &CheckpointSignals::default());
        }

        let replayer = Replayer::new(&Sum, &store, &checkpoints);
        for target in 0..events.len() as u64 {
            let fast = replayer.replay(target).unwrap();
            let slow = replayer.replay_from_scratch(target).unwrap();
            prop_assert_eq!(fast.state, slow.state);
            prop_assert!(fast.events_applied < interval as usize);
        }
    }
}
