//! Historical reconstruction: nearest checkpoint plus the event tail.
//!
//! A replay to step `T` folds only the events after the checkpoint it starts
//! from, so the cost is `T - checkpoint_step` rather than `T + 1`.

use super::checkpoint::CheckpointManager;
use super::episodic::EpisodicStore;
use super::verifier::{Verifier, Violation};
use crate::error::QueryError;

/// Caller-defined state reconstructed from events.
///
/// `Clone` on the state is the explicit deep copy used for checkpoints.
pub trait StateModel {
    type State: Clone;
    type Event;

    fn init(&self) -> Self::State;

    fn apply(&self, state: &mut Self::State, event: &Self::Event);
}

/// A reconstructed state and what it cost
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome<S> {
    pub state: S,
    pub target_step: u64,
    /// Step of the checkpoint the replay started from, if any
    pub checkpoint_step: Option<u64>,
    pub events_applied: usize,
}

/// One replayed transition
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<'a, S, E> {
    pub step: u64,
    pub prev: S,
    pub event: &'a E,
    pub next: S,
}

#[derive(Debug, Clone)]
pub struct ReplayHistory<'a, S, E> {
    pub outcome: ReplayOutcome<S>,
    pub transitions: Vec<Transition<'a, S, E>>,
    pub violations: Vec<Violation>,
}

/// Reads the log and checkpoints; never mutates them
pub struct Replayer<'a, M: StateModel> {
    model: &'a M,
    store: &'a EpisodicStore<M::Event>,
    checkpoints: &'a CheckpointManager<M::State>,
}

impl<'a, M: StateModel> Replayer<'a, M> {
    pub fn new(
        model: &'a M,
        store: &'a EpisodicStore<M::Event>,
        checkpoints: &'a CheckpointManager<M::State>,
    ) -> Self {
        Self { model, store, checkpoints }
    }

    /// Targets must lie between the base checkpoint (if history was
    /// truncated) and the newest logged event or checkpoint
    fn check_target(&self, target: u64) -> Result<(), QueryError> {
        let last = self.store.last_step().max(self.checkpoints.latest_step());
        match last {
            Some(last) if target <= last => {}
            last => return Err(QueryError::StepOutOfRange { target, last }),
        }
        match self.checkpoints.base_step() {
            Some(earliest) if target < earliest => Err(QueryError::BeforeHistory { target, earliest }),
            _ => Ok(()),
        }
    }

    /// Starting state and the first step still to fold
    fn start(&self, target: u64) -> (M::State, Option<u64>, u64) {
        match self.checkpoints.load_before(target) {
            Some(cp) => (cp.state.clone(), Some(cp.step), cp.step + 1),
            None => (self.model.init(), None, 0),
        }
    }

    /// State after every event up to and including `target`
    pub fn replay(&self, target: u64) -> Result<ReplayOutcome<M::State>, QueryError> {
        self.check_target(target)?;
        let (mut state, checkpoint_step, from) = self.start(target);
        let mut events_applied = 0;
        for entry in self.store.get_range(from, target) {
            self.model.apply(&mut state, &entry.event);
            events_applied += 1;
        }
        Ok(ReplayOutcome {
            state,
            target_step: target,
            checkpoint_step,
            events_applied,
        })
    }

    /// Replay from step 0 ignoring checkpoints
    pub fn replay_from_scratch(&self, target: u64) -> Result<ReplayOutcome<M::State>, QueryError> {
        self.check_target(target)?;
        // needs the log from step 0
        if let Some(earliest) = self.checkpoints.base_step() {
            return Err(QueryError::BeforeHistory { target: 0, earliest });
        }
        let mut state = self.model.init();
        let mut events_applied = 0;
        for entry in self.store.get_range(0, target) {
            self.model.apply(&mut state, &entry.event);
            events_applied += 1;
        }
        Ok(ReplayOutcome {
            state,
            target_step: target,
            checkpoint_step: None,
            events_applied,
        })
    }

    /// Like `replay`, recording every transition and checking it against
    /// `verifier`. Violations are returned, never raised.
    pub fn replay_with_history(
        &self,
        target: u64,
        verifier: Option<&Verifier<M::State, M::Event>>,
    ) -> Result<ReplayHistory<'a, M::State, M::Event>, QueryError> {
        self.check_target(target)?;
        let (mut state, checkpoint_step, from) = self.start(target);
        let mut transitions = Vec::new();
        let mut violations = Vec::new();

        let store: &'a EpisodicStore<M::Event> = self.store;
        for entry in store.get_range(from, target) {
            let prev = state.clone();
            self.model.apply(&mut state, &entry.event);
            if let Some(v) = verifier {
                violations.extend(v.check(entry.step, &prev, &entry.event, &state));
            }
            transitions.push(Transition {
                step: entry.step,
                prev,
                event: &entry.event,
                next: state.clone(),
            });
        }

        Ok(ReplayHistory {
            outcome: ReplayOutcome {
                state,
                target_step: target,
                checkpoint_step,
                events_applied: transitions.len(),
            },
            transitions,
            violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::checkpoint::CheckpointPolicy;
    use crate::storage::verifier::FnRule;

    struct Sum;

    impl StateModel for Sum {
        type State = Vec<i64>;
        type Event = i64;

        fn init(&self) -> Vec<i64> {
            Vec::new()
        }

        fn apply(&self, state: &mut Vec<i64>, event: &i64) {
            let last = state.last().copied().unwrap_or(0);
            state.push(last + event);
        }
    }

    fn fixture(n: u64, interval: u64) -> (EpisodicStore<i64>, CheckpointManager<Vec<i64>>) {
        let mut store = EpisodicStore::new(1024);
        let mut checkpoints = CheckpointManager::new(CheckpointPolicy::Fixed { interval }).unwrap();
        let mut state = Sum.init();
        for step in 0..n {
            let event = (step as i64 * 7) % 5 - 2;
            Sum.apply(&mut state, &event);
            store.append(step, event, None).unwrap();
            checkpoints.maybe_checkpoint(step, &state, &Default::default());
        }
        (store, checkpoints)
    }

    #[test]
    fn test_replay_matches_full_replay() {
        let (store, checkpoints) = fixture(40, 6);
        let replayer = Replayer::new(&Sum, &store, &checkpoints);
        for t in 0..40 {
            let fast = replayer.replay(t).unwrap();
            let slow = replayer.replay_from_scratch(t).unwrap();
            assert_eq!(fast.state, slow.state);
            let cp = fast.checkpoint_step.unwrap();
            assert_eq!(fast.events_applied as u64, t - cp);
            assert!((fast.events_applied as u64) < t + 1);
        }
    }

    #[test]
    fn test_replay_without_checkpoints() {
        let (store, _) = fixture(10, 1);
        let empty = CheckpointManager::new(CheckpointPolicy::Fixed { interval: 1 }).unwrap();
        let replayer = Replayer::new(&Sum, &store, &empty);
        let out = replayer.replay(9).unwrap();
        assert_eq!(out.checkpoint_step, None);
        assert_eq!(out.events_applied, 10);
    }

    #[test]
    fn test_target_out_of_range() {
        let (store, checkpoints) = fixture(5, 2);
        let replayer = Replayer::new(&Sum, &store, &checkpoints);
        assert_eq!(
            replayer.replay(5),
            Err(QueryError::StepOutOfRange { target: 5, last: Some(4) })
        );
    }

    #[test]
    fn test_truncated_history() {
        // a log resumed after step 9 with a base checkpoint standing in for 0..=9
        let mut store = EpisodicStore::new(16);
        let mut checkpoints = CheckpointManager::new(CheckpointPolicy::Fixed { interval: 100 }).unwrap();
        checkpoints.save_base(9, &vec![10]);
        store.append(10, 1, None).unwrap();
        store.append(11, 1, None).unwrap();
        let replayer = Replayer::new(&Sum, &store, &checkpoints);

        assert_eq!(
            replayer.replay(3),
            Err(QueryError::BeforeHistory { target: 3, earliest: 9 })
        );
        assert!(replayer.replay_with_history(8, None).is_err());
        assert!(matches!(
            replayer.replay_from_scratch(11),
            Err(QueryError::BeforeHistory { .. })
        ));

        assert_eq!(replayer.replay(9).unwrap().state, vec![10]);
        let out = replayer.replay(11).unwrap();
        assert_eq!(out.state, vec![10, 11, 12]);
        assert_eq!(out.checkpoint_step, Some(9));
        assert_eq!(out.events_applied, 2);
    }

    #[test]
    fn test_history_reports_violations() {
        let (store, checkpoints) = fixture(14, 5);
        let replayer = Replayer::new(&Sum, &store, &checkpoints);
        let verifier = Verifier::<Vec<i64>, i64>::new().with_rule(FnRule::new(
            "no_negative_events",
            |_: &Vec<i64>, event: &i64, _: &Vec<i64>| (*event < 0).then(|| format!("event {event}")),
        ));

        let history = replayer.replay_with_history(13, Some(&verifier)).unwrap();
        assert_eq!(history.outcome.checkpoint_step, Some(10));
        let steps: Vec<u64> = history.transitions.iter().map(|t| t.step).collect();
        assert_eq!(steps, vec![11, 12, 13]);
        assert_eq!(history.transitions[2].prev, history.transitions[1].next);
        assert_eq!(history.outcome.state, replayer.replay(13).unwrap().state);

        // events at 11, 12, 13 are 0, 2, -1
        assert_eq!(history.violations.len(), 1);
        assert_eq!(history.violations[0].step, 13);
        assert_eq!(history.violations[0].rule, "no_negative_events");
    }
}
