use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// When to take a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// Every step that is a multiple of `interval`
    Fixed { interval: u64 },
    Adaptive(AdaptivePolicy),
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        CheckpointPolicy::Fixed { interval: 32 }
    }
}

/// Signal-driven checkpointing bounded by a min and max spacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptivePolicy {
    /// Never checkpoint sooner than this many steps after the last one
    pub min_interval: u64,
    /// Always checkpoint once this many steps have passed
    pub max_interval: u64,
    /// Checkpoint when the error moving average exceeds this
    pub error_threshold: f64,
    /// Checkpoint when confidence falls below this
    pub confidence_threshold: f64,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            min_interval: 8,
            max_interval: 64,
            error_threshold: 0.3,
            confidence_threshold: 0.5,
        }
    }
}

impl CheckpointPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CheckpointPolicy::Fixed { interval: 0 } => {
                Err(ConfigError::Invalid("checkpoint interval must be at least 1".into()))
            }
            CheckpointPolicy::Adaptive(p) if p.max_interval == 0 => {
                Err(ConfigError::Invalid("max_interval must be at least 1".into()))
            }
            CheckpointPolicy::Adaptive(p) if p.min_interval > p.max_interval => {
                Err(ConfigError::Invalid(format!(
                    "min_interval {} exceeds max_interval {}",
                    p.min_interval, p.max_interval
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Externally supplied hints for adaptive checkpointing
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSignals {
    pub error_ema: Option<f64>,
    pub confidence: Option<f64>,
    /// The event resets the scene or state
    pub reset: bool,
}

/// State as it stood after applying the event at `step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub step: u64,
    pub state: S,
}

/// Sorted, append-only list of checkpoints
#[derive(Debug, Clone)]
pub struct CheckpointManager<S> {
    policy: CheckpointPolicy,
    checkpoints: Vec<Checkpoint<S>>,
    last_step: Option<u64>,
    /// Earliest reconstructible step when history before it is gone
    base_step: Option<u64>,
}

impl<S: Clone> CheckpointManager<S> {
    pub fn new(policy: CheckpointPolicy) -> Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Self {
            policy,
            checkpoints: Vec::new(),
            last_step: None,
            base_step: None,
        })
    }

    pub fn policy(&self) -> &CheckpointPolicy { &self.policy }
    pub fn len(&self) -> usize { self.checkpoints.len() }
    pub fn is_empty(&self) -> bool { self.checkpoints.is_empty() }
    pub fn checkpoints(&self) -> &[Checkpoint<S>] { &self.checkpoints }
    pub fn base_step(&self) -> Option<u64> { self.base_step }

    pub fn latest_step(&self) -> Option<u64> {
        self.checkpoints.last().map(|c| c.step)
    }

    /// Whether the policy asks for a checkpoint after `step`
    pub fn should_checkpoint(&self, step: u64, signals: &CheckpointSignals) -> bool {
        match &self.policy {
            CheckpointPolicy::Fixed { interval } => step % interval == 0,
            CheckpointPolicy::Adaptive(p) => {
                let since = match self.last_step {
                    Some(last) => step.saturating_sub(last),
                    None => step + 1,
                };
                if since < p.min_interval {
                    return false;
                }
                since >= p.max_interval
                    || signals.reset
                    || signals.error_ema.map_or(false, |e| e > p.error_threshold)
                    || signals.confidence.map_or(false, |c| c < p.confidence_threshold)
            }
        }
    }

    /// Stores a deep copy of `state`. Existing checkpoints are never replaced,
    /// so a second save for the same step is ignored.
    pub fn save(&mut self, step: u64, state: &S) -> bool {
        let pos = self.checkpoints.partition_point(|c| c.step < step);
        if self.checkpoints.get(pos).map_or(false, |c| c.step == step) {
            return false;
        }
        self.checkpoints.insert(pos, Checkpoint { step, state: state.clone() });
        self.last_step = Some(self.last_step.map_or(step, |l| l.max(step)));
        debug!(step, total = self.checkpoints.len(), "checkpoint saved");
        true
    }

    /// Saves the checkpoint that history restarts from. Steps before it
    /// can no longer be reconstructed.
    pub fn save_base(&mut self, step: u64, state: &S) {
        self.save(step, state);
        self.base_step = Some(step);
    }

    /// Applies the policy and saves when it fires
    pub fn maybe_checkpoint(&mut self, step: u64, state: &S, signals: &CheckpointSignals) -> bool {
        self.should_checkpoint(step, signals) && self.save(step, state)
    }

    /// Latest checkpoint with `checkpoint.step <= step`
    pub fn load_before(&self, step: u64) -> Option<&Checkpoint<S>> {
        let pos = self.checkpoints.partition_point(|c| c.step <= step);
        pos.checked_sub(1).map(|i| &self.checkpoints[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_policy() {
        let manager = CheckpointManager::<u32>::new(CheckpointPolicy::Fixed { interval: 4 }).unwrap();
        let fired: Vec<u64> = (0..10)
            .filter(|&s| manager.should_checkpoint(s, &CheckpointSignals::default()))
            .collect();
        assert_eq!(fired, vec![0, 4, 8]);
    }

    #[test]
    fn test_adaptive_policy() {
        let policy = CheckpointPolicy::Adaptive(AdaptivePolicy {
            min_interval: 3,
            max_interval: 6,
            error_threshold: 0.5,
            confidence_threshold: 0.2,
        });
        let mut manager = CheckpointManager::<u32>::new(policy).unwrap();
        let quiet = CheckpointSignals::default();
        let noisy = CheckpointSignals { error_ema: Some(0.9), ..Default::default() };

        // first checkpoint counts steps from the start of the log
        assert!(!manager.should_checkpoint(1, &noisy));
        assert!(manager.maybe_checkpoint(2, &0, &noisy));

        // too soon, even with a reset
        let reset = CheckpointSignals { reset: true, ..Default::default() };
        assert!(!manager.should_checkpoint(4, &reset));
        assert!(manager.should_checkpoint(5, &reset));

        let unsure = CheckpointSignals { confidence: Some(0.1), ..Default::default() };
        assert!(manager.should_checkpoint(5, &unsure));
        assert!(!manager.should_checkpoint(7, &quiet));
        assert!(manager.should_checkpoint(8, &quiet));
    }

    #[test]
    fn test_load_before() {
        let mut manager = CheckpointManager::new(CheckpointPolicy::default()).unwrap();
        manager.save(10, &"ten");
        manager.save(20, &"twenty");
        manager.save(5, &"five");

        assert!(manager.load_before(4).is_none());
        assert_eq!(manager.load_before(5).unwrap().state, "five");
        assert_eq!(manager.load_before(19).unwrap().step, 10);
        assert_eq!(manager.load_before(1000).unwrap().state, "twenty");
    }

    #[test]
    fn test_never_overwritten() {
        let mut manager = CheckpointManager::new(CheckpointPolicy::default()).unwrap();
        assert!(manager.save(3, &1u8));
        assert!(!manager.save(3, &2u8));
        assert_eq!(manager.load_before(3).unwrap().state, 1);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_base_checkpoint() {
        let mut manager = CheckpointManager::new(CheckpointPolicy::default()).unwrap();
        assert_eq!(manager.base_step(), None);
        manager.save_base(29, &"restored");
        manager.save(32, &"later");
        assert_eq!(manager.base_step(), Some(29));
        assert_eq!(manager.latest_step(), Some(32));
        assert!(manager.load_before(28).is_none());
        assert_eq!(manager.load_before(30).unwrap().state, "restored");
    }

    #[test]
    fn test_invalid_policies() {
        assert!(CheckpointManager::<u8>::new(CheckpointPolicy::Fixed { interval: 0 }).is_err());
        let inverted = AdaptivePolicy { min_interval: 10, max_interval: 2, ..Default::default() };
        assert!(CheckpointManager::<u8>::new(CheckpointPolicy::Adaptive(inverted)).is_err());
    }
}
