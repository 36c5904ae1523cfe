//! Temporal side of the engine: the event log, checkpoints, replay and
//! snapshot persistence.

pub mod checkpoint;
pub mod episodic;
pub mod replay;
pub mod snapshot;
pub mod verifier;

pub use checkpoint::{AdaptivePolicy, Checkpoint, CheckpointManager, CheckpointPolicy, CheckpointSignals};
pub use episodic::{EpisodicEntry, EpisodicStore, StoreError};
pub use replay::{ReplayHistory, ReplayOutcome, Replayer, StateModel, Transition};
pub use snapshot::{CompressionAlgorithm, PersistError, SnapshotMetrics};
pub use verifier::{ConsistencyRule, FnRule, Verifier, Violation};
