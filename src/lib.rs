//! Content-addressable event memory on a torus.
//!
//! A token stream is written into 2D grids whose traversal path is itself
//! hashed from the stream, so "when" becomes "where". Recent token windows
//! can be localized back to the places they were written, historical state
//! is rebuilt from checkpoints plus a short replay, and several independent
//! columns vote for noise-robust answers.

pub mod engine;
pub mod error;
pub mod hash;
pub mod memory;
pub mod storage;

pub use engine::{Diagnostics, Engine, EngineConfig, EngineSnapshot, StepReport};
pub use error::{ConfigError, EngineError, QueryError};
pub use memory::{
    loc_key, unpack_loc_key, Column, ColumnConfig, Displacement, DisplacementConfig, DisplacementEncoder, Fact, GridMap, GridSize,
    HeavyHitters, LocalizeQuery, Location, LocationCandidate, LocationIndex, Prediction, StepInput, Token,
    VoteOutcome, Voter, WriteFlags, WritePolicy,
};
pub use storage::{
    CheckpointManager, CheckpointPolicy, CheckpointSignals, EpisodicStore, ReplayOutcome, Replayer, StateModel,
    Verifier, Violation,
};
