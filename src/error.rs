//! Error types shared across the engine.
//!
//! Module-local failures keep their own enums (`StoreError`, `QueryError`,
//! `PersistError`, `VoteError`); `EngineError` wraps them for the facade.

use crate::memory::voting::VoteError;
use crate::storage::episodic::StoreError;
use crate::storage::snapshot::PersistError;
use thiserror::Error;

/// Rejected configuration. Raised at construction time only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unsupported displacement method: {0}")]
    UnsupportedDisplacementMethod(String),
    #[error("Unsupported write policy: {0}")]
    UnsupportedWritePolicy(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("No event resolver attached")]
    MissingEventResolver,
    #[error("Config parse error: {0}")]
    Parse(String),
}

/// Malformed localize or replay request. No partial result is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("min_matches_ratio must be within [0, 1], got {0}")]
    InvalidRatio(f64),
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("Replay target {target} is beyond the last recorded step {last:?}")]
    StepOutOfRange { target: u64, last: Option<u64> },
    #[error("Replay target {target} precedes the earliest reconstructible step {earliest}")]
    BeforeHistory { target: u64, earliest: u64 },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}
