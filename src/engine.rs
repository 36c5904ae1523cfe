//! Multi-column facade tying the spatial and temporal halves together.
//!
//! One `step` writes into every column at its current location, moves every
//! column, logs the event and applies it to the live caller state, then
//! checkpoints according to policy. Columns never observe each other; cross
//! column reads (voting, agreement) happen only between steps.

use crate::error::{ConfigError, EngineError, QueryError};
use crate::memory::column::{Column, ColumnConfig, ColumnDiagnostics, ColumnState, ColumnStep, StepInput, WriteFlags};
use crate::memory::displacement::DisplacementConfig;
use crate::memory::grid::GridStats;
use crate::memory::localizer::{self, LocalizeQuery, LocationCandidate};
use crate::memory::location::{Location, Token};
use crate::memory::voting::{Aggregator, Prediction, VoteOutcome, Voter};
use crate::storage::checkpoint::{Checkpoint, CheckpointManager, CheckpointPolicy, CheckpointSignals};
use crate::storage::episodic::{EpisodicStore, StoreError};
use crate::storage::replay::{ReplayHistory, ReplayOutcome, Replayer, StateModel};
use crate::storage::snapshot::{self, CompressionAlgorithm, PersistError, SnapshotMetrics};
use crate::storage::verifier::Verifier;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use tracing::{debug, info, trace};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub columns: Vec<ColumnConfig>,
    pub checkpoint: CheckpointPolicy,
    /// Maximum number of episodic entries
    pub episodic_capacity: usize,
    pub snapshot_compression: CompressionAlgorithm,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_columns(3, ColumnConfig::default())
    }
}

impl EngineConfig {
    /// `n` copies of `template`, each with its own displacement seed
    pub fn with_columns(n: usize, template: ColumnConfig) -> Self {
        let columns = (0..n)
            .map(|i| ColumnConfig {
                displacement: DisplacementConfig {
                    seed: template.displacement.seed.wrapping_add(i as u32),
                    ..template.displacement.clone()
                },
                ..template.clone()
            })
            .collect();
        Self {
            columns,
            checkpoint: CheckpointPolicy::default(),
            episodic_capacity: 1 << 20,
            snapshot_compression: CompressionAlgorithm::LZ4,
        }
    }

    /// Parses and validates a JSON config document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.columns.is_empty() {
            return Err(ConfigError::Invalid("at least one column is required".into()));
        }
        if self.episodic_capacity == 0 {
            return Err(ConfigError::Invalid("episodic_capacity must be at least 1".into()));
        }
        for column in &self.columns {
            column.validate()?;
        }
        self.checkpoint.validate()
    }
}

/// What one engine step did
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: u64,
    pub columns: Vec<ColumnStep>,
    pub checkpointed: bool,
}

/// Occupancy and movement figures across all columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub per_column: Vec<ColumnDiagnostics>,
    pub aggregate: GridStats,
    pub zero_step_rate: f64,
    /// Fraction of columns standing at the most common location
    pub column_agreement: f64,
    /// Shannon entropy (bits) of the column location distribution
    pub location_entropy: f64,
}

/// Persisted engine: config, full columns and the caller's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot<S> {
    pub config: EngineConfig,
    pub step: u64,
    pub columns: Vec<Column>,
    pub state: S,
}

type EventResolver<E> = Box<dyn Fn(&E) -> StepInput + Send + Sync>;

pub struct Engine<M: StateModel> {
    config: EngineConfig,
    model: M,
    columns: Vec<Column>,
    store: EpisodicStore<M::Event>,
    checkpoints: CheckpointManager<M::State>,
    /// Column positions and encoder context saved with every checkpoint
    column_checkpoints: CheckpointManager<Vec<ColumnState>>,
    state: M::State,
    step: u64,
    verifier: Option<Verifier<M::State, M::Event>>,
    resolver: Option<EventResolver<M::Event>>,
}

impl<M: StateModel> Engine<M> {
    pub fn new(config: EngineConfig, model: M) -> Result<Self, ConfigError> {
        config.validate()?;
        let columns = config
            .columns
            .iter()
            .enumerate()
            .map(|(id, c)| Column::new(id, c.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let state = model.init();
        Ok(Self {
            store: EpisodicStore::new(config.episodic_capacity),
            checkpoints: CheckpointManager::new(config.checkpoint.clone())?,
            column_checkpoints: CheckpointManager::new(config.checkpoint.clone())?,
            columns,
            state,
            model,
            config,
            step: 0,
            verifier: None,
            resolver: None,
        })
    }

    /// Rules checked by `replay_with_history`
    pub fn with_verifier(mut self, verifier: Verifier<M::State, M::Event>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Maps an opaque event to the tokens it writes
    pub fn with_resolver(mut self, resolver: impl Fn(&M::Event) -> StepInput + Send + Sync + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    // Getters
    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn model(&self) -> &M { &self.model }
    pub fn columns(&self) -> &[Column] { &self.columns }
    pub fn column(&self, i: usize) -> Option<&Column> { self.columns.get(i) }
    pub fn store(&self) -> &EpisodicStore<M::Event> { &self.store }
    pub fn checkpoints(&self) -> &CheckpointManager<M::State> { &self.checkpoints }
    pub fn state(&self) -> &M::State { &self.state }
    /// Step number the next `step` call will use
    pub fn current_step(&self) -> u64 { self.step }

    /// Advances every column by one step, logging `event` if given
    pub fn step(&mut self, input: StepInput, event: Option<M::Event>) -> Result<StepReport, EngineError> {
        self.step_with(input, event, WriteFlags::default(), CheckpointSignals::default())
    }

    pub fn step_token(&mut self, token: Token) -> Result<StepReport, EngineError> {
        self.step(StepInput::from(token), None)
    }

    /// Resolves `event` into a step input through the attached resolver
    pub fn step_event(&mut self, event: M::Event) -> Result<StepReport, EngineError> {
        let resolver = self.resolver.as_ref().ok_or(ConfigError::MissingEventResolver)?;
        let input = resolver(&event);
        self.step(input, Some(event))
    }

    pub fn step_with(
        &mut self,
        input: StepInput,
        event: Option<M::Event>,
        flags: WriteFlags,
        signals: CheckpointSignals,
    ) -> Result<StepReport, EngineError> {
        // fail before any column moves so a rejected step leaves no trace
        if event.is_some() && self.store.is_full() {
            let capacity = self.store.capacity();
            return Err(StoreError::CapacityExceeded { capacity }.into());
        }

        let step = self.step;
        let columns = self.step_columns(&input, step, flags);
        trace!(step, token = input.step_token, "engine step");

        if let Some(event) = event {
            let location = columns.first().map(|c| c.written_at);
            self.model.apply(&mut self.state, &event);
            self.store.append(step, event, location)?;
        }

        // every step counts toward the policy, with or without an event
        let checkpointed = self.checkpoints.maybe_checkpoint(step, &self.state, &signals);
        if checkpointed {
            let states = self.column_states();
            self.column_checkpoints.save(step, &states);
        }

        self.step += 1;
        Ok(StepReport { step, columns, checkpointed })
    }

    #[cfg(not(feature = "parallel"))]
    fn step_columns(&mut self, input: &StepInput, step: u64, flags: WriteFlags) -> Vec<ColumnStep> {
        self.columns
            .iter_mut()
            .map(|c| c.step(input, step, flags))
            .collect()
    }

    #[cfg(feature = "parallel")]
    fn step_columns(&mut self, input: &StepInput, step: u64, flags: WriteFlags) -> Vec<ColumnStep> {
        use rayon::prelude::*;

        self.columns
            .par_iter_mut()
            .map(|c| c.step(input, step, flags))
            .collect()
    }

    fn column_states(&self) -> Vec<ColumnState> {
        self.columns.iter().map(Column::state).collect()
    }

    /// Column states saved with the latest checkpoint at or before `target`
    pub fn column_checkpoint(&self, target: u64) -> Option<&Checkpoint<Vec<ColumnState>>> {
        self.column_checkpoints.load_before(target)
    }

    /// Moves every column back to where it stood at the latest checkpoint
    /// at or before `target`. Map contents and indexes are untouched.
    /// Returns the checkpoint step used, or `None` when there is none.
    pub fn rewind_columns(&mut self, target: u64) -> Result<Option<u64>, ConfigError> {
        let Some(checkpoint) = self.column_checkpoints.load_before(target) else {
            return Ok(None);
        };
        for (column, state) in self.columns.iter_mut().zip(&checkpoint.state) {
            column.restore_state(state)?;
        }
        debug!(target, checkpoint = checkpoint.step, "columns rewound");
        Ok(Some(checkpoint.step))
    }

    /// Votes the columns' predicted next token. Columns with nothing stored
    /// at their location abstain.
    pub fn predict(&self) -> Result<VoteOutcome<Token>, EngineError> {
        let mut aggregator = Aggregator::new(self.columns.len());
        for (i, column) in self.columns.iter().enumerate() {
            match column.predict() {
                Some((token, _)) => aggregator.submit(i, Prediction::new(token))?,
                None => aggregator.abstain(i)?,
            }
        }
        Ok(aggregator.resolve()?)
    }

    /// Ranked candidates across every column
    pub fn localize(&self, query: &LocalizeQuery) -> Result<Vec<LocationCandidate>, QueryError> {
        localizer::localize_columns(self.columns.iter().map(Column::index), query)
    }

    pub fn localize_column(&self, column: usize, query: &LocalizeQuery) -> Result<Vec<LocationCandidate>, QueryError> {
        match self.columns.get(column) {
            Some(c) => localizer::localize(c.index(), query),
            None => Ok(Vec::new()),
        }
    }

    /// Votes each column's best candidate, weighted by its score
    pub fn localize_consensus(&self, query: &LocalizeQuery) -> Result<VoteOutcome<Location>, EngineError> {
        let mut aggregator = Aggregator::new(self.columns.len());
        for (i, column) in self.columns.iter().enumerate() {
            match localizer::localize(column.index(), query)?.first() {
                Some(best) => aggregator.submit(i, Prediction::weighted(best.location, best.score))?,
                None => aggregator.abstain(i)?,
            }
        }
        Ok(aggregator.resolve()?)
    }

    fn replayer(&self) -> Replayer<'_, M> {
        Replayer::new(&self.model, &self.store, &self.checkpoints)
    }

    /// Caller state after the event at `target`, from the nearest checkpoint
    pub fn replay(&self, target: u64) -> Result<ReplayOutcome<M::State>, QueryError> {
        self.replayer().replay(target)
    }

    pub fn replay_from_scratch(&self, target: u64) -> Result<ReplayOutcome<M::State>, QueryError> {
        self.replayer().replay_from_scratch(target)
    }

    /// Replay recording each transition; violations from the attached
    /// verifier come back alongside the state
    pub fn replay_with_history(&self, target: u64) -> Result<ReplayHistory<'_, M::State, M::Event>, QueryError> {
        self.replayer().replay_with_history(target, self.verifier.as_ref())
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let per_column: Vec<ColumnDiagnostics> = self.columns.iter().map(Column::diagnostics).collect();
        let aggregate = GridStats::combine(per_column.iter().map(|d| &d.grid));
        let (zero, moves) = per_column
            .iter()
            .fold((0u64, 0u64), |(z, m), d| (z + d.zero_steps, m + d.moves));

        let agreement = Voter::vote(per_column.iter().map(|d| Prediction::new(d.location)));

        let mut counts: HashMap<Location, usize> = HashMap::new();
        for d in &per_column {
            *counts.entry(d.location).or_default() += 1;
        }
        let n = per_column.len() as f64;
        let location_entropy = counts
            .values()
            .map(|&c| {
                let p = c as f64 / n;
                -p * p.log2()
            })
            .sum::<f64>()
            .max(0.0);

        Diagnostics {
            aggregate,
            zero_step_rate: if moves == 0 { 0.0 } else { zero as f64 / moves as f64 },
            column_agreement: agreement.confidence(),
            location_entropy,
            per_column,
        }
    }

    /// Returns every column to its offset; stored contents are kept
    pub fn reset_columns(&mut self) {
        self.columns.iter_mut().for_each(Column::reset);
    }

    pub fn snapshot(&self) -> EngineSnapshot<M::State> {
        EngineSnapshot {
            config: self.config.clone(),
            step: self.step,
            columns: self.columns.clone(),
            state: self.state.clone(),
        }
    }

    /// Rebuilds an engine from a snapshot. The event log starts empty and the
    /// restored state becomes the base checkpoint; replays before it fail.
    pub fn restore(snapshot: EngineSnapshot<M::State>, model: M) -> Result<Self, ConfigError> {
        let EngineSnapshot { config, step, columns, state } = snapshot;
        config.validate()?;
        if columns.len() != config.columns.len() {
            return Err(ConfigError::Invalid(format!(
                "snapshot holds {} columns, config expects {}",
                columns.len(),
                config.columns.len()
            )));
        }

        let mut checkpoints = CheckpointManager::new(config.checkpoint.clone())?;
        let mut column_checkpoints: CheckpointManager<Vec<ColumnState>> =
            CheckpointManager::new(config.checkpoint.clone())?;
        if let Some(last) = step.checked_sub(1) {
            checkpoints.save_base(last, &state);
            column_checkpoints.save_base(last, &columns.iter().map(Column::state).collect());
        }
        info!(step, columns = columns.len(), "engine restored from snapshot");

        Ok(Self {
            store: EpisodicStore::new(config.episodic_capacity),
            checkpoints,
            column_checkpoints,
            columns,
            state,
            model,
            config,
            step,
            verifier: None,
            resolver: None,
        })
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> Result<SnapshotMetrics, PersistError>
    where
        M::State: Serialize,
    {
        let metrics = snapshot::write_to(writer, &self.snapshot(), self.config.snapshot_compression)?;
        debug!(
            step = self.step,
            bytes = metrics.compressed_size,
            ratio = metrics.compression_ratio(),
            "engine snapshot written"
        );
        Ok(metrics)
    }

    pub fn load<R: Read>(reader: &mut R, model: M) -> Result<Self, EngineError>
    where
        M::State: DeserializeOwned,
    {
        let snapshot: EngineSnapshot<M::State> = snapshot::read_from(reader)?;
        Ok(Self::restore(snapshot, model)?)
    }
}
