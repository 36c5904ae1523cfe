use super::displacement::{DisplacementConfig, DisplacementEncoder};
use super::grid::{GridMap, GridStats};
use super::location::{apply_displacement, Displacement, GridSize, Location, Token};
use super::location_index::LocationIndex;
use super::slow_map::{ClosedWindow, Fact, SlowMapConfig, SlowMapManager};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which tokens a step writes into the fast maps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WritePolicy {
    /// Only the step token
    StepToken,
    /// Every write token; the step token when none are given
    AllTokens,
}

impl FromStr for WritePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "step_token" => Ok(WritePolicy::StepToken),
            "all_tokens" => Ok(WritePolicy::AllTokens),
            other => Err(ConfigError::UnsupportedWritePolicy(other.to_string())),
        }
    }
}

impl TryFrom<String> for WritePolicy {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WritePolicy> for String {
    fn from(policy: WritePolicy) -> Self {
        policy.to_string()
    }
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePolicy::StepToken => f.write_str("step_token"),
            WritePolicy::AllTokens => f.write_str("all_tokens"),
        }
    }
}

/// Configuration for a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub grid: GridSize,
    /// Heavy-hitters capacity of every cell
    pub cell_capacity: usize,
    /// Maps written every step
    pub fast_maps: usize,
    /// Maps written once per summary window
    pub slow_maps: usize,
    /// Fast map whose location is the column's location
    pub index_map: usize,
    /// Starting location of every map
    pub offset: Location,
    pub write_policy: WritePolicy,
    pub displacement: DisplacementConfig,
    pub max_locations_per_token: usize,
    pub slow: SlowMapConfig,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            grid: GridSize::new(64, 64),
            cell_capacity: 8,
            fast_maps: 1,
            slow_maps: 0,
            index_map: 0,
            offset: Location::default(),
            write_policy: WritePolicy::StepToken,
            displacement: DisplacementConfig::default(),
            max_locations_per_token: 64,
            slow: SlowMapConfig::default(),
        }
    }
}

impl ColumnConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        if self.cell_capacity == 0 {
            return Err(ConfigError::Invalid("cell_capacity must be at least 1".into()));
        }
        if self.fast_maps == 0 {
            return Err(ConfigError::Invalid("at least one fast map is required".into()));
        }
        if self.index_map >= self.fast_maps {
            return Err(ConfigError::Invalid(format!(
                "index_map {} out of range for {} fast maps",
                self.index_map, self.fast_maps
            )));
        }
        if self.max_locations_per_token == 0 {
            return Err(ConfigError::Invalid("max_locations_per_token must be at least 1".into()));
        }
        if self.slow_maps > 0 && self.slow.window_size == 0 {
            return Err(ConfigError::Invalid("slow window_size must be at least 1".into()));
        }
        self.displacement.validate()
    }
}

/// What one step writes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    pub step_token: Token,
    pub write_tokens: Vec<Token>,
    /// Ids touched by the step's event, fed to slow map summaries
    pub facts: Vec<Fact>,
}

impl StepInput {
    pub fn new(step_token: Token, write_tokens: Vec<Token>) -> Self {
        Self { step_token, write_tokens, facts: Vec::new() }
    }

    pub fn with_facts(mut self, facts: Vec<Fact>) -> Self {
        self.facts = facts;
        self
    }
}

impl From<Token> for StepInput {
    fn from(step_token: Token) -> Self {
        Self::new(step_token, Vec::new())
    }
}

/// Caller-requested suppression, used to simulate partial observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFlags {
    pub skip_write: bool,
    pub skip_index: bool,
}

/// Outcome of a full write-then-move step
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStep {
    pub written_at: Location,
    pub displacement: Displacement,
    pub location: Location,
    pub closed_window: Option<ClosedWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MapLayer {
    map: GridMap,
    location: Location,
}

/// Positional state of a column, without map contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnState {
    pub fast_locations: Vec<Location>,
    pub slow_locations: Vec<Location>,
    pub encoder_buffer: Vec<Token>,
    pub zero_steps: u64,
    pub moves: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnDiagnostics {
    pub location: Location,
    /// Fast maps combined
    pub grid: GridStats,
    pub zero_steps: u64,
    pub moves: u64,
    pub zero_step_rate: f64,
}

/// One independent write/move/index apparatus.
///
/// Every step writes at the current location and only then moves, so a
/// token is always found where the column stood before the displacement
/// that token induced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    id: usize,
    config: ColumnConfig,
    fast: Vec<MapLayer>,
    slow: Vec<MapLayer>,
    encoder: DisplacementEncoder,
    index: LocationIndex,
    slow_manager: Option<SlowMapManager>,
    location: Location,
    zero_steps: u64,
    moves: u64,
}

impl Column {
    pub fn new(id: usize, config: ColumnConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let offset = config.offset.wrapped(config.grid);
        let layer = |_| -> Result<MapLayer, ConfigError> {
            Ok(MapLayer {
                map: GridMap::new(config.grid, config.cell_capacity)?,
                location: offset,
            })
        };
        let fast = (0..config.fast_maps).map(layer).collect::<Result<Vec<_>, _>>()?;
        let slow = (0..config.slow_maps).map(layer).collect::<Result<Vec<_>, _>>()?;
        let slow_manager = (config.slow_maps > 0).then(|| SlowMapManager::new(config.slow.clone()));

        Ok(Self {
            id,
            encoder: DisplacementEncoder::new(config.displacement.clone())?,
            index: LocationIndex::new(config.max_locations_per_token),
            fast,
            slow,
            slow_manager,
            location: offset,
            zero_steps: 0,
            moves: 0,
            config,
        })
    }

    // Getters
    pub fn id(&self) -> usize { self.id }
    pub fn config(&self) -> &ColumnConfig { &self.config }
    pub fn location(&self) -> Location { self.location }
    pub fn index(&self) -> &LocationIndex { &self.index }
    pub fn encoder(&self) -> &DisplacementEncoder { &self.encoder }
    pub fn slow_manager(&self) -> Option<&SlowMapManager> { self.slow_manager.as_ref() }

    pub fn fast_map(&self, i: usize) -> Option<&GridMap> {
        self.fast.get(i).map(|l| &l.map)
    }

    pub fn slow_map(&self, i: usize) -> Option<&GridMap> {
        self.slow.get(i).map(|l| &l.map)
    }

    pub fn slow_location(&self, i: usize) -> Option<Location> {
        self.slow.get(i).map(|l| l.location)
    }

    /// Writes at the current (pre-move) location of every fast map
    pub fn step_write(&mut self, input: &StepInput, step: u64, flags: WriteFlags) -> Option<ClosedWindow> {
        if !flags.skip_write {
            let tokens: &[Token] = match self.config.write_policy {
                WritePolicy::AllTokens if !input.write_tokens.is_empty() => &input.write_tokens,
                _ => std::slice::from_ref(&input.step_token),
            };
            for layer in &mut self.fast {
                for &token in tokens {
                    layer.map.update(layer.location.x, layer.location.y, token, 1.0);
                }
            }
        }

        if !flags.skip_index {
            self.index
                .update(input.step_token, self.location.x, self.location.y, step);
        }

        let manager = self.slow_manager.as_mut()?;
        let closed = manager.observe(step, &input.facts)?;
        for layer in &mut self.slow {
            layer.map.update(layer.location.x, layer.location.y, closed.token, 1.0);
        }
        let at = self.slow.first().map_or(self.location, |l| l.location);
        manager.index_summary(closed.token, at, step);
        Some(closed)
    }

    /// Advances every map by the same displacement
    pub fn step_move(&mut self, displacement: Displacement) {
        let grid = self.config.grid;
        for layer in self.fast.iter_mut().chain(self.slow.iter_mut()) {
            layer.location = apply_displacement(layer.location, displacement, grid);
        }
        self.location = self.fast[self.config.index_map].location;
        self.moves += 1;
        if displacement.is_zero() {
            self.zero_steps += 1;
        }
    }

    /// Write, derive the displacement from the step token, move
    pub fn step(&mut self, input: &StepInput, step: u64, flags: WriteFlags) -> ColumnStep {
        let written_at = self.location;
        let closed_window = self.step_write(input, step, flags);
        let displacement = self.encoder.step(input.step_token);
        self.step_move(displacement);
        ColumnStep {
            written_at,
            displacement,
            location: self.location,
            closed_window,
        }
    }

    /// Top `n` tokens of the index map at `location`
    pub fn read_at(&self, location: Location, n: usize) -> Vec<(Token, f32)> {
        self.fast[self.config.index_map]
            .map
            .read_top_k(location.x, location.y, n)
    }

    /// Heaviest token stored where the column stands now
    pub fn predict(&self) -> Option<(Token, f32)> {
        self.read_at(self.location, 1).into_iter().next()
    }

    pub fn diagnostics(&self) -> ColumnDiagnostics {
        let stats: Vec<GridStats> = self.fast.iter().map(|l| l.map.stats()).collect();
        ColumnDiagnostics {
            location: self.location,
            grid: GridStats::combine(&stats),
            zero_steps: self.zero_steps,
            moves: self.moves,
            zero_step_rate: if self.moves == 0 {
                0.0
            } else {
                self.zero_steps as f64 / self.moves as f64
            },
        }
    }

    pub fn state(&self) -> ColumnState {
        ColumnState {
            fast_locations: self.fast.iter().map(|l| l.location).collect(),
            slow_locations: self.slow.iter().map(|l| l.location).collect(),
            encoder_buffer: self.encoder.buffer(),
            zero_steps: self.zero_steps,
            moves: self.moves,
        }
    }

    /// Restores positions and encoder context; map contents are untouched
    pub fn restore_state(&mut self, state: &ColumnState) -> Result<(), ConfigError> {
        if state.fast_locations.len() != self.fast.len() || state.slow_locations.len() != self.slow.len() {
            return Err(ConfigError::Invalid("column state does not match map layout".into()));
        }
        let grid = self.config.grid;
        for (layer, loc) in self.fast.iter_mut().zip(&state.fast_locations) {
            layer.location = loc.wrapped(grid);
        }
        for (layer, loc) in self.slow.iter_mut().zip(&state.slow_locations) {
            layer.location = loc.wrapped(grid);
        }
        self.location = self.fast[self.config.index_map].location;
        self.encoder.restore_buffer(&state.encoder_buffer);
        self.zero_steps = state.zero_steps;
        self.moves = state.moves;
        Ok(())
    }

    /// Back to the offset with an empty encoder context. Maps keep their contents.
    pub fn reset(&mut self) {
        let offset = self.config.offset.wrapped(self.config.grid);
        for layer in self.fast.iter_mut().chain(self.slow.iter_mut()) {
            layer.location = offset;
        }
        self.location = offset;
        self.encoder.reset();
        if let Some(manager) = self.slow_manager.as_mut() {
            manager.reset();
        }
        self.zero_steps = 0;
        self.moves = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(config: ColumnConfig) -> Column {
        Column::new(0, config).unwrap()
    }

    #[test]
    fn test_write_before_move() {
        let mut col = column(ColumnConfig::default());
        let start = col.location();
        let d = Displacement::new(2, 1);

        col.step_write(&StepInput::from(42), 0, WriteFlags::default());
        col.step_move(d);

        assert_eq!(col.location(), Location::new(2, 1));
        assert!(col.read_at(col.location(), 5).is_empty());
        assert_eq!(col.read_at(start, 5), vec![(42, 1.0)]);
        let c = col.index().get_candidates(42, 4);
        assert_eq!(c[0].location(), start);
    }

    #[test]
    fn test_step_uses_encoder() {
        let mut col = column(ColumnConfig::default());
        let mut reference = DisplacementEncoder::new(DisplacementConfig::default()).unwrap();
        let mut expected = Location::default();
        for (step, t) in [3u32, 1, 4, 1, 5, 9, 2, 6].into_iter().enumerate() {
            let out = col.step(&StepInput::from(t), step as u64, WriteFlags::default());
            assert_eq!(out.written_at, expected);
            let d = reference.step(t);
            assert_eq!(out.displacement, d);
            expected = apply_displacement(expected, d, col.config().grid);
            assert_eq!(out.location, expected);
        }
    }

    #[test]
    fn test_write_policy_all_tokens() {
        let config = ColumnConfig {
            write_policy: WritePolicy::AllTokens,
            fast_maps: 2,
            index_map: 1,
            ..Default::default()
        };
        let mut col = column(config);
        col.step_write(&StepInput::new(1, vec![10, 11]), 0, WriteFlags::default());
        for i in 0..2 {
            let top = col.fast_map(i).unwrap().read_top_k(0, 0, 5);
            assert_eq!(top, vec![(10, 1.0), (11, 1.0)]);
        }
        // the index tracks the step token, not the write tokens
        assert_eq!(col.index().get_candidates(1, 1).len(), 1);
        assert!(col.index().get_candidates(10, 1).is_empty());
    }

    #[test]
    fn test_skip_flags() {
        let mut col = column(ColumnConfig::default());
        let flags = WriteFlags { skip_write: true, skip_index: true };
        col.step_write(&StepInput::from(5), 0, flags);
        assert!(col.read_at(Location::default(), 1).is_empty());
        assert!(col.index().get_candidates(5, 1).is_empty());
    }

    #[test]
    fn test_zero_step_rate_and_reset() {
        let config = ColumnConfig { offset: Location::new(5, 6), ..Default::default() };
        let mut col = column(config);
        col.step_move(Displacement::new(0, 0));
        col.step_move(Displacement::new(1, 0));
        assert_eq!(col.diagnostics().zero_step_rate, 0.5);

        col.step(&StepInput::from(1), 2, WriteFlags::default());
        col.reset();
        assert_eq!(col.location(), Location::new(5, 6));
        assert!(col.encoder().buffer().is_empty());
        assert_eq!(col.diagnostics().moves, 0);
        // contents survive a reset
        assert_eq!(col.read_at(Location::new(6, 6), 1), vec![(1, 1.0)]);
    }

    #[test]
    fn test_slow_maps_receive_summaries() {
        let config = ColumnConfig {
            slow_maps: 1,
            slow: SlowMapConfig { window_size: 2, ..Default::default() },
            ..Default::default()
        };
        let mut col = column(config);
        let input = StepInput::from(7).with_facts(vec![Fact::new(1, 2, 3)]);
        assert!(col.step(&input, 0, WriteFlags::default()).closed_window.is_none());

        let at = col.slow_location(0).unwrap();
        let out = col.step(&input, 1, WriteFlags::default());
        let closed = out.closed_window.unwrap();
        assert_eq!(col.slow_map(0).unwrap().read_top_k(at.x, at.y, 1), vec![(closed.token, 1.0)]);
        let idx = col.slow_manager().unwrap().index().unwrap();
        assert_eq!(idx.get_candidates(closed.token, 1)[0].location(), at);
    }

    #[test]
    fn test_state_round_trip() {
        let mut col = column(ColumnConfig::default());
        for (step, t) in [8u32, 6, 7, 5, 3].into_iter().enumerate() {
            col.step(&StepInput::from(t), step as u64, WriteFlags::default());
        }
        let state = col.state();
        let mut other = column(ColumnConfig::default());
        other.restore_state(&state).unwrap();
        assert_eq!(other.location(), col.location());
        assert_eq!(other.encoder().buffer(), col.encoder().buffer());
        assert_eq!(
            other.step(&StepInput::from(1), 5, WriteFlags::default()).displacement,
            col.step(&StepInput::from(1), 5, WriteFlags::default()).displacement
        );
    }

    #[test]
    fn test_invalid_configs() {
        let bad_index = ColumnConfig { index_map: 1, ..Default::default() };
        assert!(Column::new(0, bad_index).is_err());
        let zero_grid = ColumnConfig { grid: GridSize::new(0, 4), ..Default::default() };
        assert!(Column::new(0, zero_grid).is_err());
        assert!(matches!(
            "every_other".parse::<WritePolicy>(),
            Err(ConfigError::UnsupportedWritePolicy(_))
        ));
    }
}
