//! Spatial side of the engine: cells, grids, addressing and localization.

pub mod column;
pub mod displacement;
pub mod grid;
pub mod heavy_hitters;
pub mod localizer;
pub mod location;
pub mod location_index;
pub mod slow_map;
pub mod voting;

pub use column::{Column, ColumnConfig, ColumnDiagnostics, ColumnState, ColumnStep, StepInput, WriteFlags, WritePolicy};
pub use displacement::{DisplacementConfig, DisplacementEncoder, DisplacementMethod};
pub use grid::{GridMap, GridStats};
pub use heavy_hitters::HeavyHitters;
pub use localizer::{LocalizeQuery, LocationCandidate};
pub use location::{apply_displacement, loc_key, unpack_loc_key, Displacement, GridSize, Location, Token};
pub use location_index::{IndexCandidate, LocationIndex};
pub use slow_map::{Fact, SlowMapConfig, SlowMapManager, WindowSummary};
pub use voting::{Aggregator, Prediction, VoteOutcome, Voter};
