use super::heavy_hitters::HeavyHitters;
use super::location::{loc_key, GridSize, Location, Token};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grids wider or taller than this use sparse storage
pub const SPARSE_THRESHOLD: u32 = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum CellStorage {
    /// Row-major `width * height` cells plus the indices created so far
    Dense {
        cells: Vec<Option<HeavyHitters>>,
        occupied: Vec<u32>,
    },
    /// locKey -> cell, created lazily and never removed
    Sparse(BTreeMap<u32, HeavyHitters>),
}

/// Occupancy figures for one map
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GridStats {
    pub non_empty_cells: usize,
    pub cells_at_full_capacity: usize,
    pub total_cells: usize,
    /// non-empty / total
    pub grid_utilization: f64,
    /// full / non-empty
    pub cell_saturation: f64,
}

impl GridStats {
    /// Sums several maps' figures and recomputes the ratios
    pub fn combine<'a>(stats: impl IntoIterator<Item = &'a GridStats>) -> GridStats {
        let mut out = GridStats::default();
        for s in stats {
            out.non_empty_cells += s.non_empty_cells;
            out.cells_at_full_capacity += s.cells_at_full_capacity;
            out.total_cells += s.total_cells;
        }
        out.grid_utilization = ratio(out.non_empty_cells, out.total_cells);
        out.cell_saturation = ratio(out.cells_at_full_capacity, out.non_empty_cells);
        out
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// 2D toroidal array of heavy-hitters cells for one channel.
///
/// Storage mode is picked once at construction and is invisible to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMap {
    size: GridSize,
    k: usize,
    storage: CellStorage,
}

impl GridMap {
    pub fn new(size: GridSize, k: usize) -> Result<Self, ConfigError> {
        size.validate()?;
        if k == 0 {
            return Err(ConfigError::Invalid("cell capacity must be at least 1".into()));
        }
        let storage = if size.width.max(size.height) > SPARSE_THRESHOLD {
            CellStorage::Sparse(BTreeMap::new())
        } else {
            CellStorage::Dense {
                cells: vec![None; size.cells()],
                occupied: Vec::new(),
            }
        };
        Ok(Self { size, k, storage })
    }

    pub fn size(&self) -> GridSize { self.size }
    pub fn cell_capacity(&self) -> usize { self.k }
    pub fn total_cells(&self) -> usize { self.size.cells() }

    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, CellStorage::Sparse(_))
    }

    /// Adds `weight` for `token` at `(x, y)`, creating the cell if needed
    pub fn update(&mut self, x: u32, y: u32, token: Token, weight: f32) {
        let loc = Location::new(x, y).wrapped(self.size);
        let k = self.k;
        match &mut self.storage {
            CellStorage::Dense { cells, occupied } => {
                let idx = (loc.y * self.size.width + loc.x) as usize;
                let cell = &mut cells[idx];
                if cell.is_none() {
                    occupied.push(idx as u32);
                }
                cell.get_or_insert_with(|| HeavyHitters::new(k))
                    .update(token, weight);
            }
            CellStorage::Sparse(cells) => {
                cells
                    .entry(loc_key(loc.x, loc.y))
                    .or_insert_with(|| HeavyHitters::new(k))
                    .update(token, weight);
            }
        }
    }

    pub fn cell(&self, x: u32, y: u32) -> Option<&HeavyHitters> {
        let loc = Location::new(x, y).wrapped(self.size);
        match &self.storage {
            CellStorage::Dense { cells, .. } => {
                cells[(loc.y * self.size.width + loc.x) as usize].as_ref()
            }
            CellStorage::Sparse(cells) => cells.get(&loc.key()),
        }
    }

    /// Top `n` tokens at `(x, y)`; empty for an untouched cell
    pub fn read_top_k(&self, x: u32, y: u32, n: usize) -> Vec<(Token, f32)> {
        self.cell(x, y).map(|c| c.top_k(n)).unwrap_or_default()
    }

    /// Occupancy statistics, computed over created cells only
    pub fn stats(&self) -> GridStats {
        let (non_empty, full) = match &self.storage {
            CellStorage::Dense { cells, occupied } => occupied
                .iter()
                .filter_map(|&i| cells[i as usize].as_ref())
                .fold((0, 0), tally),
            CellStorage::Sparse(cells) => cells.values().fold((0, 0), tally),
        };
        let total = self.total_cells();
        GridStats {
            non_empty_cells: non_empty,
            cells_at_full_capacity: full,
            total_cells: total,
            grid_utilization: ratio(non_empty, total),
            cell_saturation: ratio(full, non_empty),
        }
    }

    /// Drops every cell's contents, keeping dimensions and mode
    pub fn clear(&mut self) {
        match &mut self.storage {
            CellStorage::Dense { cells, occupied } => {
                cells.iter_mut().for_each(|c| *c = None);
                occupied.clear();
            }
            CellStorage::Sparse(cells) => cells.clear(),
        }
    }
}

fn tally((non_empty, full): (usize, usize), cell: &HeavyHitters) -> (usize, usize) {
    if cell.is_empty() {
        (non_empty, full)
    } else {
        (non_empty + 1, full + usize::from(cell.len() == cell.capacity()))
    }
}
