use super::location::{Location, Token};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::trace;

/// Per-location statistics for one token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationStats {
    pub count: u32,
    pub last_seen: u64,
}

/// One candidate location returned for a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCandidate {
    pub loc_key: u32,
    pub count: u32,
    pub last_seen: u64,
}

impl IndexCandidate {
    pub fn location(&self) -> Location {
        Location::from_key(self.loc_key)
    }
}

/// count desc, last_seen desc, loc_key asc
fn rank(a: &IndexCandidate, b: &IndexCandidate) -> Ordering {
    b.count
        .cmp(&a.count)
        .then(b.last_seen.cmp(&a.last_seen))
        .then(a.loc_key.cmp(&b.loc_key))
}

/// Inverted index from token to the locations it was written at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationIndex {
    max_locations_per_token: usize,
    entries: BTreeMap<Token, BTreeMap<u32, LocationStats>>,
}

impl LocationIndex {
    pub fn new(max_locations_per_token: usize) -> Self {
        Self {
            max_locations_per_token,
            entries: BTreeMap::new(),
        }
    }

    pub fn max_locations_per_token(&self) -> usize { self.max_locations_per_token }
    pub fn token_count(&self) -> usize { self.entries.len() }

    /// Records an observation of `token` at `(x, y)` on `step`
    pub fn update(&mut self, token: Token, x: u32, y: u32, step: u64) {
        let key = Location::new(x, y).key();
        let locations = self.entries.entry(token).or_default();
        let stats = locations.entry(key).or_insert(LocationStats {
            count: 0,
            last_seen: step,
        });
        stats.count += 1;
        stats.last_seen = stats.last_seen.max(step);

        if locations.len() > self.max_locations_per_token {
            let mut ranked = Self::ranked(locations);
            let dropped = ranked.split_off(self.max_locations_per_token);
            for c in &dropped {
                locations.remove(&c.loc_key);
            }
            trace!(token, dropped = dropped.len(), "pruned location index");
        }
    }

    /// Up to `limit` locations for `token`, best first
    pub fn get_candidates(&self, token: Token, limit: usize) -> Vec<IndexCandidate> {
        match self.entries.get(&token) {
            Some(locations) => {
                let mut ranked = Self::ranked(locations);
                ranked.truncate(limit);
                ranked
            }
            None => Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn ranked(locations: &BTreeMap<u32, LocationStats>) -> Vec<IndexCandidate> {
        let mut out: Vec<IndexCandidate> = locations
            .iter()
            .map(|(&loc_key, s)| IndexCandidate {
                loc_key,
                count: s.count,
                last_seen: s.last_seen,
            })
            .collect();
        out.sort_by(rank);
        out
    }
}
