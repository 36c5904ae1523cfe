//! Turns a noisy window of recent tokens into ranked location candidates.
//!
//! The search anchors on the token with the shortest candidate list and only
//! ever considers the anchor's locations, so cost is bounded by that list.
//! A location the anchor never saw cannot be found; recall is traded for
//! speed.

use super::location::{Location, Token};
use super::location_index::LocationIndex;
use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A localization request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizeQuery {
    /// Recent step tokens, oldest first
    pub window: Vec<Token>,
    pub candidates_per_token: usize,
    pub min_matches_ratio: f64,
    pub top_k: usize,
}

impl Default for LocalizeQuery {
    fn default() -> Self {
        Self {
            window: Vec::new(),
            candidates_per_token: 32,
            min_matches_ratio: 0.6,
            top_k: 5,
        }
    }
}

impl LocalizeQuery {
    pub fn new(window: Vec<Token>) -> Self {
        Self { window, ..Default::default() }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if !(0.0..=1.0).contains(&self.min_matches_ratio) {
            return Err(QueryError::InvalidRatio(self.min_matches_ratio));
        }
        if self.candidates_per_token == 0 {
            return Err(QueryError::ZeroLimit("candidates_per_token"));
        }
        if self.top_k == 0 {
            return Err(QueryError::ZeroLimit("top_k"));
        }
        Ok(())
    }

    /// `ceil(window_len * min_matches_ratio)`
    fn required_matches(&self) -> u32 {
        (self.window.len() as f64 * self.min_matches_ratio).ceil() as u32
    }
}

/// A ranked location match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCandidate {
    pub loc_key: u32,
    pub location: Location,
    pub matches: u32,
    /// `matches / window_len`
    pub score: f64,
    pub last_seen_max: u64,
    /// Column that produced the candidate, when searching several
    pub column: Option<usize>,
}

/// last_seen_max desc, score desc, loc_key asc
fn rank(a: &LocationCandidate, b: &LocationCandidate) -> Ordering {
    b.last_seen_max
        .cmp(&a.last_seen_max)
        .then(b.score.total_cmp(&a.score))
        .then(a.loc_key.cmp(&b.loc_key))
        .then(a.column.cmp(&b.column))
}

struct Tally {
    matches: u32,
    last_seen_max: u64,
}

/// Localizes a window against a single column's index
pub fn localize(index: &LocationIndex, query: &LocalizeQuery) -> Result<Vec<LocationCandidate>, QueryError> {
    query.validate()?;
    let Some(&last_token) = query.window.last() else {
        return Ok(Vec::new());
    };

    let lists: Vec<_> = query
        .window
        .iter()
        .map(|&t| index.get_candidates(t, query.candidates_per_token))
        .collect();

    let anchor = lists
        .iter()
        .enumerate()
        .min_by_key(|(_, l)| l.len())
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut tallies: HashMap<u32, Tally> = lists[anchor]
        .iter()
        .map(|c| {
            (c.loc_key, Tally { matches: 1, last_seen_max: c.last_seen })
        })
        .collect();

    for (i, list) in lists.iter().enumerate() {
        if i == anchor {
            continue;
        }
        for c in list {
            if let Some(t) = tallies.get_mut(&c.loc_key) {
                t.matches += 1;
                t.last_seen_max = t.last_seen_max.max(c.last_seen);
            }
        }
    }

    let required = query.required_matches();
    tallies.retain(|_, t| t.matches >= required);

    // the newest token's own locations always survive as a fallback
    let fallback = index.get_candidates(last_token, query.candidates_per_token);
    for c in fallback {
        tallies
            .entry(c.loc_key)
            .or_insert(Tally { matches: 1, last_seen_max: c.last_seen });
    }

    let window_len = query.window.len() as f64;
    let mut out: Vec<LocationCandidate> = tallies
        .into_iter()
        .map(|(loc_key, t)| LocationCandidate {
            loc_key,
            location: Location::from_key(loc_key),
            matches: t.matches,
            score: t.matches as f64 / window_len,
            last_seen_max: t.last_seen_max,
            column: None,
        })
        .collect();
    out.sort_by(rank);
    out.truncate(query.top_k);
    Ok(out)
}

/// Localizes against every column, tags results with their column, and
/// re-ranks the concatenation
pub fn localize_columns<'a>(
    indexes: impl IntoIterator<Item = &'a LocationIndex>,
    query: &LocalizeQuery,
) -> Result<Vec<LocationCandidate>, QueryError> {
    let mut all = Vec::new();
    for (column, index) in indexes.into_iter().enumerate() {
        for mut c in localize(index, query)? {
            c.column = Some(column);
            all.push(c);
        }
    }
    all.sort_by(rank);
    all.truncate(query.top_k);
    Ok(all)
}
