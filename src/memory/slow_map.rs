use super::location::{Location, Token};
use super::location_index::LocationIndex;
use crate::hash::hash_string;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// A subject/predicate/object triple touched by an event.
///
/// The engine never interprets these ids; the caller extracts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub subject: u32,
    pub predicate: u32,
    pub object: u32,
}

impl Fact {
    pub fn new(subject: u32, predicate: u32, object: u32) -> Self {
        Self { subject, predicate, object }
    }
}

/// Distinct ids touched over a fixed window of steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub start_step: u64,
    pub end_step: u64,
    pub entities: BTreeSet<u32>,
    pub predicates: BTreeSet<u32>,
    pub objects: BTreeSet<u32>,
}

impl WindowSummary {
    pub fn new(start_step: u64) -> Self {
        Self {
            start_step,
            end_step: start_step,
            entities: BTreeSet::new(),
            predicates: BTreeSet::new(),
            objects: BTreeSet::new(),
        }
    }

    pub fn record(&mut self, step: u64, facts: &[Fact]) {
        self.end_step = self.end_step.max(step);
        for f in facts {
            self.entities.insert(f.subject);
            self.predicates.insert(f.predicate);
            self.objects.insert(f.object);
        }
    }

    /// Sorted, de-duplicated rendering; arrival order does not matter
    pub fn canonical(&self) -> String {
        fn join(ids: &BTreeSet<u32>) -> String {
            ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
        }
        format!(
            "{}-{}|e:{}|p:{}|o:{}",
            self.start_step,
            self.end_step,
            join(&self.entities),
            join(&self.predicates),
            join(&self.objects)
        )
    }

    pub fn token(&self, seed: u32) -> Token {
        hash_string(&self.canonical(), seed)
    }
}

/// Configuration for window summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowMapConfig {
    /// Steps per summary window
    pub window_size: u64,
    pub seed: u32,
    /// Keep a secondary index of summary tokens
    pub index_summaries: bool,
    pub max_locations_per_token: usize,
}

impl Default for SlowMapConfig {
    fn default() -> Self {
        Self {
            window_size: 8,
            seed: 0x5107_3a9d,
            index_summaries: true,
            max_locations_per_token: 64,
        }
    }
}

/// A closed window and the token it hashed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedWindow {
    pub summary: WindowSummary,
    pub token: Token,
}

/// Accumulates window summaries for a column's slow maps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowMapManager {
    config: SlowMapConfig,
    current: Option<WindowSummary>,
    steps_in_window: u64,
    index: Option<LocationIndex>,
    closed_windows: u64,
}

impl SlowMapManager {
    pub fn new(config: SlowMapConfig) -> Self {
        let index = config
            .index_summaries
            .then(|| LocationIndex::new(config.max_locations_per_token));
        Self {
            config,
            current: None,
            steps_in_window: 0,
            index,
            closed_windows: 0,
        }
    }

    pub fn config(&self) -> &SlowMapConfig { &self.config }
    pub fn index(&self) -> Option<&LocationIndex> { self.index.as_ref() }
    pub fn closed_windows(&self) -> u64 { self.closed_windows }
    pub fn current(&self) -> Option<&WindowSummary> { self.current.as_ref() }

    /// Records one step; returns the closed window when this step ends it
    pub fn observe(&mut self, step: u64, facts: &[Fact]) -> Option<ClosedWindow> {
        self.current
            .get_or_insert_with(|| WindowSummary::new(step))
            .record(step, facts);
        self.steps_in_window += 1;

        if self.steps_in_window < self.config.window_size {
            return None;
        }

        let summary = self.current.take()?;
        self.steps_in_window = 0;
        self.closed_windows += 1;
        let token = summary.token(self.config.seed);
        debug!(
            start = summary.start_step,
            end = summary.end_step,
            token,
            "closed slow map window"
        );
        Some(ClosedWindow { summary, token })
    }

    /// Indexes a summary token if a secondary index is attached
    pub fn index_summary(&mut self, token: Token, location: Location, step: u64) {
        if let Some(index) = self.index.as_mut() {
            index.update(token, location.x, location.y, step);
        }
    }

    /// Drops the open window; the secondary index is kept
    pub fn reset(&mut self) {
        self.current = None;
        self.steps_in_window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_is_order_independent() {
        let mut a = WindowSummary::new(0);
        a.record(0, &[Fact::new(1, 2, 3)]);
        a.record(1, &[Fact::new(4, 5, 6), Fact::new(1, 2, 3)]);

        let mut b = WindowSummary::new(0);
        b.record(1, &[Fact::new(4, 5, 6)]);
        b.record(0, &[Fact::new(1, 2, 3)]);

        assert_eq!(a.canonical(), "0-1|e:1,4|p:2,5|o:3,6");
        assert_eq!(a.token(9), b.token(9));
    }

    #[test]
    fn test_window_closes_after_size_steps() {
        let mut manager = SlowMapManager::new(SlowMapConfig { window_size: 3, ..Default::default() });
        assert!(manager.observe(0, &[Fact::new(1, 1, 1)]).is_none());
        assert!(manager.observe(1, &[]).is_none());
        let closed = manager.observe(2, &[Fact::new(2, 2, 2)]).unwrap();
        assert_eq!(closed.summary.start_step, 0);
        assert_eq!(closed.summary.end_step, 2);
        assert_eq!(closed.token, closed.summary.token(manager.config().seed));
        assert!(manager.current().is_none());

        assert!(manager.observe(3, &[]).is_none());
        assert_eq!(manager.current().unwrap().start_step, 3);
    }

    #[test]
    fn test_summary_index() {
        let mut manager = SlowMapManager::new(SlowMapConfig::default());
        manager.index_summary(77, Location::new(4, 5), 10);
        let c = manager.index().unwrap().get_candidates(77, 4);
        assert_eq!(c[0].location(), Location::new(4, 5));
    }
}
