use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoteError {
    #[error("Aggregation round incomplete: {received} of {expected} columns reported")]
    Incomplete { expected: usize, received: usize },
    #[error("Column {column} is outside the {columns}-column round")]
    UnknownColumn { column: usize, columns: usize },
}

/// A weighted prediction from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction<T> {
    pub value: T,
    pub weight: f64,
}

impl<T> Prediction<T> {
    pub fn new(value: T) -> Self {
        Self { value, weight: 1.0 }
    }

    pub fn weighted(value: T, weight: f64) -> Self {
        Self { value, weight }
    }
}

/// Result of a plurality vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteOutcome<T> {
    pub winner: Option<T>,
    pub winner_weight: f64,
    pub total_weight: f64,
}

impl<T> VoteOutcome<T> {
    /// Winner weight over total weight, 0 with no predictions
    pub fn confidence(&self) -> f64 {
        if self.total_weight > 0.0 {
            self.winner_weight / self.total_weight
        } else {
            0.0
        }
    }
}

/// Weighted plurality vote; ties go to the value seen first
#[derive(Debug, Clone)]
pub struct Voter<T> {
    tallies: Vec<(T, f64)>,
    total: f64,
}

impl<T: PartialEq + Clone> Default for Voter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq + Clone> Voter<T> {
    pub fn new() -> Self {
        Self { tallies: Vec::new(), total: 0.0 }
    }

    pub fn add(&mut self, prediction: Prediction<T>) {
        self.total += prediction.weight;
        match self.tallies.iter_mut().find(|(v, _)| *v == prediction.value) {
            Some((_, w)) => *w += prediction.weight,
            None => self.tallies.push((prediction.value, prediction.weight)),
        }
    }

    pub fn vote(predictions: impl IntoIterator<Item = Prediction<T>>) -> VoteOutcome<T> {
        let mut voter = Self::new();
        predictions.into_iter().for_each(|p| voter.add(p));
        voter.outcome()
    }

    pub fn outcome(&self) -> VoteOutcome<T> {
        let mut best: Option<&(T, f64)> = None;
        for entry in &self.tallies {
            if best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        VoteOutcome {
            winner: best.map(|(v, _)| v.clone()),
            winner_weight: best.map_or(0.0, |(_, w)| *w),
            total_weight: self.total,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.outcome().confidence()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Slot<T> {
    Pending,
    Abstained,
    Voted(Prediction<T>),
}

/// Fan-in barrier: one slot per column, resolved only once every column has
/// voted or abstained
#[derive(Debug, Clone)]
pub struct Aggregator<T> {
    slots: Vec<Slot<T>>,
}

impl<T: PartialEq + Clone> Aggregator<T> {
    pub fn new(columns: usize) -> Self {
        Self { slots: vec![Slot::Pending; columns] }
    }

    fn slot(&mut self, column: usize) -> Result<&mut Slot<T>, VoteError> {
        let columns = self.slots.len();
        self.slots
            .get_mut(column)
            .ok_or(VoteError::UnknownColumn { column, columns })
    }

    /// Records a column's prediction, replacing any earlier one this round
    pub fn submit(&mut self, column: usize, prediction: Prediction<T>) -> Result<(), VoteError> {
        *self.slot(column)? = Slot::Voted(prediction);
        Ok(())
    }

    /// Marks a column as having nothing to predict this round
    pub fn abstain(&mut self, column: usize) -> Result<(), VoteError> {
        *self.slot(column)? = Slot::Abstained;
        Ok(())
    }

    pub fn received(&self) -> usize {
        self.slots.iter().filter(|s| !matches!(s, Slot::Pending)).count()
    }

    pub fn is_complete(&self) -> bool {
        self.received() == self.slots.len()
    }

    /// Votes once every column has reported
    pub fn resolve(&self) -> Result<VoteOutcome<T>, VoteError> {
        if !self.is_complete() {
            return Err(VoteError::Incomplete {
                expected: self.slots.len(),
                received: self.received(),
            });
        }
        Ok(Voter::vote(self.slots.iter().filter_map(|s| match s {
            Slot::Voted(p) => Some(p.clone()),
            _ => None,
        })))
    }

    /// Clears all slots for the next round
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = Slot::Pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_plurality() {
        let outcome = Voter::vote(vec![
            Prediction::weighted("A", 1.0),
            Prediction::weighted("B", 3.0),
            Prediction::weighted("A", 2.0),
        ]);
        assert_eq!(outcome.winner, Some("A"));
        assert_eq!(outcome.winner_weight, 3.0);
        assert_eq!(outcome.confidence(), 3.0 / 6.0);
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let outcome = Voter::vote(vec![Prediction::new(2u32), Prediction::new(1u32)]);
        assert_eq!(outcome.winner, Some(2));
        assert_eq!(outcome.confidence(), 0.5);
    }

    #[test]
    fn test_no_predictions() {
        let outcome = Voter::<u32>::vote(Vec::new());
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.confidence(), 0.0);
    }

    #[test]
    fn test_aggregator_waits_for_all_columns() {
        let mut agg = Aggregator::new(3);
        agg.submit(0, Prediction::new(7u32)).unwrap();
        agg.submit(2, Prediction::new(7u32)).unwrap();
        assert_eq!(
            agg.resolve(),
            Err(VoteError::Incomplete { expected: 3, received: 2 })
        );
        assert!(agg.submit(5, Prediction::new(1u32)).is_err());

        agg.submit(1, Prediction::new(9u32)).unwrap();
        let outcome = agg.resolve().unwrap();
        assert_eq!(outcome.winner, Some(7));
        assert!((outcome.confidence() - 2.0 / 3.0).abs() < 1e-12);

        agg.reset();
        assert_eq!(agg.received(), 0);
    }

    #[test]
    fn test_abstaining_columns_complete_the_round() {
        let mut agg = Aggregator::new(2);
        agg.abstain(0).unwrap();
        agg.submit(1, Prediction::weighted(4u32, 0.5)).unwrap();
        let outcome = agg.resolve().unwrap();
        assert_eq!(outcome.winner, Some(4));
        assert_eq!(outcome.confidence(), 1.0);
    }
}
