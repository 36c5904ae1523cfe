use super::location::Token;
use serde::{Deserialize, Serialize};

/// Bounded frequency counter stored in one grid square.
///
/// This is a greedy approximate heavy-hitters sketch: after every update the
/// lightest entry is dropped if more than `k` tokens are tracked. It does not
/// guarantee the exact top-k under adversarial orderings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeavyHitters {
    k: usize,
    // insertion order; ties on eviction go to the earliest minimum
    counts: Vec<(Token, f32)>,
}

impl HeavyHitters {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            counts: Vec::with_capacity(k + 1),
        }
    }

    // Getters
    pub fn capacity(&self) -> usize { self.k }
    pub fn len(&self) -> usize { self.counts.len() }
    pub fn is_empty(&self) -> bool { self.counts.is_empty() }
    pub fn is_full(&self) -> bool { self.counts.len() >= self.k }

    /// Current weight for a token, if it is tracked
    pub fn get(&self, token: Token) -> Option<f32> {
        self.counts
            .iter()
            .find(|(t, _)| *t == token)
            .map(|&(_, w)| w)
    }

    /// Adds `weight` to the token's running total, then evicts down to `k`
    pub fn update(&mut self, token: Token, weight: f32) {
        match self.counts.iter_mut().find(|(t, _)| *t == token) {
            Some((_, w)) => *w += weight,
            None => self.counts.push((token, weight)),
        }
        self.evict();
    }

    /// Up to `n` entries, heaviest first
    pub fn top_k(&self, n: usize) -> Vec<(Token, f32)> {
        let mut sorted = self.counts.clone();
        // stable sort keeps insertion order among equal weights
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        sorted.truncate(n);
        sorted
    }

    /// Adds another cell's counts into this one, then evicts down to `k`
    pub fn merge(&mut self, other: &HeavyHitters) {
        for &(token, weight) in &other.counts {
            match self.counts.iter_mut().find(|(t, _)| *t == token) {
                Some((_, w)) => *w += weight,
                None => self.counts.push((token, weight)),
            }
        }
        self.evict();
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    fn evict(&mut self) {
        while self.counts.len() > self.k {
            let mut min_idx = 0;
            for (i, (_, w)) in self.counts.iter().enumerate().skip(1) {
                if *w < self.counts[min_idx].1 {
                    min_idx = i;
                }
            }
            self.counts.remove(min_idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_accumulates() {
        let mut cell = HeavyHitters::new(4);
        cell.update(7, 1.0);
        cell.update(7, 2.0);
        cell.update(9, 1.0);
        assert_eq!(cell.get(7), Some(3.0));
        assert_eq!(cell.len(), 2);
        assert_eq!(cell.top_k(1), vec![(7, 3.0)]);
    }

    #[test]
    fn test_size_never_exceeds_k() {
        let mut cell = HeavyHitters::new(3);
        for token in 0..50u32 {
            cell.update(token % 11, 1.0 + (token % 3) as f32);
            assert!(cell.len() <= 3);
            assert!(cell.top_k(usize::MAX).len() <= 3);
        }
    }

    #[test]
    fn test_eviction_drops_lightest() {
        let mut cell = HeavyHitters::new(2);
        cell.update(1, 5.0);
        cell.update(2, 3.0);
        cell.update(3, 4.0);
        let top = cell.top_k(10);
        assert_eq!(top, vec![(1, 5.0), (3, 4.0)]);
    }

    #[test]
    fn test_merge_respects_capacity() {
        let mut a = HeavyHitters::new(2);
        a.update(1, 2.0);
        a.update(2, 1.0);

        let mut b = HeavyHitters::new(2);
        b.update(2, 5.0);
        b.update(3, 4.0);

        a.merge(&b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.top_k(2), vec![(2, 6.0), (3, 4.0)]);
    }

    #[test]
    fn test_empty_cell_reads_nothing() {
        let cell = HeavyHitters::new(4);
        assert!(cell.top_k(5).is_empty());
        assert_eq!(cell.get(1), None);
    }
}
