//! Bounded sorted top-N array for one side of an aggregated book.
//!
//! Bids are kept strictly descending and asks strictly ascending. Only one price
//! changes per call, so insertion by single-step swaps is O(depth).

use ahash::AHashMap;

use crate::engine::types::{AggLevel, PriceTicks, Side};

/// Aggregate sums are kept in i64; a published level saturates at `i32::MAX`.
#[inline]
pub fn ladder_size(sum: i64) -> i32 {
    i32::try_from(sum).unwrap_or(if sum > 0 { i32::MAX } else { 0 })
}

#[derive(Debug, Clone)]
pub struct TopLevels {
    side: Side,
    depth: usize,
    levels: Vec<AggLevel>,
}

impl TopLevels {
    pub fn new(side: Side, depth: usize) -> Self {
        Self { side, depth, levels: Vec::with_capacity(depth) }
    }

    pub fn as_slice(&self) -> &[AggLevel] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn best(&self) -> Option<AggLevel> {
        self.levels.first().copied()
    }

    /// Reflect the new aggregate `sum` at `price`.
    ///
    /// `aggregate` must already hold the post-update state; it is consulted only to
    /// promote the next level when one falls out of the ladder.
    pub fn touch(&mut self, price: PriceTicks, sum: i64, aggregate: &AHashMap<PriceTicks, i64>) {
        if self.depth == 0 {
            return;
        }
        let idx = self.levels.iter().position(|l| l.price == price);

        if sum <= 0 {
            if let Some(idx) = idx {
                self.levels.remove(idx);
                self.backfill(aggregate);
            }
            return;
        }

        let level = AggLevel::new(price, ladder_size(sum));
        if let Some(idx) = idx {
            self.levels[idx] = level;
            self.reposition(idx);
            return;
        }

        if self.levels.len() < self.depth {
            self.levels.push(level);
            let last = self.levels.len() - 1;
            self.reposition(last);
            return;
        }

        // full: only a strictly better price displaces the worst slot
        let last = self.levels.len() - 1;
        if self.side.better(price, self.levels[last].price) {
            self.levels[last] = level;
            self.reposition(last);
        }
    }

    fn reposition(&mut self, mut idx: usize) {
        let side = self.side;
        while idx > 0 && side.better(self.levels[idx].price, self.levels[idx - 1].price) {
            self.levels.swap(idx, idx - 1);
            idx -= 1;
        }
        while idx + 1 < self.levels.len() && side.better(self.levels[idx + 1].price, self.levels[idx].price) {
            self.levels.swap(idx, idx + 1);
            idx += 1;
        }
    }

    // Promote the best aggregate level ranked behind the current worst slot.
    fn backfill(&mut self, aggregate: &AHashMap<PriceTicks, i64>) {
        if self.levels.len() >= self.depth || aggregate.len() <= self.levels.len() {
            return;
        }
        let side = self.side;
        let worst = self.levels.last().map(|l| l.price);
        let candidate = aggregate
            .iter()
            .filter(|(p, s)| **s > 0 && worst.map_or(true, |w| side.better(w, **p)))
            .fold(None::<(PriceTicks, i64)>, |best, (p, s)| match best {
                Some((bp, _)) if !side.better(*p, bp) => best,
                _ => Some((*p, *s)),
            });
        if let Some((price, size)) = candidate {
            self.levels.push(AggLevel::new(price, ladder_size(size)));
        }
    }

    /// Rebuild from scratch; used by tests and by invariant checks.
    pub fn from_aggregate(side: Side, depth: usize, aggregate: &AHashMap<PriceTicks, i64>) -> Vec<AggLevel> {
        let mut all: Vec<AggLevel> =
            aggregate.iter().filter(|(_, s)| **s > 0).map(|(p, s)| AggLevel::new(*p, ladder_size(*s))).collect();
        match side {
            Side::Bid => all.sort_unstable_by(|a, b| b.price.cmp(&a.price)),
            Side::Ask => all.sort_unstable_by(|a, b| a.price.cmp(&b.price)),
        }
        all.truncate(depth);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(top: &mut TopLevels, agg: &mut AHashMap<PriceTicks, i64>, price: PriceTicks, size: i64) {
        if size <= 0 {
            agg.remove(&price);
        } else {
            agg.insert(price, size);
        }
        top.touch(price, size, agg);
    }

    fn prices(top: &TopLevels) -> Vec<PriceTicks> {
        top.as_slice().iter().map(|l| l.price).collect()
    }

    #[test]
    fn bids_sorted_descending() {
        let mut agg = AHashMap::new();
        let mut top = TopLevels::new(Side::Bid, 3);
        for p in [99, 101, 100] {
            apply(&mut top, &mut agg, p, 1);
        }
        assert_eq!(prices(&top), vec![101, 100, 99]);
    }

    #[test]
    fn asks_sorted_ascending() {
        let mut agg = AHashMap::new();
        let mut top = TopLevels::new(Side::Ask, 3);
        for p in [103, 101, 102] {
            apply(&mut top, &mut agg, p, 1);
        }
        assert_eq!(prices(&top), vec![101, 102, 103]);
    }

    #[test]
    fn full_ladder_evicts_worst_only_for_better_price() {
        let mut agg = AHashMap::new();
        let mut top = TopLevels::new(Side::Bid, 2);
        apply(&mut top, &mut agg, 100, 1);
        apply(&mut top, &mut agg, 99, 1);
        // worse than the boundary: invisible at this depth
        apply(&mut top, &mut agg, 98, 1);
        assert_eq!(prices(&top), vec![100, 99]);
        // better than the boundary: evicts 99
        apply(&mut top, &mut agg, 101, 1);
        assert_eq!(prices(&top), vec![101, 100]);
        assert!(agg.contains_key(&98));
    }

    #[test]
    fn removal_promotes_next_level() {
        let mut agg = AHashMap::new();
        let mut top = TopLevels::new(Side::Ask, 2);
        for (p, s) in [(101, 5), (102, 6), (103, 7)] {
            apply(&mut top, &mut agg, p, s);
        }
        assert_eq!(prices(&top), vec![101, 102]);
        apply(&mut top, &mut agg, 101, 0);
        assert_eq!(top.as_slice(), &[AggLevel::new(102, 6), AggLevel::new(103, 7)]);
    }

    #[test]
    fn size_update_in_place() {
        let mut agg = AHashMap::new();
        let mut top = TopLevels::new(Side::Bid, 4);
        apply(&mut top, &mut agg, 100, 5);
        apply(&mut top, &mut agg, 100, 8);
        assert_eq!(top.as_slice(), &[AggLevel::new(100, 8)]);
        assert_eq!(top.best(), Some(AggLevel::new(100, 8)));
    }

    #[test]
    fn matches_full_rebuild() {
        let mut agg = AHashMap::new();
        let mut top = TopLevels::new(Side::Bid, 3);
        let script = [(100, 1), (105, 2), (103, 3), (101, 4), (105, 0), (99, 5), (103, 0), (106, 1)];
        for (p, s) in script {
            apply(&mut top, &mut agg, p, s);
            assert_eq!(top.as_slice(), TopLevels::from_aggregate(Side::Bid, 3, &agg).as_slice());
        }
    }

    #[test]
    fn zero_depth_stays_empty() {
        let mut agg = AHashMap::new();
        let mut top = TopLevels::new(Side::Bid, 0);
        apply(&mut top, &mut agg, 100, 5);
        apply(&mut top, &mut agg, 100, 0);
        assert!(top.is_empty());
        assert!(TopLevels::from_aggregate(Side::Bid, 0, &agg).is_empty());
    }

    #[test]
    fn oversized_sum_saturates_in_ladder_only() {
        let mut agg = AHashMap::new();
        let mut top = TopLevels::new(Side::Ask, 2);
        let big = i32::MAX as i64 + 10;
        apply(&mut top, &mut agg, 101, big);
        assert_eq!(top.as_slice(), &[AggLevel::new(101, i32::MAX)]);
        assert_eq!(agg[&101], big);
        assert_eq!(ladder_size(-3), 0);
    }
}
