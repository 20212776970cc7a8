//! Sorted set: a member -> score map paired with a [`SkipList`].
//!
//! The map answers "what is this member's score" in O(1); the skip list
//! answers every ordered question. Both always hold the same members.
//!
//! Ranks in this API are 0-based, as clients see them.

use crate::storage::skiplist::{Border, Element, SkipList};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SortedSet {
    scores: HashMap<String, f64>,
    skiplist: SkipList,
}

impl Clone for SortedSet {
    fn clone(&self) -> Self {
        let mut copy = SortedSet::new();
        for e in self.skiplist.iter_from_rank(1) {
            copy.add(e.member.clone(), e.score);
        }
        copy
    }
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Adds a member or updates its score.
    ///
    /// # Returns
    ///
    /// `true` if the member is new.
    pub fn add(&mut self, member: String, score: f64) -> bool {
        match self.scores.get(&member) {
            Some(&old) => {
                if old != score {
                    self.skiplist.remove(&member, old);
                    self.skiplist.insert(member.clone(), score);
                    self.scores.insert(member, score);
                }
                false
            }
            None => {
                self.skiplist.insert(member.clone(), score);
                self.scores.insert(member, score);
                true
            }
        }
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Removes a member; returns whether it was present.
    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.skiplist.remove(member, score);
                true
            }
            None => false,
        }
    }

    /// 0-based rank of a member, counting from the highest score when `desc`.
    pub fn rank(&self, member: &str, desc: bool) -> Option<usize> {
        let score = self.score(member)?;
        let rank = self.skiplist.rank(member, score);
        if rank == 0 {
            return None;
        }
        Some(if desc { self.len() - rank } else { rank - 1 })
    }

    /// Elements with 0-based rank in `[start, stop]` (already clamped by the
    /// caller to valid indexes).
    pub fn range_by_rank(&self, start: usize, stop: usize, desc: bool) -> Vec<Element> {
        if start > stop || start >= self.len() {
            return Vec::new();
        }
        let count = stop - start + 1;
        let iter = if desc {
            self.skiplist.iter_rev_from_rank(self.len() - start)
        } else {
            self.skiplist.iter_from_rank(start + 1)
        };
        iter.take(count).cloned().collect()
    }

    /// Elements with a score in `[min, max]`, after skipping `offset` of
    /// them and returning at most `limit` (`None` means no limit).
    pub fn range_by_score(
        &self,
        min: &Border,
        max: &Border,
        offset: usize,
        limit: Option<usize>,
        desc: bool,
    ) -> Vec<Element> {
        self.skiplist
            .iter_range(min, max, desc)
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Number of members with a score in `[min, max]`.
    pub fn count(&self, min: &Border, max: &Border) -> usize {
        let first = match self.skiplist.first_in_range(min, max) {
            Some(e) => self.skiplist.rank(&e.member, e.score),
            None => return 0,
        };
        let last = match self.skiplist.last_in_range(min, max) {
            Some(e) => self.skiplist.rank(&e.member, e.score),
            None => return 0,
        };
        last - first + 1
    }

    /// Removes members with a score in `[min, max]`; returns how many.
    pub fn remove_range_by_score(&mut self, min: &Border, max: &Border) -> usize {
        let removed = self.skiplist.remove_range(min, max, 0);
        for e in &removed {
            self.scores.remove(&e.member);
        }
        removed.len()
    }

    /// Removes members with 0-based rank in `[start, stop]`; returns how many.
    pub fn remove_range_by_rank(&mut self, start: usize, stop: usize) -> usize {
        if start > stop || start >= self.len() {
            return 0;
        }
        let removed = self.skiplist.remove_range_by_rank(start + 1, stop + 2);
        for e in &removed {
            self.scores.remove(&e.member);
        }
        removed.len()
    }

    /// All elements in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.skiplist.iter_from_rank(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SortedSet {
        let mut set = SortedSet::new();
        set.add("a".into(), 1.0);
        set.add("b".into(), 2.0);
        set.add("c".into(), 3.0);
        set.add("d".into(), 4.0);
        set
    }

    fn members(elements: &[Element]) -> Vec<&str> {
        elements.iter().map(|e| e.member.as_str()).collect()
    }

    #[test]
    fn test_add_and_update() {
        let mut set = sample();
        assert!(!set.add("a".into(), 10.0));
        assert_eq!(set.score("a"), Some(10.0));
        assert_eq!(set.len(), 4);
        assert_eq!(set.rank("a", false), Some(3));
        assert_eq!(set.rank("a", true), Some(0));
    }

    #[test]
    fn test_remove() {
        let mut set = sample();
        assert!(set.remove("b"));
        assert!(!set.remove("b"));
        assert_eq!(set.rank("c", false), Some(1));
        assert_eq!(set.rank("b", false), None);
    }

    #[test]
    fn test_range_by_rank() {
        let set = sample();
        assert_eq!(members(&set.range_by_rank(1, 2, false)), vec!["b", "c"]);
        assert_eq!(members(&set.range_by_rank(0, 1, true)), vec!["d", "c"]);
        assert_eq!(members(&set.range_by_rank(0, 3, false)).len(), 4);
        assert!(set.range_by_rank(4, 5, false).is_empty());
    }

    #[test]
    fn test_range_by_score() {
        let set = sample();
        let (min, max) = (Border::exclusive(1.0), Border::inclusive(3.0));
        assert_eq!(
            members(&set.range_by_score(&min, &max, 0, None, false)),
            vec!["b", "c"]
        );
        assert_eq!(
            members(&set.range_by_score(&min, &max, 0, None, true)),
            vec!["c", "b"]
        );
        assert_eq!(
            members(&set.range_by_score(&Border::NegInf, &Border::PosInf, 1, Some(2), false)),
            vec!["b", "c"]
        );
    }

    #[test]
    fn test_count() {
        let set = sample();
        assert_eq!(set.count(&Border::NegInf, &Border::PosInf), 4);
        assert_eq!(set.count(&Border::inclusive(2.0), &Border::exclusive(4.0)), 2);
        assert_eq!(set.count(&Border::inclusive(5.0), &Border::PosInf), 0);
    }

    #[test]
    fn test_remove_ranges() {
        let mut set = sample();
        assert_eq!(
            set.remove_range_by_score(&Border::inclusive(2.0), &Border::inclusive(3.0)),
            2
        );
        assert_eq!(set.score("b"), None);
        assert_eq!(set.len(), 2);

        let mut set = sample();
        assert_eq!(set.remove_range_by_rank(0, 1), 2);
        assert_eq!(members(&set.iter().cloned().collect::<Vec<_>>()), vec!["c", "d"]);
        assert_eq!(set.score("a"), None);
    }

    #[test]
    fn test_clone_is_independent() {
        let set = sample();
        let mut copy = set.clone();
        copy.remove("a");
        assert_eq!(set.len(), 4);
        assert_eq!(copy.len(), 3);
    }
}
