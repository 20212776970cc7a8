//! Skip List Ordered Index
//!
//! The ordered half of a sorted set. Elements are kept sorted by
//! `(score, member)` ascending, and every forward link records its *span*
//! (how many level-0 steps it jumps over), which makes rank lookups
//! O(log n) as well.
//!
//! ## Layout
//!
//! Nodes live in an arena (`Vec<Node>`) and point at each other by index.
//! Index 0 is the header; it carries no element and always has
//! [`MAX_LEVEL`] levels. Removed slots go onto a free list and are reused
//! by later inserts.
//!
//! ```text
//! level 2: [H] ───────────────3──────────────> [c] ──────1──────> nil
//! level 1: [H] ───1───> [a] ──────2──────────> [c] ──────1──────> nil
//! level 0: [H] ─1─> [a] ─1─> [b] ─1─> [c] ─1─> [d] ──> nil
//!                    ◄──────  ◄──────  ◄──────  ◄──── backward links
//! ```
//!
//! The span of a link that points at nil is the number of nodes after its
//! owner, so `rank(owner) + span == len` holds at every level.

use rand::Rng;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum number of levels a node can have.
pub const MAX_LEVEL: usize = 16;

const HEAD: usize = 0;

/// A member with its score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub member: String,
    pub score: f64,
}

impl Element {
    /// Whether this element sorts strictly before `(score, member)`.
    #[inline]
    fn precedes(&self, score: f64, member: &str) -> bool {
        self.score < score || (self.score == score && self.member.as_str() < member)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Level {
    forward: Option<usize>,
    span: usize,
}

#[derive(Debug)]
struct Node {
    element: Element,
    backward: Option<usize>,
    levels: Vec<Level>,
}

impl Node {
    fn new(level: usize, element: Element) -> Self {
        Self {
            element,
            backward: None,
            levels: vec![Level::default(); level],
        }
    }
}

/// One end of a score range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Border {
    NegInf,
    PosInf,
    Score { value: f64, exclusive: bool },
}

/// Returned when a score bound cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("min or max is not a float")]
pub struct InvalidBorder;

impl Border {
    pub fn inclusive(value: f64) -> Self {
        Border::Score {
            value,
            exclusive: false,
        }
    }

    pub fn exclusive(value: f64) -> Self {
        Border::Score {
            value,
            exclusive: true,
        }
    }

    /// As a lower bound: does `score` lie at or above this border?
    pub fn is_below(&self, score: f64) -> bool {
        match *self {
            Border::NegInf => true,
            Border::PosInf => false,
            Border::Score { value, exclusive } => {
                if exclusive {
                    value < score
                } else {
                    value <= score
                }
            }
        }
    }

    /// As an upper bound: does `score` lie at or below this border?
    pub fn is_above(&self, score: f64) -> bool {
        match *self {
            Border::NegInf => false,
            Border::PosInf => true,
            Border::Score { value, exclusive } => {
                if exclusive {
                    value > score
                } else {
                    value >= score
                }
            }
        }
    }

    /// True when no score can satisfy `min <= score <= max`.
    pub fn is_empty_range(min: &Border, max: &Border) -> bool {
        match (min, max) {
            (Border::PosInf, _) | (_, Border::NegInf) => true,
            (Border::NegInf, _) | (_, Border::PosInf) => false,
            (
                Border::Score {
                    value: lo,
                    exclusive: lo_ex,
                },
                Border::Score {
                    value: hi,
                    exclusive: hi_ex,
                },
            ) => lo > hi || (lo == hi && (*lo_ex || *hi_ex)),
        }
    }
}

impl FromStr for Border {
    type Err = InvalidBorder;

    /// Accepts `1.5`, `(1.5` (exclusive), `-inf`, `+inf` and `inf`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "-inf" => return Ok(Border::NegInf),
            "+inf" | "inf" => return Ok(Border::PosInf),
            _ => {}
        }

        let (text, exclusive) = match s.strip_prefix('(') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let value: f64 = text.parse().map_err(|_| InvalidBorder)?;
        if value.is_nan() {
            return Err(InvalidBorder);
        }
        Ok(Border::Score { value, exclusive })
    }
}

impl fmt::Display for Border {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Border::NegInf => write!(f, "-inf"),
            Border::PosInf => write!(f, "+inf"),
            Border::Score {
                value,
                exclusive: true,
            } => write!(f, "({}", value),
            Border::Score { value, .. } => write!(f, "{}", value),
        }
    }
}

/// Draws a node level: level `k` is chosen with probability 2^-k.
fn random_level() -> usize {
    let mut rng = rand::thread_rng();
    let mut level = 1;
    while level < MAX_LEVEL && rng.gen_bool(0.5) {
        level += 1;
    }
    level
}

/// An arena-backed skip list ordered by `(score, member)`.
///
/// Ranks are 1-based; 0 means "not present".
#[derive(Debug)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<usize>,
    tail: Option<usize>,
    length: usize,
    level: usize,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(MAX_LEVEL, Element::default())],
            free: Vec::new(),
            tail: None,
            length: 0,
            level: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    fn forward(&self, idx: usize, level: usize) -> Option<usize> {
        self.nodes[idx].levels[level].forward
    }

    #[inline]
    fn span(&self, idx: usize, level: usize) -> usize {
        self.nodes[idx].levels[level].span
    }

    #[inline]
    fn score(&self, idx: usize) -> f64 {
        self.nodes[idx].element.score
    }

    fn alloc(&mut self, level: usize, element: Element) -> usize {
        let node = Node::new(level, element);
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> Element {
        let node = &mut self.nodes[idx];
        node.levels.clear();
        node.backward = None;
        self.free.push(idx);
        std::mem::take(&mut node.element)
    }

    /// Inserts an element. The caller guarantees `member` is not already present.
    pub fn insert(&mut self, member: String, score: f64) {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.forward(x, i) {
                if !self.nodes[next].element.precedes(score, &member) {
                    break;
                }
                rank[i] += self.span(x, i);
                x = next;
            }
            update[i] = x;
        }

        let level = random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = HEAD;
                self.nodes[HEAD].levels[i].span = self.length;
            }
            self.level = level;
        }

        let idx = self.alloc(level, Element { member, score });
        for i in 0..level {
            let prev = self.nodes[update[i]].levels[i];
            let crossed = rank[0] - rank[i];
            self.nodes[idx].levels[i] = Level {
                forward: prev.forward,
                span: prev.span - crossed,
            };
            self.nodes[update[i]].levels[i] = Level {
                forward: Some(idx),
                span: crossed + 1,
            };
        }

        for i in level..self.level {
            self.nodes[update[i]].levels[i].span += 1;
        }

        self.nodes[idx].backward = (update[0] != HEAD).then_some(update[0]);
        match self.forward(idx, 0) {
            Some(next) => self.nodes[next].backward = Some(idx),
            None => self.tail = Some(idx),
        }
        self.length += 1;
    }

    /// Unlinks `idx`; `update[i]` is its predecessor (or the last node
    /// before it) at level `i`.
    fn remove_node(&mut self, idx: usize, update: &[usize; MAX_LEVEL]) {
        for (i, &prev) in update.iter().enumerate().take(self.level) {
            if self.forward(prev, i) == Some(idx) {
                let removed = self.nodes[idx].levels[i];
                let link = &mut self.nodes[prev].levels[i];
                link.span = link.span + removed.span - 1;
                link.forward = removed.forward;
            } else {
                self.nodes[prev].levels[i].span -= 1;
            }
        }

        let backward = self.nodes[idx].backward;
        match self.forward(idx, 0) {
            Some(next) => self.nodes[next].backward = backward,
            None => self.tail = backward,
        }

        while self.level > 1 && self.forward(HEAD, self.level - 1).is_none() {
            self.level -= 1;
        }
        self.length -= 1;
    }

    /// Removes the element; returns whether it was present.
    pub fn remove(&mut self, member: &str, score: f64) -> bool {
        let mut update = [HEAD; MAX_LEVEL];
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.forward(x, i) {
                if !self.nodes[next].element.precedes(score, member) {
                    break;
                }
                x = next;
            }
            update[i] = x;
        }

        match self.forward(x, 0) {
            Some(target)
                if self.nodes[target].element.score == score
                    && self.nodes[target].element.member == member =>
            {
                self.remove_node(target, &update);
                self.release(target);
                true
            }
            _ => false,
        }
    }

    /// 1-based rank of the element, or 0 if it is not in the list.
    pub fn rank(&self, member: &str, score: f64) -> usize {
        let mut rank = 0;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.forward(x, i) {
                let e = &self.nodes[next].element;
                if e.score < score || (e.score == score && e.member.as_str() <= member) {
                    rank += self.span(x, i);
                    x = next;
                } else {
                    break;
                }
            }

            if x != HEAD && self.nodes[x].element.member == member {
                return rank;
            }
        }
        0
    }

    fn node_at_rank(&self, rank: usize) -> Option<usize> {
        let mut traversed = 0;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.forward(x, i) {
                if traversed + self.span(x, i) > rank {
                    break;
                }
                traversed += self.span(x, i);
                x = next;
            }
            if traversed == rank {
                return (x != HEAD).then_some(x);
            }
        }
        None
    }

    /// The element at 1-based `rank`.
    pub fn get_by_rank(&self, rank: usize) -> Option<&Element> {
        self.node_at_rank(rank).map(|idx| &self.nodes[idx].element)
    }

    /// Whether any element's score lies within `[min, max]`.
    pub fn has_in_range(&self, min: &Border, max: &Border) -> bool {
        if Border::is_empty_range(min, max) {
            return false;
        }
        match self.tail {
            Some(tail) if min.is_below(self.score(tail)) => {}
            _ => return false,
        }
        match self.forward(HEAD, 0) {
            Some(first) => max.is_above(self.score(first)),
            None => false,
        }
    }

    fn first_in_range_idx(&self, min: &Border, max: &Border) -> Option<usize> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.forward(x, i) {
                if min.is_below(self.score(next)) {
                    break;
                }
                x = next;
            }
        }
        let first = self.forward(x, 0)?;
        max.is_above(self.score(first)).then_some(first)
    }

    fn last_in_range_idx(&self, min: &Border, max: &Border) -> Option<usize> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.forward(x, i) {
                if !max.is_above(self.score(next)) {
                    break;
                }
                x = next;
            }
        }
        (x != HEAD && min.is_below(self.score(x))).then_some(x)
    }

    /// Lowest element with a score in `[min, max]`.
    pub fn first_in_range(&self, min: &Border, max: &Border) -> Option<&Element> {
        self.first_in_range_idx(min, max)
            .map(|idx| &self.nodes[idx].element)
    }

    /// Highest element with a score in `[min, max]`.
    pub fn last_in_range(&self, min: &Border, max: &Border) -> Option<&Element> {
        self.last_in_range_idx(min, max)
            .map(|idx| &self.nodes[idx].element)
    }

    /// Iterates from the 1-based `rank` towards the tail.
    pub fn iter_from_rank(&self, rank: usize) -> Iter<'_> {
        Iter {
            list: self,
            next: self.node_at_rank(rank),
            reverse: false,
        }
    }

    /// Iterates from the 1-based `rank` towards the head.
    pub fn iter_rev_from_rank(&self, rank: usize) -> Iter<'_> {
        Iter {
            list: self,
            next: self.node_at_rank(rank),
            reverse: true,
        }
    }

    /// Elements with a score in `[min, max]`, ascending or descending.
    pub fn iter_range<'a>(
        &'a self,
        min: &'a Border,
        max: &'a Border,
        reverse: bool,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        let start = if reverse {
            self.last_in_range_idx(min, max)
        } else {
            self.first_in_range_idx(min, max)
        };
        Iter {
            list: self,
            next: start,
            reverse,
        }
        .take_while(move |e| min.is_below(e.score) && max.is_above(e.score))
    }

    /// Removes up to `limit` elements with scores in `[min, max]`
    /// (`limit == 0` removes all of them), returned in ascending order.
    pub fn remove_range(&mut self, min: &Border, max: &Border, limit: usize) -> Vec<Element> {
        let mut removed = Vec::new();
        let mut update = [HEAD; MAX_LEVEL];

        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.forward(x, i) {
                if min.is_below(self.score(next)) {
                    break;
                }
                x = next;
            }
            update[i] = x;
        }

        let mut cursor = self.forward(x, 0);
        while let Some(idx) = cursor {
            if !max.is_above(self.score(idx)) {
                break;
            }
            let next = self.forward(idx, 0);
            self.remove_node(idx, &update);
            removed.push(self.release(idx));
            if limit > 0 && removed.len() == limit {
                break;
            }
            cursor = next;
        }
        removed
    }

    /// Removes elements with 1-based rank in `[start, stop)`.
    pub fn remove_range_by_rank(&mut self, start: usize, stop: usize) -> Vec<Element> {
        let mut removed = Vec::new();
        let mut update = [HEAD; MAX_LEVEL];

        let mut traversed = 0;
        let mut x = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.forward(x, i) {
                if traversed + self.span(x, i) >= start {
                    break;
                }
                traversed += self.span(x, i);
                x = next;
            }
            update[i] = x;
        }

        traversed += 1;
        let mut cursor = self.forward(x, 0);
        while let Some(idx) = cursor {
            if traversed >= stop {
                break;
            }
            let next = self.forward(idx, 0);
            self.remove_node(idx, &update);
            removed.push(self.release(idx));
            cursor = next;
            traversed += 1;
        }
        removed
    }
}

/// Walks level 0 in either direction.
pub struct Iter<'a> {
    list: &'a SkipList,
    next: Option<usize>,
    reverse: bool,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let node = &self.list.nodes[idx];
        self.next = if self.reverse {
            node.backward
        } else {
            node.levels[0].forward
        };
        Some(&node.element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(n: usize) -> SkipList {
        let mut list = SkipList::new();
        // Insert out of order to exercise the search path.
        for i in (0..n).rev() {
            list.insert(format!("m{:03}", i), i as f64);
        }
        list
    }

    fn members(elements: &[Element]) -> Vec<&str> {
        elements.iter().map(|e| e.member.as_str()).collect()
    }

    #[test]
    fn test_insert_keeps_order() {
        let list = list_of(50);
        assert_eq!(list.len(), 50);

        let scores: Vec<f64> = list.iter_from_rank(1).map(|e| e.score).collect();
        let expected: Vec<f64> = (0..50).map(|i| i as f64).collect();
        assert_eq!(scores, expected);
    }

    #[test]
    fn test_equal_scores_ordered_by_member() {
        let mut list = SkipList::new();
        list.insert("c".into(), 1.0);
        list.insert("a".into(), 1.0);
        list.insert("b".into(), 1.0);

        let order: Vec<&str> = list.iter_from_rank(1).map(|e| e.member.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(list.rank("b", 1.0), 2);
    }

    #[test]
    fn test_rank_and_get_by_rank_are_inverse() {
        let list = list_of(200);
        for r in 1..=200 {
            let e = list.get_by_rank(r).unwrap();
            assert_eq!(list.rank(&e.member, e.score), r);
        }
        assert!(list.get_by_rank(0).is_none());
        assert!(list.get_by_rank(201).is_none());
        assert_eq!(list.rank("absent", 3.0), 0);
    }

    #[test]
    fn test_remove() {
        let mut list = list_of(10);
        assert!(list.remove("m004", 4.0));
        assert!(!list.remove("m004", 4.0));
        assert!(!list.remove("m005", 99.0));
        assert_eq!(list.len(), 9);
        assert_eq!(list.rank("m005", 5.0), 5);

        for r in 1..=9 {
            let e = list.get_by_rank(r).unwrap().clone();
            assert_eq!(list.rank(&e.member, e.score), r);
        }
    }

    #[test]
    fn test_remove_all_then_reuse() {
        let mut list = list_of(20);
        for i in 0..20 {
            assert!(list.remove(&format!("m{:03}", i), i as f64));
        }
        assert!(list.is_empty());
        assert!(list.get_by_rank(1).is_none());
        assert_eq!(list.iter_rev_from_rank(1).count(), 0);

        list.insert("x".into(), 1.0);
        assert_eq!(list.rank("x", 1.0), 1);
        assert_eq!(list.nodes.len(), 21);
    }

    #[test]
    fn test_reverse_iteration() {
        let list = list_of(5);
        let order: Vec<f64> = list.iter_rev_from_rank(5).map(|e| e.score).collect();
        assert_eq!(order, vec![4.0, 3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_border_parse() {
        assert_eq!("1.5".parse::<Border>(), Ok(Border::inclusive(1.5)));
        assert_eq!("(1.5".parse::<Border>(), Ok(Border::exclusive(1.5)));
        assert_eq!("-inf".parse::<Border>(), Ok(Border::NegInf));
        assert_eq!("+inf".parse::<Border>(), Ok(Border::PosInf));
        assert_eq!("+INF".parse::<Border>(), Ok(Border::PosInf));
        assert_eq!("abc".parse::<Border>(), Err(InvalidBorder));
        assert_eq!("(".parse::<Border>(), Err(InvalidBorder));
    }

    #[test]
    fn test_border_empty_range() {
        let one = Border::inclusive(1.0);
        let two = Border::inclusive(2.0);
        assert!(!Border::is_empty_range(&one, &two));
        assert!(Border::is_empty_range(&two, &one));
        assert!(!Border::is_empty_range(&one, &one));
        assert!(Border::is_empty_range(&Border::exclusive(1.0), &one));
        assert!(Border::is_empty_range(&Border::PosInf, &Border::PosInf));
        assert!(!Border::is_empty_range(&Border::NegInf, &Border::PosInf));
    }

    #[test]
    fn test_first_and_last_in_range() {
        let list = list_of(10);
        let min = Border::exclusive(2.0);
        let max = Border::inclusive(6.0);

        assert!(list.has_in_range(&min, &max));
        assert_eq!(list.first_in_range(&min, &max).unwrap().score, 3.0);
        assert_eq!(list.last_in_range(&min, &max).unwrap().score, 6.0);

        let (lo, hi) = (Border::inclusive(20.0), Border::PosInf);
        assert!(!list.has_in_range(&lo, &hi));
        assert!(list.first_in_range(&lo, &hi).is_none());

        let (lo, hi) = (Border::exclusive(2.0), Border::exclusive(3.0));
        assert!(list.first_in_range(&lo, &hi).is_none());
        assert!(list.last_in_range(&lo, &hi).is_none());
    }

    #[test]
    fn test_iter_range() {
        let list = list_of(10);
        let (min, max) = (Border::inclusive(3.0), Border::exclusive(6.0));

        let asc: Vec<f64> = list.iter_range(&min, &max, false).map(|e| e.score).collect();
        assert_eq!(asc, vec![3.0, 4.0, 5.0]);

        let desc: Vec<f64> = list.iter_range(&min, &max, true).map(|e| e.score).collect();
        assert_eq!(desc, vec![5.0, 4.0, 3.0]);
    }

    #[test]
    fn test_remove_range_respects_bounds() {
        let mut list = list_of(10);
        let removed = list.remove_range(&Border::exclusive(2.0), &Border::inclusive(5.0), 0);
        assert_eq!(members(&removed), vec!["m003", "m004", "m005"]);
        assert_eq!(list.len(), 7);
        assert_eq!(list.rank("m002", 2.0), 3);
        assert_eq!(list.rank("m006", 6.0), 4);
    }

    #[test]
    fn test_remove_range_with_limit() {
        let mut list = list_of(10);
        let removed = list.remove_range(&Border::NegInf, &Border::PosInf, 4);
        assert_eq!(removed.len(), 4);
        assert_eq!(removed[0].score, 0.0);
        assert_eq!(list.len(), 6);
        assert_eq!(list.get_by_rank(1).unwrap().score, 4.0);
    }

    #[test]
    fn test_remove_range_by_rank() {
        let mut list = list_of(10);
        // ranks 2..5 exclusive: m001, m002, m003
        let removed = list.remove_range_by_rank(2, 5);
        assert_eq!(members(&removed), vec!["m001", "m002", "m003"]);
        assert_eq!(list.len(), 7);
        assert_eq!(list.get_by_rank(2).unwrap().member, "m004");

        for r in 1..=7 {
            let e = list.get_by_rank(r).unwrap().clone();
            assert_eq!(list.rank(&e.member, e.score), r);
        }
    }

    #[test]
    fn test_remove_range_by_rank_past_end() {
        let mut list = list_of(3);
        let removed = list.remove_range_by_rank(2, 100);
        assert_eq!(removed.len(), 2);
        assert_eq!(list.len(), 1);
        assert_eq!(list.iter_rev_from_rank(1).count(), 1);
    }
}
