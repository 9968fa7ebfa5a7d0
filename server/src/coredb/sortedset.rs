/*
 * Created on Mon Feb 12 2024
 *
 * This file is a part of Cinnabar
 * Cinnabar is a Redis-compatible in-memory key/value store that speaks
 * the Redis serialization protocol over TCP, persists point-in-time
 * snapshots in the RDB format and replicates to read replicas.
 *
 * Copyright (c) 2024, the Cinnabar developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! # The sorted set
//!
//! An ordered collection keyed by `(score, member)` with a side map
//! `member → score`. The ordered half gives range and rank queries
//! their iteration order (scores ascending, ties broken by member);
//! the side map gives O(1) score lookup and makes score updates a
//! remove + reinsert.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

/// An entry in the ordered half. Ordering is total: scores compare by
/// `f64::total_cmp` and members break ties lexicographically
#[derive(Debug, Clone, PartialEq)]
struct ScoredMember {
    score: f64,
    member: String,
}

impl Eq for ScoredMember {}

impl PartialOrd for ScoredMember {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredMember {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

/// The option bag accepted by `ZADD`
#[derive(Debug, Clone, Copy, Default)]
pub struct ZaddFlags {
    /// add only if the member is absent
    pub nx: bool,
    /// update only if the member is present
    pub xx: bool,
    /// update only if the new score is strictly greater
    pub gt: bool,
    /// update only if the new score is strictly less
    pub lt: bool,
    /// count changed members in the return value, not just added ones
    pub ch: bool,
    /// add `score` to the existing score instead of replacing it
    pub incr: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    entries: BTreeSet<ScoredMember>,
    scores: HashMap<String, f64>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn admits(&self, score: f64, member: &str, flags: ZaddFlags) -> bool {
        let current = self.scores.get(member);
        if (current.is_none() && flags.xx) || (current.is_some() && flags.nx) {
            return false;
        }
        if let Some(&old) = current {
            if flags.gt && old >= score {
                return false;
            }
            if flags.lt && old <= score {
                return false;
            }
            if flags.incr && score > 0.0 && flags.lt {
                return false;
            }
            if flags.incr && score < 0.0 && flags.gt {
                return false;
            }
        }
        true
    }

    /// Insert or update a member. The return value is what the member
    /// contributes to the `ZADD` count: true for a new member, and for
    /// an existing member whose score changed when `CH` is set
    pub fn zadd(&mut self, score: f64, member: &str, flags: ZaddFlags) -> bool {
        if !self.admits(score, member, flags) {
            return false;
        }
        let mut score = score;
        let mut changed = false;
        let mut existed = false;
        if let Some(&old) = self.scores.get(member) {
            self.entries.remove(&ScoredMember {
                score: old,
                member: member.to_owned(),
            });
            changed = (!flags.incr && old != score) || (flags.incr && score != 0.0);
            existed = true;
            if flags.incr {
                score += old;
            }
        }
        self.scores.insert(member.to_owned(), score);
        self.entries.insert(ScoredMember {
            score,
            member: member.to_owned(),
        });
        !existed || (changed && flags.ch)
    }

    pub fn zrem(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.entries.remove(&ScoredMember {
                    score,
                    member: member.to_owned(),
                });
                true
            }
            None => false,
        }
    }

    /// Index range, inclusive on both sides, negative indices counting
    /// from the tail
    pub fn zrange(&self, start: i64, stop: i64) -> Vec<&String> {
        let len = self.entries.len() as i64;
        let start = if start < 0 { len + start } else { start }.max(0);
        let stop = if stop < 0 { len + stop } else { stop }.min(len - 1);
        if start > stop || len == 0 {
            return Vec::new();
        }
        self.entries
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|e| &e.member)
            .collect()
    }

    /// Score range, inclusive bounds; duplicate scores with distinct
    /// members all fall inside the range
    pub fn zrangebyscore(&self, min: f64, max: f64) -> Vec<&String> {
        self.entries
            .iter()
            .skip_while(|e| e.score < min)
            .take_while(|e| e.score <= max)
            .map(|e| &e.member)
            .collect()
    }

    pub fn zrank(&self, member: &str) -> Option<usize> {
        let score = *self.scores.get(member)?;
        let target = ScoredMember {
            score,
            member: member.to_owned(),
        };
        let below = (Bound::Unbounded, Bound::Excluded(&target));
        Some(self.entries.range::<ScoredMember, _>(below).count())
    }

    pub fn zrevrank(&self, member: &str) -> Option<usize> {
        self.zrank(member).map(|rank| self.len() - 1 - rank)
    }

    pub fn zscore(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn zcount(&self, min: f64, max: f64) -> usize {
        self.zrangebyscore(min, max).len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Members with their scores in iteration order (used by the
    /// snapshot writer)
    pub fn iter(&self) -> impl Iterator<Item = (&String, f64)> {
        self.entries.iter().map(|e| (&e.member, e.score))
    }
}

impl FromIterator<(String, f64)> for SortedSet {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut zset = SortedSet::new();
        for (member, score) in iter {
            zset.zadd(score, &member, ZaddFlags::default());
        }
        zset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zset(pairs: &[(f64, &str)]) -> SortedSet {
        let mut z = SortedSet::new();
        for &(score, member) in pairs {
            assert!(z.zadd(score, member, ZaddFlags::default()));
        }
        z
    }

    #[test]
    fn test_order_is_score_then_member() {
        let z = zset(&[(2.0, "b"), (1.0, "c"), (1.0, "a"), (3.0, "d")]);
        assert_eq!(z.zrange(0, -1), ["a", "c", "b", "d"]);
    }

    #[test]
    fn test_update_repositions() {
        let mut z = zset(&[(1.0, "a"), (2.0, "b")]);
        assert!(!z.zadd(5.0, "a", ZaddFlags::default()));
        assert_eq!(z.zrange(0, -1), ["b", "a"]);
        assert_eq!(z.zscore("a"), Some(5.0));
        assert_eq!(z.len(), 2);
    }

    #[test]
    fn test_nx_xx() {
        let mut z = zset(&[(1.0, "a")]);
        let nx = ZaddFlags {
            nx: true,
            ..Default::default()
        };
        let xx = ZaddFlags {
            xx: true,
            ..Default::default()
        };
        assert!(!z.zadd(9.0, "a", nx));
        assert_eq!(z.zscore("a"), Some(1.0));
        assert!(z.zadd(9.0, "b", nx));
        assert!(!z.zadd(9.0, "c", xx));
        assert!(!z.zadd(7.0, "a", xx));
        assert_eq!(z.zscore("a"), Some(7.0));
    }

    #[test]
    fn test_gt_lt() {
        let mut z = zset(&[(5.0, "a")]);
        let gt = ZaddFlags {
            gt: true,
            ..Default::default()
        };
        let lt = ZaddFlags {
            lt: true,
            ..Default::default()
        };
        assert!(!z.zadd(0.0, "a", gt));
        assert_eq!(z.zscore("a"), Some(5.0));
        assert!(!z.zadd(9.0, "a", gt));
        assert_eq!(z.zscore("a"), Some(9.0));
        assert!(!z.zadd(1.0, "a", lt));
        assert_eq!(z.zscore("a"), Some(1.0));
        // GT/LT never block inserting a missing member
        assert!(z.zadd(3.0, "b", gt));
    }

    #[test]
    fn test_ch_and_incr() {
        let mut z = zset(&[(1.0, "a")]);
        let ch = ZaddFlags {
            ch: true,
            ..Default::default()
        };
        assert!(z.zadd(2.0, "a", ch));
        assert!(!z.zadd(2.0, "a", ch));
        let incr = ZaddFlags {
            incr: true,
            ..Default::default()
        };
        assert!(!z.zadd(3.0, "a", incr));
        assert_eq!(z.zscore("a"), Some(5.0));
        assert!(z.zadd(3.0, "fresh", incr));
        assert_eq!(z.zscore("fresh"), Some(3.0));
    }

    #[test]
    fn test_ranks() {
        let z = zset(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        assert_eq!(z.zrank("a"), Some(0));
        assert_eq!(z.zrank("c"), Some(2));
        assert_eq!(z.zrevrank("a"), Some(2));
        assert_eq!(z.zrevrank("c"), Some(0));
        assert_eq!(z.zrank("missing"), None);
    }

    #[test]
    fn test_score_ranges() {
        let z = zset(&[(1.0, "a"), (2.0, "b"), (2.0, "bb"), (3.0, "c")]);
        assert_eq!(z.zrangebyscore(2.0, 3.0), ["b", "bb", "c"]);
        assert_eq!(z.zcount(1.0, 2.0), 3);
        assert_eq!(z.zcount(4.0, 9.0), 0);
    }

    #[test]
    fn test_zrem() {
        let mut z = zset(&[(1.0, "a"), (2.0, "b")]);
        assert!(z.zrem("a"));
        assert!(!z.zrem("a"));
        assert_eq!(z.zrange(0, -1), ["b"]);
    }

    #[test]
    fn test_zrange_clamping() {
        let z = zset(&[(1.0, "a"), (2.0, "b"), (3.0, "c")]);
        assert_eq!(z.zrange(0, 99), ["a", "b", "c"]);
        assert_eq!(z.zrange(-99, 1), ["a", "b"]);
        assert!(z.zrange(2, 1).is_empty());
        assert!(SortedSet::new().zrange(0, -1).is_empty());
    }
}
