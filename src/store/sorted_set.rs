//! Sorted set
//!
//! Member → score map plus an ordered index, iterated by ascending score
//! and then ascending member.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// f64 with a total order (`f64::total_cmp`) so it can key a BTreeSet
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A set of unique members, each carrying a score
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    /// member → score
    scores: HashMap<String, f64>,
    /// (score, member), the iteration order
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or rescore a member. Returns true if the member is new.
    pub fn add(&mut self, member: impl Into<String>, score: f64) -> bool {
        let member = member.into();
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.clone()));
                self.ordered.insert((Score(score), member));
                false
            }
            None => {
                self.ordered.insert((Score(score), member));
                true
            }
        }
    }

    /// Remove a member. Returns true if it was present.
    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(Score(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Members in rank order: ascending score, ties broken by member
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.ordered.iter().map(|(score, member)| (member.as_str(), score.0))
    }
}

impl PartialEq for SortedSet {
    fn eq(&self, other: &Self) -> bool {
        self.scores == other.scores
    }
}

impl FromIterator<(String, f64)> for SortedSet {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut set = SortedSet::new();
        for (member, score) in iter {
            set.add(member, score);
        }
        set
    }
}
