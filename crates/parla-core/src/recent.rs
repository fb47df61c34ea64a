//! Most-recent-first list of converted phrases.

use std::collections::VecDeque;

use serde::{Serialize, Serializer};

/// Default number of phrases kept.
pub const DEFAULT_RECENT_CAPACITY: usize = 5;

/// Bounded list of unique phrases, newest first.
///
/// Pushing an existing phrase moves it to the front instead of duplicating
/// it; pushing past capacity drops the oldest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentPhrases {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for RecentPhrases {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

impl RecentPhrases {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert `phrase` at the front. Blank phrases are ignored.
    pub fn push(&mut self, phrase: &str) {
        if phrase.trim().is_empty() || self.capacity == 0 {
            return;
        }
        if let Some(pos) = self.entries.iter().position(|p| p == phrase) {
            self.entries.remove(pos);
        }
        self.entries.push_front(phrase.to_string());
        self.entries.truncate(self.capacity);
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.get(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl Serialize for RecentPhrases {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.entries)
    }
}
