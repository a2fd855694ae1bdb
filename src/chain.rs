//! Chronological ordering of events, globally and per author.
//!
//! Both sequences are ascending by `(created_at, id)`. The id breaks ties so
//! that arrival order never affects the result.

use std::collections::HashMap;

use serde::Serialize;

use crate::event::Event;

type Key = (u64, String);

/// Neighbours of a freshly inserted event in the global chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Neighbors {
    pub prev_in_global: Option<String>,
    pub next_in_global: Option<String>,
}

/// Incrementally maintained aggregate for one author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuthorStats {
    pub count: usize,
    pub oldest_timestamp: u64,
    pub newest_timestamp: u64,
}

#[derive(Debug, Default)]
pub struct ChronologicalChain {
    global: Vec<Key>,
    by_author: HashMap<String, Vec<Key>>,
    /// id -> (created_at, author)
    index: HashMap<String, (u64, String)>,
    stats: HashMap<String, AuthorStats>,
}

impl ChronologicalChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `event`. Returns `None` if its id is already in the chain.
    pub fn insert(&mut self, event: &Event) -> Option<Neighbors> {
        if self.index.contains_key(&event.id) {
            return None;
        }
        let key: Key = (event.created_at, event.id.clone());
        let pos = insertion_point(&self.global, &key);
        let neighbors = Neighbors {
            prev_in_global: pos
                .checked_sub(1)
                .and_then(|p| self.global.get(p))
                .map(|(_, id)| id.clone()),
            next_in_global: self.global.get(pos).map(|(_, id)| id.clone()),
        };
        self.global.insert(pos, key.clone());

        let seq = self.by_author.entry(event.pubkey.clone()).or_default();
        let pos = insertion_point(seq, &key);
        seq.insert(pos, key);

        self.index
            .insert(event.id.clone(), (event.created_at, event.pubkey.clone()));
        let stats = self.stats.entry(event.pubkey.clone()).or_default();
        if stats.count == 0 {
            stats.oldest_timestamp = event.created_at;
            stats.newest_timestamp = event.created_at;
        } else {
            stats.oldest_timestamp = stats.oldest_timestamp.min(event.created_at);
            stats.newest_timestamp = stats.newest_timestamp.max(event.created_at);
        }
        stats.count += 1;
        Some(neighbors)
    }

    fn position(&self, id: &str) -> Option<(usize, &str)> {
        let (at, author) = self.index.get(id)?;
        let key = (*at, id.to_string());
        let pos = self.global.binary_search(&key).ok()?;
        Some((pos, author.as_str()))
    }

    fn author_position(&self, id: &str) -> Option<(usize, &Vec<Key>)> {
        let (at, author) = self.index.get(id)?;
        let seq = self.by_author.get(author)?;
        let pos = seq.binary_search(&(*at, id.to_string())).ok()?;
        Some((pos, seq))
    }

    pub fn get_previous(&self, id: &str) -> Option<String> {
        let (pos, _) = self.position(id)?;
        let p = pos.checked_sub(1)?;
        self.global.get(p).map(|(_, id)| id.clone())
    }

    pub fn get_next(&self, id: &str) -> Option<String> {
        let (pos, _) = self.position(id)?;
        self.global.get(pos + 1).map(|(_, id)| id.clone())
    }

    pub fn get_previous_by_author(&self, id: &str) -> Option<String> {
        let (pos, seq) = self.author_position(id)?;
        let p = pos.checked_sub(1)?;
        seq.get(p).map(|(_, id)| id.clone())
    }

    pub fn get_next_by_author(&self, id: &str) -> Option<String> {
        let (pos, seq) = self.author_position(id)?;
        seq.get(pos + 1).map(|(_, id)| id.clone())
    }

    /// `false` for unknown ids.
    pub fn is_latest(&self, id: &str) -> bool {
        self.global.last().is_some_and(|(_, last)| last == id)
    }

    pub fn is_latest_for_author(&self, id: &str) -> bool {
        match self.author_position(id) {
            Some((pos, seq)) => pos + 1 == seq.len(),
            None => false,
        }
    }

    /// Zeroed stats for an author never seen.
    pub fn per_author_stats(&self, author: &str) -> AuthorStats {
        self.stats.get(author).copied().unwrap_or_default()
    }

    pub fn global(&self) -> Vec<String> {
        self.global.iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn by_author(&self, author: &str) -> Vec<String> {
        self.by_author
            .get(author)
            .map(|seq| seq.iter().map(|(_, id)| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Author of a chained id.
    pub fn author_of(&self, id: &str) -> Option<&str> {
        self.index.get(id).map(|(_, author)| author.as_str())
    }

    pub fn latest(&self) -> Option<String> {
        self.global.last().map(|(_, id)| id.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    pub fn clear(&mut self) {
        self.global.clear();
        self.by_author.clear();
        self.index.clear();
        self.stats.clear();
    }
}

fn insertion_point(seq: &[Key], key: &Key) -> usize {
    seq.partition_point(|k| k < key)
}
