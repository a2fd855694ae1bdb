//! Engine facade: one owned instance wiring the reference store, the chain,
//! the reaction aggregator and the derived cache together.
//!
//! Nothing here is synchronized. A single owner serializes mutating calls,
//! either directly or through [`crate::service`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheSnapshot, CacheStats, DerivedCache, TitleLookup};
use crate::chain::{AuthorStats, ChronologicalChain, Neighbors};
use crate::event::{Event, Tag, ValidationError};
use crate::persist::Persistence;
use crate::reactions::{ReactionAggregator, ReactionRecord};
use crate::references::{ReferenceStore, ThreadContext};
use crate::tags::{classify, RefKind};
use crate::time::Clock;

const TITLE_MAX_CHARS: usize = 80;

/// Tunables for one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Combined entry budget of the title and backlink caches.
    pub cache_max_size: usize,
    pub cache_max_age: Duration,
    /// Interval of the periodic cache cleanup pass.
    pub cache_cleanup_interval: Duration,
    pub reaction_debounce: Duration,
    /// Recompute event ids and reject mismatches.
    pub strict_ids: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_max_size: 1000,
            cache_max_age: Duration::from_secs(3600),
            cache_cleanup_interval: Duration::from_secs(300),
            reaction_debounce: Duration::from_millis(1000),
            strict_ids: false,
        }
    }
}

/// Result of [`Engine::ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(Neighbors),
    Duplicate,
    Rejected(ValidationError),
}

/// Counters for a batch of ingestions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub stored: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub pending_references: usize,
    pub pending_reactions: usize,
}

pub struct Engine {
    config: EngineConfig,
    refs: ReferenceStore,
    chain: ChronologicalChain,
    reactions: ReactionAggregator,
    cache: DerivedCache,
    clock: Arc<dyn Clock>,
    last_cleanup_ms: u64,
}

impl Engine {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>, sink: Arc<dyn Persistence>) -> Self {
        let now = clock.now_ms();
        Self {
            refs: ReferenceStore::new(),
            chain: ChronologicalChain::new(),
            reactions: ReactionAggregator::new(
                config.reaction_debounce,
                clock.clone(),
                sink.clone(),
            ),
            cache: DerivedCache::new(
                config.cache_max_size,
                config.cache_max_age,
                clock.clone(),
                sink,
            ),
            config,
            clock,
            last_cleanup_ms: now,
        }
    }

    /// Ingest one event from the feed. Never fails; problems are logged and
    /// reported through the outcome.
    pub fn ingest(&mut self, event: Event) -> IngestOutcome {
        let checked = if self.config.strict_ids {
            event.validate_strict()
        } else {
            event.validate()
        };
        if let Err(e) = checked {
            warn!("rejecting event: {e}");
            return IngestOutcome::Rejected(e);
        }
        if !self.refs.store_event(&event) {
            debug!(id = %event.id, "duplicate event ignored");
            return IngestOutcome::Duplicate;
        }
        let neighbors = self.chain.insert(&event).unwrap_or_default();
        if event.is_reaction() {
            let mut titles = Titles {
                cache: &mut self.cache,
                refs: &self.refs,
            };
            self.reactions.process(&event, &mut titles);
        } else {
            let thread = classify(&event.tags);
            for target in thread
                .root
                .iter()
                .chain(&thread.reply_to)
                .chain(&thread.references)
            {
                self.cache.add_link(&event.id, target);
            }
            self.cache.set_title(&event.id, derive_title(&event));
            self.process_pending_reactions(&event.id);
        }
        self.poll();
        IngestOutcome::Stored(neighbors)
    }

    /// Ingest a batch and tally the outcomes.
    pub fn ingest_all(&mut self, events: impl IntoIterator<Item = Event>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for event in events {
            match self.ingest(event) {
                IngestOutcome::Stored(_) => summary.stored += 1,
                IngestOutcome::Duplicate => summary.duplicates += 1,
                IngestOutcome::Rejected(_) => summary.rejected += 1,
            }
        }
        summary.pending_references = self.refs.pending_count();
        summary.pending_reactions = self.reactions.pending_count();
        summary
    }

    /// Record a rendered title for `id` and replay reactions waiting on it.
    pub fn set_title(&mut self, id: &str, title: &str) -> usize {
        self.cache.set_title(id, title);
        self.process_pending_reactions(id)
    }

    /// Resolution signal from a collaborator that rendered `id`.
    pub fn process_pending_reactions(&mut self, id: &str) -> usize {
        let mut titles = Titles {
            cache: &mut self.cache,
            refs: &self.refs,
        };
        self.reactions.process_pending_reactions(id, &mut titles)
    }

    /// Run due timers: the reaction flush, and on the cleanup interval a
    /// cache cleanup followed by a snapshot if anything changed.
    pub fn poll(&mut self) {
        self.reactions.poll();
        let now = self.clock.now_ms();
        let interval = self.config.cache_cleanup_interval.as_millis() as u64;
        if now.saturating_sub(self.last_cleanup_ms) >= interval {
            self.last_cleanup_ms = now;
            self.cache.cleanup();
            self.cache.persist_if_dirty();
        }
    }

    /// Time until the next timer fires.
    pub fn next_deadline(&self) -> Duration {
        let now = self.clock.now_ms();
        let interval = self.config.cache_cleanup_interval.as_millis() as u64;
        let cleanup =
            Duration::from_millis((self.last_cleanup_ms + interval).saturating_sub(now));
        match self.reactions.flush_due_in() {
            Some(flush) => flush.min(cleanup),
            None => cleanup,
        }
    }

    /// Force the reaction flush and write a final cache snapshot.
    pub fn shutdown(&mut self) -> usize {
        let flushed = self.reactions.cleanup();
        self.cache.persist();
        flushed
    }

    /// Reload persisted derived state.
    pub fn restore(
        &mut self,
        reactions: HashMap<String, ReactionRecord>,
        cache: Option<CacheSnapshot>,
    ) {
        self.reactions.restore(reactions);
        if let Some(snapshot) = cache {
            self.cache.restore(snapshot);
        }
    }

    pub fn get_outgoing_references(&self, id: &str) -> Vec<String> {
        self.refs.get_outgoing_references(id)
    }

    pub fn get_incoming_references(&self, id: &str) -> Vec<String> {
        self.refs.get_incoming_references(id)
    }

    pub fn get_thread_context(&self, id: &str) -> ThreadContext {
        self.refs.get_thread_context(id)
    }

    pub fn get_references_by_type(&self, id: &str, kind: RefKind) -> Vec<String> {
        self.refs.get_references_by_type(id, kind)
    }

    pub fn events_by_topic(&self, topic: &str) -> Vec<String> {
        self.refs.events_by_topic(topic)
    }

    pub fn event(&self, id: &str) -> Option<&Event> {
        self.refs.event(id)
    }

    pub fn get_previous(&self, id: &str) -> Option<String> {
        self.chain.get_previous(id)
    }

    pub fn get_next(&self, id: &str) -> Option<String> {
        self.chain.get_next(id)
    }

    pub fn get_previous_by_author(&self, id: &str) -> Option<String> {
        self.chain.get_previous_by_author(id)
    }

    pub fn get_next_by_author(&self, id: &str) -> Option<String> {
        self.chain.get_next_by_author(id)
    }

    pub fn is_latest(&self, id: &str) -> bool {
        self.chain.is_latest(id)
    }

    pub fn is_latest_for_author(&self, id: &str) -> bool {
        self.chain.is_latest_for_author(id)
    }

    pub fn per_author_stats(&self, author: &str) -> AuthorStats {
        self.chain.per_author_stats(author)
    }

    pub fn chain(&self) -> &ChronologicalChain {
        &self.chain
    }

    pub fn get_reaction_stats(&self, id: &str) -> Option<&ReactionRecord> {
        self.reactions.get_reaction_stats(id)
    }

    pub fn has_reactions(&self, id: &str) -> bool {
        self.reactions.has_reactions(id)
    }

    pub fn get_reaction_events(&self, id: &str) -> Vec<String> {
        self.reactions.get_reaction_events(id)
    }

    pub fn get_cached_title(&mut self, id: &str) -> Option<String> {
        self.cache.get_title(id)
    }

    pub fn get_backlinks(&self, id: &str) -> Vec<String> {
        self.cache.get_backlinks(id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pending_references(&self) -> usize {
        self.refs.pending_count()
    }

    pub fn pending_reactions(&self) -> usize {
        self.reactions.pending_count()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Full resync: clear every component.
    pub fn reset_all(&mut self) {
        self.refs.clear();
        self.chain.clear();
        self.reactions.clear();
        self.cache.clear();
        self.last_cleanup_ms = self.clock.now_ms();
    }
}

/// Title source for the aggregator: the cache first, then the stored body of
/// the event, which puts an evicted or expired title back.
struct Titles<'a> {
    cache: &'a mut DerivedCache,
    refs: &'a ReferenceStore,
}

impl TitleLookup for Titles<'_> {
    fn lookup_title(&mut self, id: &str) -> Option<String> {
        if let Some(title) = self.cache.get_title(id) {
            return Some(title);
        }
        let title = derive_title(self.refs.event(id)?);
        debug!(id, "title re-derived from stored event");
        self.cache.set_title(id, title.clone());
        Some(title)
    }
}

/// A `title` tag, else the first non-empty content line, capped in length.
pub fn derive_title(event: &Event) -> String {
    let raw = event
        .tags
        .iter()
        .find_map(|t: &Tag| t.value_of("title"))
        .filter(|t| !t.trim().is_empty())
        .or_else(|| event.content.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("");
    raw.trim().chars().take(TITLE_MAX_CHARS).collect()
}
