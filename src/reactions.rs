//! Reaction and zap aggregation with debounced, batched flushing.
//!
//! A reaction is only counted once the title of its target can be resolved;
//! until then it waits in a per-target queue that is replayed by
//! [`ReactionAggregator::process_pending_reactions`].

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    mem,
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::TitleLookup;
use crate::event::{Event, TagKind, KIND_REACTION, KIND_ZAP_RECEIPT};
use crate::persist::Persistence;
use crate::time::{Clock, Debounce};

/// Aggregate engagement for one target event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub like_count: u64,
    pub zap_count: u64,
    /// Sum of zap amounts in sats.
    pub zap_amount_sum: u64,
    /// Every reaction id seen for the target, counted or not.
    pub raw_reaction_ids: Vec<String>,
}

/// Typed partial update produced by one or more reactions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionDelta {
    pub likes: u64,
    pub zaps: u64,
    pub zap_amount: u64,
    pub reaction_ids: Vec<String>,
}

impl ReactionRecord {
    /// Apply a delta. Counters only ever grow.
    pub fn merge(&mut self, delta: &ReactionDelta) {
        self.like_count = self.like_count.saturating_add(delta.likes);
        self.zap_count = self.zap_count.saturating_add(delta.zaps);
        self.zap_amount_sum = self.zap_amount_sum.saturating_add(delta.zap_amount);
        for id in &delta.reaction_ids {
            if !self.raw_reaction_ids.contains(id) {
                self.raw_reaction_ids.push(id.clone());
            }
        }
    }
}

impl ReactionDelta {
    fn absorb(&mut self, other: ReactionDelta) {
        self.likes += other.likes;
        self.zaps += other.zaps;
        self.zap_amount += other.zap_amount;
        self.reaction_ids.extend(other.reaction_ids);
    }
}

/// What happened to a processed reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionOutcome {
    /// Applied to the target's record and buffered for the next flush.
    Counted { target: String },
    /// Target title unknown; waiting for `process_pending_reactions`.
    Queued { target: String },
    /// No `e` tag, or the reaction id was already applied.
    Ignored,
}

pub struct ReactionAggregator {
    records: HashMap<String, ReactionRecord>,
    applied: HashSet<String>,
    pending: HashMap<String, Vec<Event>>,
    buffer: BTreeMap<String, ReactionDelta>,
    debounce: Debounce,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn Persistence>,
}

impl ReactionAggregator {
    pub fn new(window: Duration, clock: Arc<dyn Clock>, sink: Arc<dyn Persistence>) -> Self {
        Self {
            records: HashMap::new(),
            applied: HashSet::new(),
            pending: HashMap::new(),
            buffer: BTreeMap::new(),
            debounce: Debounce::new(window),
            clock,
            sink,
        }
    }

    pub fn process(&mut self, event: &Event, titles: &mut dyn TitleLookup) -> ReactionOutcome {
        let Some(target) = reaction_target(event) else {
            debug!(id = %event.id, kind = event.kind, "reaction without event reference dropped");
            return ReactionOutcome::Ignored;
        };
        if self.applied.contains(&event.id) {
            return ReactionOutcome::Ignored;
        }
        if titles.lookup_title(&target).is_none() {
            let queue = self.pending.entry(target.clone()).or_default();
            if !queue.iter().any(|queued| queued.id == event.id) {
                queue.push(event.clone());
            }
            debug!(id = %event.id, note = %target, "reaction queued until target resolves");
            return ReactionOutcome::Queued { target };
        }

        let delta = reaction_delta(event);
        self.records.entry(target.clone()).or_default().merge(&delta);
        self.buffer.entry(target.clone()).or_default().absorb(delta);
        self.applied.insert(event.id.clone());
        self.debounce.arm(self.clock.now_ms());
        ReactionOutcome::Counted { target }
    }

    /// Replay reactions queued for `target` in arrival order. Returns how many
    /// were counted; ones still unresolvable go back into the queue.
    pub fn process_pending_reactions(
        &mut self,
        target: &str,
        titles: &mut dyn TitleLookup,
    ) -> usize {
        let Some(queue) = self.pending.remove(target) else {
            return 0;
        };
        let mut counted = 0;
        for ev in &queue {
            if let ReactionOutcome::Counted { .. } = self.process(ev, titles) {
                counted += 1;
            }
        }
        counted
    }

    /// Flush when the debounce window has elapsed.
    pub fn poll(&mut self) -> usize {
        if self.debounce.is_due(self.clock.now_ms()) {
            self.flush()
        } else {
            0
        }
    }

    /// Write one aggregate per buffered target and clear the buffer.
    pub fn flush(&mut self) -> usize {
        self.debounce.cancel();
        let batch = mem::take(&mut self.buffer);
        for (target, delta) in &batch {
            let Some(record) = self.records.get(target) else {
                continue;
            };
            debug!(
                note = %target,
                likes = delta.likes,
                zaps = delta.zaps,
                "flushing reaction update"
            );
            if let Err(e) = self.sink.write_reactions(target, record) {
                warn!("reaction flush for {target} failed: {e:#}");
            }
        }
        if !batch.is_empty() {
            info!(targets = batch.len(), "reaction flush");
        }
        batch.len()
    }

    /// Forced flush used at shutdown; cancels the pending timer.
    pub fn cleanup(&mut self) -> usize {
        self.flush()
    }

    pub fn get_reaction_stats(&self, id: &str) -> Option<&ReactionRecord> {
        self.records.get(id)
    }

    pub fn has_reactions(&self, id: &str) -> bool {
        self.records
            .get(id)
            .is_some_and(|r| !r.raw_reaction_ids.is_empty())
    }

    pub fn get_reaction_events(&self, id: &str) -> Vec<String> {
        self.records
            .get(id)
            .map(|r| r.raw_reaction_ids.clone())
            .unwrap_or_default()
    }

    /// Reload persisted records; their ids count as already applied.
    pub fn restore(&mut self, records: HashMap<String, ReactionRecord>) {
        for (target, record) in records {
            self.applied.extend(record.raw_reaction_ids.iter().cloned());
            self.records.insert(target, record);
        }
    }

    /// Number of reactions waiting for their target.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.debounce.is_armed()
    }

    pub fn flush_due_in(&self) -> Option<Duration> {
        self.debounce.remaining(self.clock.now_ms())
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.applied.clear();
        self.pending.clear();
        self.buffer.clear();
        self.debounce.cancel();
    }
}

/// Target of a reaction: its first `e` tag.
pub fn reaction_target(event: &Event) -> Option<String> {
    event
        .tag_entries()
        .find(|t| t.kind == TagKind::EventRef && t.target.is_some())
        .and_then(|t| t.target)
}

fn reaction_delta(event: &Event) -> ReactionDelta {
    let mut delta = ReactionDelta {
        reaction_ids: vec![event.id.clone()],
        ..ReactionDelta::default()
    };
    match event.kind {
        KIND_REACTION if event.content == "+" => delta.likes = 1,
        KIND_ZAP_RECEIPT => match zap_amount_sats(event) {
            Some(sats) => {
                delta.zaps = 1;
                delta.zap_amount = sats;
            }
            None => debug!(id = %event.id, "zap without a positive amount not counted"),
        },
        _ => {}
    }
    delta
}

/// Amount of a zap receipt in sats: the `bolt11` invoice, then the embedded
/// zap request's `amount` (millisats), then the content itself.
pub fn zap_amount_sats(event: &Event) -> Option<u64> {
    let amount = event
        .tag_value("bolt11")
        .and_then(bolt11_msats)
        .map(|msats| msats / 1000)
        .or_else(|| {
            event
                .tag_value("description")
                .and_then(zap_request_msats)
                .map(|msats| msats / 1000)
        })
        .or_else(|| content_sats(&event.content))?;
    (amount > 0).then_some(amount)
}

/// Millisats encoded in a BOLT-11 invoice's human readable part.
fn bolt11_msats(invoice: &str) -> Option<u64> {
    let invoice = invoice.trim().to_lowercase();
    let hrp = &invoice[..invoice.rfind('1')?];
    let rest = hrp.strip_prefix("ln")?;
    let amount = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    if amount.is_empty() {
        return None;
    }
    let (digits, multiplier) = match amount.chars().last()? {
        c @ ('m' | 'u' | 'n' | 'p') => (&amount[..amount.len() - 1], Some(c)),
        _ => (amount, None),
    };
    let value: u64 = digits.parse().ok()?;
    match multiplier {
        None => value.checked_mul(100_000_000_000),
        Some('m') => value.checked_mul(100_000_000),
        Some('u') => value.checked_mul(100_000),
        Some('n') => value.checked_mul(100),
        Some(_) => Some(value / 10),
    }
}

fn zap_request_msats(description: &str) -> Option<u64> {
    let request: Value = serde_json::from_str(description).ok()?;
    request.get("tags")?.as_array()?.iter().find_map(|tag| {
        let fields = tag.as_array()?;
        if fields.first()?.as_str()? != "amount" {
            return None;
        }
        fields.get(1)?.as_str()?.parse().ok()
    })
}

fn content_sats(content: &str) -> Option<u64> {
    let content = content.trim();
    if let Ok(n) = content.parse::<u64>() {
        return Some(n);
    }
    let value: Value = serde_json::from_str(content).ok()?;
    value.get("amount")?.as_u64()
}
