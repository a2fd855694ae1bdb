//! Bidirectional reference graph over event ids.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::event::Event;
use crate::tags::{classify, RefKind};

/// Thread position of an event plus the events replying to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadContext {
    pub root: Option<String>,
    pub reply_to: Option<String>,
    /// Incoming ROOT/REPLY references from non-reaction events, ordered by
    /// `(created_at, id)`.
    pub replies: Vec<String>,
}

/// Source or target id -> peer id -> every classification of that edge.
type EdgeMap = HashMap<String, BTreeMap<String, BTreeSet<RefKind>>>;

/// Owns the event table and the forward, backward and pending edge maps.
#[derive(Debug, Default)]
pub struct ReferenceStore {
    events: HashMap<String, Event>,
    outgoing: EdgeMap,
    incoming: EdgeMap,
    /// Target id -> sources waiting for it to arrive.
    pending: HashMap<String, BTreeSet<String>>,
    topics: HashMap<String, BTreeSet<String>>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event and wire up its references. Returns `false` when the id
    /// was already known, in which case nothing changes.
    pub fn store_event(&mut self, event: &Event) -> bool {
        if self.events.contains_key(&event.id) {
            return false;
        }
        self.events.insert(event.id.clone(), event.clone());
        let tags = classify(&event.tags);
        for (target, kind) in tags.edges() {
            self.add_reference(&event.id, &target, kind);
        }
        for topic in tags.topics {
            self.topics.entry(topic).or_default().insert(event.id.clone());
        }
        self.on_content_arrived(&event.id);
        true
    }

    /// Record `from -> to`. The backlink is written now if `to` is known,
    /// otherwise the edge waits in the pending bucket for `to`.
    pub fn add_reference(&mut self, from: &str, to: &str, kind: RefKind) {
        self.outgoing
            .entry(from.to_string())
            .or_default()
            .entry(to.to_string())
            .or_default()
            .insert(kind);
        if self.events.contains_key(to) {
            self.link_back(from, to, kind);
        } else {
            self.pending
                .entry(to.to_string())
                .or_default()
                .insert(from.to_string());
        }
    }

    /// Promote every edge waiting on `id` into a backlink.
    fn on_content_arrived(&mut self, id: &str) {
        let Some(waiting) = self.pending.remove(id) else {
            return;
        };
        debug!(id, waiting = waiting.len(), "resolving pending references");
        for from in waiting {
            // A source cleared since it was queued no longer has the edge.
            let kinds = self
                .outgoing
                .get(&from)
                .and_then(|targets| targets.get(id))
                .cloned()
                .unwrap_or_default();
            for kind in kinds {
                self.link_back(&from, id, kind);
            }
        }
    }

    fn link_back(&mut self, from: &str, to: &str, kind: RefKind) {
        self.incoming
            .entry(to.to_string())
            .or_default()
            .entry(from.to_string())
            .or_default()
            .insert(kind);
    }

    pub fn get_outgoing_references(&self, id: &str) -> Vec<String> {
        self.outgoing
            .get(id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_incoming_references(&self, id: &str) -> Vec<String> {
        self.incoming
            .get(id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Forward references of `id` with the given classification.
    pub fn get_references_by_type(&self, id: &str, kind: RefKind) -> Vec<String> {
        self.outgoing
            .get(id)
            .map(|m| {
                m.iter()
                    .filter(|(_, kinds)| kinds.contains(&kind))
                    .map(|(to, _)| to.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_thread_context(&self, id: &str) -> ThreadContext {
        let mut ctx = ThreadContext::default();
        if let Some(targets) = self.outgoing.get(id) {
            for (to, kinds) in targets {
                if kinds.contains(&RefKind::Root) {
                    ctx.root = Some(to.clone());
                }
                if kinds.contains(&RefKind::Reply) {
                    ctx.reply_to = Some(to.clone());
                }
            }
        }
        let mut replies: Vec<(u64, String)> = self
            .incoming
            .get(id)
            .into_iter()
            .flatten()
            .filter(|(_, kinds)| kinds.iter().any(|k| k.is_thread()))
            .filter_map(|(from, _)| match self.events.get(from) {
                // reactions point at their target but are not part of the thread
                Some(ev) if ev.is_reaction() => None,
                Some(ev) => Some((ev.created_at, from.clone())),
                None => Some((0, from.clone())),
            })
            .collect();
        replies.sort();
        ctx.replies = replies.into_iter().map(|(_, id)| id).collect();
        ctx
    }

    /// Ids of stored events carrying the (lower-cased) topic.
    pub fn events_by_topic(&self, topic: &str) -> Vec<String> {
        self.topics
            .get(&topic.to_lowercase())
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop `id`'s outgoing edges and the backlinks they produced. Pending
    /// buckets of other ids are left as they are.
    pub fn clear_note(&mut self, id: &str) {
        let Some(targets) = self.outgoing.remove(id) else {
            return;
        };
        for to in targets.keys() {
            if let Some(back) = self.incoming.get_mut(to) {
                back.remove(id);
                if back.is_empty() {
                    self.incoming.remove(to);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.pending.clear();
        self.topics.clear();
    }

    /// Canonical body of a stored event.
    pub fn event(&self, id: &str) -> Option<&Event> {
        self.events.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.events.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of edges still waiting for their target.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(BTreeSet::len).sum()
    }

    /// Whether any edge is waiting for `id`.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::fixtures::{hex_id, note, reaction};
    use crate::event::Tag;

    fn reply_to(label: &str, parent: &str, at: u64) -> Event {
        note(label, "bob", at, vec![Tag::new(&["e", &hex_id(parent), "", "reply"])])
    }

    #[test]
    fn store_is_idempotent() {
        let mut store = ReferenceStore::new();
        let a = note("a", "alice", 1, vec![]);
        let b = reply_to("b", "a", 2);
        assert!(store.store_event(&a));
        assert!(store.store_event(&b));
        assert!(!store.store_event(&b));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_incoming_references(&a.id), vec![b.id.clone()]);
        assert_eq!(store.get_outgoing_references(&b.id), vec![a.id.clone()]);
    }

    #[test]
    fn forward_reference_resolves_on_arrival() {
        let mut store = ReferenceStore::new();
        let a = note("a", "alice", 1, vec![]);
        let b = reply_to("b", "a", 2);
        store.store_event(&b);
        assert!(store.get_incoming_references(&a.id).is_empty());
        assert!(store.is_pending(&a.id));
        store.store_event(&a);
        assert_eq!(store.get_incoming_references(&a.id), vec![b.id.clone()]);
        assert!(!store.is_pending(&a.id));
    }

    #[test]
    fn thread_context_orders_replies_by_time() {
        let mut store = ReferenceStore::new();
        let root = note("root", "alice", 1, vec![]);
        let late = reply_to("late", "root", 30);
        let early = note(
            "early",
            "carol",
            10,
            vec![Tag::new(&["e", &hex_id("root"), "", "root"])],
        );
        let mention = note("m", "dave", 5, vec![Tag::new(&["e", &hex_id("root"), "", "mention"])]);
        for ev in [&late, &root, &mention, &early] {
            store.store_event(ev);
        }
        let ctx = store.get_thread_context(&root.id);
        assert_eq!(ctx.replies, vec![early.id.clone(), late.id.clone()]);
        assert_eq!(store.get_thread_context(&late.id).reply_to, Some(root.id.clone()));
        assert_eq!(store.get_thread_context(&early.id).root, Some(root.id.clone()));
        assert_eq!(store.get_incoming_references(&root.id).len(), 3);
    }

    #[test]
    fn repeated_target_keeps_every_kind() {
        let mut store = ReferenceStore::new();
        store.add_reference("x", "y", RefKind::Mention);
        store.add_reference("x", "y", RefKind::Reply);
        store.add_reference("x", "y", RefKind::Root);
        assert_eq!(store.get_outgoing_references("x"), vec!["y"]);
        for kind in [RefKind::Mention, RefKind::Reply, RefKind::Root] {
            assert_eq!(store.get_references_by_type("x", kind), vec!["y"]);
        }
        assert!(store.get_references_by_type("x", RefKind::Topic).is_empty());
    }

    #[test]
    fn same_id_as_root_and_reply() {
        let mut store = ReferenceStore::new();
        let root = note("root", "alice", 1, vec![]);
        let child = note(
            "child",
            "bob",
            2,
            vec![
                Tag::new(&["e", &root.id, "", "root"]),
                Tag::new(&["e", &root.id, "", "reply"]),
            ],
        );
        store.store_event(&child);
        store.store_event(&root);
        let ctx = store.get_thread_context(&child.id);
        assert_eq!(ctx.root, Some(root.id.clone()));
        assert_eq!(ctx.reply_to, Some(root.id.clone()));
        assert_eq!(
            store.get_references_by_type(&child.id, RefKind::Root),
            vec![root.id.clone()]
        );
        assert_eq!(store.get_thread_context(&root.id).replies, vec![child.id.clone()]);
    }

    #[test]
    fn reactions_are_not_listed_as_replies() {
        let mut store = ReferenceStore::new();
        let root = note("root", "alice", 1, vec![]);
        let reply = reply_to("reply", "root", 2);
        let like = reaction("like", "root", "+");
        for ev in [&root, &reply, &like] {
            store.store_event(ev);
        }
        assert_eq!(store.get_incoming_references(&root.id).len(), 2);
        assert_eq!(store.get_thread_context(&root.id).replies, vec![reply.id.clone()]);
    }

    #[test]
    fn clear_note_prunes_backlinks_and_later_promotion() {
        let mut store = ReferenceStore::new();
        let a = note("a", "alice", 1, vec![]);
        let c = note("c", "carol", 3, vec![]);
        let b = note(
            "b",
            "bob",
            2,
            vec![
                Tag::new(&["e", &hex_id("a"), "", "root"]),
                Tag::new(&["e", &hex_id("c"), "", "reply"]),
            ],
        );
        store.store_event(&a);
        store.store_event(&b);
        store.clear_note(&b.id);
        assert!(store.get_outgoing_references(&b.id).is_empty());
        assert!(store.get_incoming_references(&a.id).is_empty());
        // the pending bucket for `c` is untouched but no longer produces a backlink
        assert!(store.is_pending(&c.id));
        store.store_event(&c);
        assert!(store.get_incoming_references(&c.id).is_empty());
        assert!(store.contains(&b.id));
    }

    #[test]
    fn mentions_and_topics() {
        let mut store = ReferenceStore::new();
        let ev = note(
            "a",
            "alice",
            1,
            vec![Tag::new(&["p", &hex_id("bob")]), Tag::new(&["t", "Rust"])],
        );
        store.store_event(&ev);
        assert_eq!(
            store.get_references_by_type(&ev.id, RefKind::Mention),
            vec![hex_id("bob")]
        );
        assert_eq!(store.events_by_topic("RUST"), vec![ev.id.clone()]);
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn unknown_ids_are_empty_and_clear_resets() {
        let mut store = ReferenceStore::new();
        assert!(store.get_outgoing_references("nope").is_empty());
        assert_eq!(store.get_thread_context("nope"), ThreadContext::default());
        store.store_event(&reply_to("b", "a", 2));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.pending_count(), 0);
    }
}
