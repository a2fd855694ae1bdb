//! Thread classification of event tags (NIP-10).
//!
//! Markers (`root`, `reply`, `mention`) win when present. Events that carry no
//! markers at all fall back to the deprecated positional convention: the first
//! `e` tag is the root, the last one is the event being replied to.

use serde::Serialize;

use crate::event::{Tag, TagKind};

/// Classification of a reference edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Topic,
    Mention,
    Root,
    Reply,
}

impl RefKind {
    /// Kinds that make the source part of the target's thread.
    pub fn is_thread(self) -> bool {
        matches!(self, RefKind::Root | RefKind::Reply)
    }
}

/// Result of classifying one event's tag list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadTags {
    /// Author pubkeys from `p` tags.
    pub mentions: Vec<String>,
    /// `e` tags that are neither root nor reply.
    pub references: Vec<String>,
    /// Lower-cased `t` tags.
    pub topics: Vec<String>,
    pub root: Option<String>,
    pub reply_to: Option<String>,
}

impl ThreadTags {
    /// Edges to record for the event, strongest first.
    pub fn edges(&self) -> Vec<(String, RefKind)> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            out.push((root.clone(), RefKind::Root));
        }
        if let Some(reply) = &self.reply_to {
            out.push((reply.clone(), RefKind::Reply));
        }
        out.extend(
            self.references
                .iter()
                .chain(self.mentions.iter())
                .map(|id| (id.clone(), RefKind::Mention)),
        );
        out
    }
}

/// Classify `tags` into thread references. Pure and deterministic.
pub fn classify(tags: &[Tag]) -> ThreadTags {
    let mut out = ThreadTags::default();
    let mut saw_marker = false;
    for entry in tags.iter().filter_map(Tag::entry) {
        // Tags without a target never produce anything.
        let Some(target) = entry.target else {
            continue;
        };
        match entry.kind {
            TagKind::EventRef => match entry.marker.as_deref() {
                Some("root") => {
                    saw_marker = true;
                    out.root = Some(target);
                }
                Some("reply") => {
                    saw_marker = true;
                    out.reply_to = Some(target);
                }
                Some("mention") => {
                    saw_marker = true;
                    out.references.push(target);
                }
                _ => out.references.push(target),
            },
            TagKind::AuthorRef => out.mentions.push(target),
            TagKind::Topic => out.topics.push(target.to_lowercase()),
            TagKind::Other(_) => {}
        }
    }
    if !saw_marker {
        positional_fallback(&mut out);
    }
    out
}

/// Deprecated NIP-10 positional form, applied only to marker-free events.
fn positional_fallback(out: &mut ThreadTags) {
    match out.references.len() {
        0 => {}
        1 => out.reply_to = out.references.pop(),
        _ => {
            let last = out.references.pop();
            let first = out.references.remove(0);
            out.root = Some(first);
            out.reply_to = last;
        }
    }
}
