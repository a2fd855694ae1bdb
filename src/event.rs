//! Nostr event model.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Short text note.
pub const KIND_TEXT_NOTE: u32 = 1;
/// `+`/`-`/emoji reaction to another event.
pub const KIND_REACTION: u32 = 7;
/// Lightning zap receipt.
pub const KIND_ZAP_RECEIPT: u32 = 9735;
/// Long-form article.
pub const KIND_LONG_FORM: u32 = 30023;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The ones this crate understands are:
///
/// - `e` – links to another event ID, optionally with a relay hint and a marker
/// - `p` – references another author's public key
/// - `t` – free-form topic or hashtag
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved. For
/// example, `["e", "<id>", "wss://relay", "reply"]` is represented as
/// `Tag(vec!["e".into(), "<id>".into(), "wss://relay".into(), "reply".into()])`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

/// What a tag points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagKind {
    EventRef,
    AuthorRef,
    Topic,
    Other(String),
}

/// Typed view of a [`Tag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    pub kind: TagKind,
    /// `None` when the tag carries no (or an empty) second element.
    pub target: Option<String>,
    pub relay_hint: Option<String>,
    pub marker: Option<String>,
}

impl Tag {
    /// Build a tag from string slices, mostly useful in tests and fixtures.
    pub fn new(fields: &[&str]) -> Self {
        Tag(fields.iter().map(|f| f.to_string()).collect())
    }

    /// Interpret the raw fields. Returns `None` for a tag with no name at all.
    pub fn entry(&self) -> Option<TagEntry> {
        let (name, rest) = self.0.split_first()?;
        let kind = match name.as_str() {
            "e" => TagKind::EventRef,
            "p" => TagKind::AuthorRef,
            "t" => TagKind::Topic,
            other => TagKind::Other(other.to_string()),
        };
        let non_empty = |i: usize| rest.get(i).filter(|s| !s.is_empty()).cloned();
        Some(TagEntry {
            kind,
            target: non_empty(0),
            relay_hint: non_empty(1),
            marker: non_empty(2),
        })
    }

    /// Value of a named single-value tag such as `["title", "..."]`.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        match self.0.as_slice() {
            [n, v, ..] if n == name => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Core Nostr event as delivered by the feed.
///
/// ```json
/// {
///   "id": "aa11...",
///   "pubkey": "bb22...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["e", "cc33...", "", "root"], ["t", "news"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `30023`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Ordered tags; order matters for positional thread classification.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature. Authenticity is checked upstream, never here.
    #[serde(default)]
    pub sig: String,
}

/// Structural problems that keep an event out of the graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event id is not 64 lower-case hex characters: {0:?}")]
    BadId(String),
    #[error("author pubkey is not 64 lower-case hex characters: {0:?}")]
    BadPubkey(String),
    #[error("event id does not match its content hash (expected {expected})")]
    IdMismatch { expected: String },
}

impl Event {
    /// Check the shape of the identifiers. Signatures are out of scope.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_hex64(&self.id) {
            return Err(ValidationError::BadId(self.id.clone()));
        }
        if !is_hex64(&self.pubkey) {
            return Err(ValidationError::BadPubkey(self.pubkey.clone()));
        }
        Ok(())
    }

    /// [`Event::validate`] plus a recomputation of the content hash.
    pub fn validate_strict(&self) -> Result<(), ValidationError> {
        self.validate()?;
        let expected = self.compute_id();
        if expected != self.id {
            return Err(ValidationError::IdMismatch { expected });
        }
        Ok(())
    }

    /// Recompute the NIP-01 event id from its fields.
    pub fn compute_id(&self) -> String {
        let arr = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        // Serializing a `json!` value of plain strings and numbers cannot fail.
        let data = serde_json::to_vec(&arr).unwrap_or_default();
        hex::encode(Sha256::digest(&data))
    }

    /// Iterate over the typed tag entries, skipping nameless tags.
    pub fn tag_entries(&self) -> impl Iterator<Item = TagEntry> + '_ {
        self.tags.iter().filter_map(Tag::entry)
    }

    /// First value of a named tag, if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags.iter().find_map(|t| t.value_of(name))
    }

    pub fn is_reaction(&self) -> bool {
        self.kind == KIND_REACTION || self.kind == KIND_ZAP_RECEIPT
    }
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn entry_reads_marker_and_hint() {
        let tag = Tag::new(&["e", "abc", "wss://r", "reply"]);
        let entry = tag.entry().unwrap();
        assert_eq!(entry.kind, TagKind::EventRef);
        assert_eq!(entry.target.as_deref(), Some("abc"));
        assert_eq!(entry.relay_hint.as_deref(), Some("wss://r"));
        assert_eq!(entry.marker.as_deref(), Some("reply"));
    }

    #[test]
    fn entry_treats_empty_fields_as_absent() {
        let entry = Tag::new(&["e", "", ""]).entry().unwrap();
        assert!(entry.target.is_none());
        assert!(entry.relay_hint.is_none());
        assert!(Tag(vec![]).entry().is_none());
        let other = Tag::new(&["d", "slug"]).entry().unwrap();
        assert_eq!(other.kind, TagKind::Other("d".into()));
    }

    #[test]
    fn validate_checks_identifier_shape() {
        let ev = note("a", "alice", 1, vec![]);
        assert!(ev.validate().is_ok());
        let mut bad = ev.clone();
        bad.id = "ABC".into();
        assert!(matches!(bad.validate(), Err(ValidationError::BadId(_))));
        let mut bad = ev;
        bad.pubkey = "npub1".into();
        assert!(matches!(bad.validate(), Err(ValidationError::BadPubkey(_))));
    }

    #[test]
    fn strict_validation_recomputes_hash() {
        let mut ev = note("a", "alice", 1, vec![Tag::new(&["t", "news"])]);
        assert!(matches!(
            ev.validate_strict(),
            Err(ValidationError::IdMismatch { .. })
        ));
        ev.id = ev.compute_id();
        assert!(ev.validate_strict().is_ok());
    }

    #[test]
    fn deserializes_without_sig() {
        let json = format!(
            r#"{{"id":"{}","pubkey":"{}","kind":1,"created_at":5,"tags":[["t","x"]],"content":"hi"}}"#,
            hex_id("a"),
            hex_id("b")
        );
        let ev: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(ev.sig, "");
        assert_eq!(ev.tag_value("t"), Some("x"));
    }
}
