//! Content-deduplicated sub-key map.
//!
//! Many per-user requests come back with byte-identical bodies; only one
//! representative value is kept per distinct body. Sub-keys map to the
//! SHA-1 digest of the raw body, and digests map to the stored value.

use sha1::{Digest, Sha1};
use std::collections::HashMap;

type ContentHash = [u8; 20];

fn content_hash(raw: &[u8]) -> ContentHash {
    Sha1::digest(raw).into()
}

/// Invariant: every digest reachable through `keymap` is present in
/// `content`.
#[derive(Debug, Default)]
pub struct DedupMap<V> {
    keymap: HashMap<String, ContentHash>,
    content: HashMap<ContentHash, V>,
}

impl<V> DedupMap<V> {
    pub fn new() -> Self {
        Self {
            keymap: HashMap::new(),
            content: HashMap::new(),
        }
    }

    /// Stored value for the sub-key, independent of which sub-key first
    /// supplied the content.
    pub fn get(&self, key: &str) -> Option<&V> {
        let digest = self.keymap.get(key)?;
        self.content.get(digest)
    }

    /// Point `key` at the digest of `raw`, storing `value` only if no
    /// value is recorded for that digest yet. The first writer of a
    /// digest wins; later values for the same content are discarded.
    pub fn insert(&mut self, key: impl Into<String>, value: V, raw: &[u8]) {
        let digest = content_hash(raw);
        self.keymap.insert(key.into(), digest);
        self.content.entry(digest).or_insert(value);
    }

    /// Point `key` at the already-stored value for the digest of `raw`.
    /// Returns false (and records nothing) when that content has never
    /// been stored.
    pub fn link(&mut self, key: impl Into<String>, raw: &[u8]) -> bool {
        let digest = content_hash(raw);
        if !self.content.contains_key(&digest) {
            return false;
        }
        self.keymap.insert(key.into(), digest);
        true
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keymap.contains_key(key)
    }

    /// Whether a value for this exact content is already stored.
    pub fn contains_hash(&self, raw: &[u8]) -> bool {
        self.content.contains_key(&content_hash(raw))
    }

    /// Number of sub-keys.
    pub fn len(&self) -> usize {
        self.keymap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keymap.is_empty()
    }

    /// Number of distinct stored bodies.
    pub fn distinct_values(&self) -> usize {
        self.content.len()
    }
}
