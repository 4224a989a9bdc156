pub mod entry;

use crate::glob::glob_match;
use crate::types::Value;
use entry::{Entry, now_millis};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The keyspace: string keys mapped to expiring values.
///
/// Expiration is a visibility rule applied on read. Expired entries stay in the
/// map until overwritten, but `get`, `has` and `keys` all treat them as absent.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Keyspace {
    data: HashMap<String, Entry>,
}

impl Keyspace {
    pub fn new() -> Self {
        Keyspace {
            data: HashMap::new(),
        }
    }

    /// Get a visible value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.get_entry(key).map(|e| &e.value)
    }

    /// Get a visible entry, including its expiry.
    pub fn get_entry(&self, key: &str) -> Option<&Entry> {
        self.data.get(key).filter(|e| !e.is_expired())
    }

    /// Get a visible entry for in-place mutation.
    pub fn get_entry_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.data.get_mut(key).filter(|e| !e.is_expired())
    }

    /// Store a value, replacing whatever was there. A `ttl_ms` of zero or less
    /// yields an entry that is already expired.
    pub fn set(&mut self, key: impl Into<String>, value: Value, ttl_ms: Option<i64>) {
        let entry = match ttl_ms {
            Some(ttl) => Entry::with_expiry(value, now_millis().saturating_add_signed(ttl)),
            None => Entry::new(value),
        };
        self.data.insert(key.into(), entry);
    }

    /// Insert a prepared entry as-is (used when loading snapshots).
    pub fn insert_entry(&mut self, key: impl Into<String>, entry: Entry) {
        self.data.insert(key.into(), entry);
    }

    pub fn has(&self, key: &str) -> bool {
        self.get_entry(key).is_some()
    }

    /// Visible keys matching a glob pattern, in no particular order.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let now = now_millis();
        self.data
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Every stored entry, expired or not.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.data.iter()
    }

    /// Number of stored entries (includes expired ones).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub type SharedStore = Arc<RwLock<Keyspace>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn string(s: &str) -> Value {
        Value::String(s.as_bytes().to_vec())
    }

    #[test]
    fn test_set_then_get() {
        let mut ks = Keyspace::new();
        ks.set("foo", string("bar"), None);
        assert_eq!(ks.get("foo"), Some(&string("bar")));
        assert!(ks.has("foo"));
        assert_eq!(ks.get("missing"), None);
    }

    #[test]
    fn test_set_overwrites_and_clears_ttl() {
        let mut ks = Keyspace::new();
        ks.set("foo", string("a"), Some(60_000));
        ks.set("foo", string("b"), None);
        let entry = ks.get_entry("foo").unwrap();
        assert_eq!(entry.value, string("b"));
        assert_eq!(entry.expires_at, None);
    }

    #[test]
    fn test_non_positive_ttl_is_absent() {
        let mut ks = Keyspace::new();
        ks.set("zero", string("x"), Some(0));
        ks.set("negative", string("x"), Some(-100));
        assert_eq!(ks.get("zero"), None);
        assert_eq!(ks.get("negative"), None);
        assert!(!ks.has("zero"));
        assert!(ks.keys("*").is_empty());
        assert_eq!(ks.len(), 2);
    }

    #[test]
    fn test_future_ttl_is_visible() {
        let mut ks = Keyspace::new();
        ks.set("foo", string("bar"), Some(60_000));
        assert_eq!(ks.get("foo"), Some(&string("bar")));
    }

    #[test]
    fn test_keys_filters_pattern_and_expiry() {
        let mut ks = Keyspace::new();
        ks.set("user:1", string("a"), None);
        ks.set("user:2", string("b"), None);
        ks.set("order:1", string("c"), None);
        ks.insert_entry("user:3", Entry::with_expiry(string("d"), 1));
        let mut keys = ks.keys("user:*");
        keys.sort();
        assert_eq!(keys, vec!["user:1", "user:2"]);
        assert_eq!(ks.keys("*").len(), 3);
    }
}
