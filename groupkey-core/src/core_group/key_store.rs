//! Append-only key history with an id → position index
//!
//! `key_map` always maps every stored key id to its index in `keys`, and
//! nothing else. Appends validate the whole batch first and then extend
//! both structures together, so a rejected batch leaves the store as it
//! was.

use super::errors::{GroupError, GroupResult};
use super::types::{GroupKey, GroupKeyId, KeyCursor};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Ordered key history of one group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<GroupKey>", into = "Vec<GroupKey>")]
pub struct KeyStore {
    keys: Vec<GroupKey>,
    key_map: HashMap<GroupKeyId, usize>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append keys in order, indexing each at its new position.
    ///
    /// Returns the number of keys appended. Fails without mutating if any
    /// id is already stored (or repeated in the batch), or if a key is
    /// older than the key before it.
    pub fn append(&mut self, new_keys: impl IntoIterator<Item = GroupKey>) -> GroupResult<usize> {
        let new_keys: Vec<GroupKey> = new_keys.into_iter().collect();

        let mut seen = HashSet::with_capacity(new_keys.len());
        let mut latest = self.keys.last().map(|k| k.time);
        for key in &new_keys {
            if self.key_map.contains_key(&key.group_key_id) || !seen.insert(key.group_key_id.as_str()) {
                return Err(GroupError::DuplicateKeyId(key.group_key_id.clone()));
            }
            if let Some(latest) = latest.filter(|latest| key.time < *latest) {
                return Err(GroupError::KeyOutOfOrder {
                    key_id: key.group_key_id.clone(),
                    time: key.time,
                    latest,
                });
            }
            latest = Some(key.time);
        }

        let appended = new_keys.len();
        self.keys.reserve(appended);
        for key in new_keys {
            trace!(key_id = %key.group_key_id, index = self.keys.len(), "Indexing group key");
            self.key_map.insert(key.group_key_id.clone(), self.keys.len());
            self.keys.push(key);
        }

        metrics::keys_appended(appended);
        Ok(appended)
    }

    /// Position of a key id in the history
    pub fn lookup(&self, id: &str) -> Option<usize> {
        self.key_map.get(id).copied()
    }

    /// Key with the given id
    pub fn get(&self, id: &str) -> Option<&GroupKey> {
        self.lookup(id).and_then(|index| self.keys.get(index))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.key_map.contains_key(id)
    }

    /// Most recently appended key
    pub fn latest(&self) -> GroupResult<&GroupKey> {
        self.keys.last().ok_or(GroupError::EmptyStore)
    }

    /// Cursor of the most recently appended key
    pub fn cursor(&self) -> GroupResult<KeyCursor> {
        self.latest().map(GroupKey::cursor)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GroupKey> {
        self.keys.iter()
    }

    pub fn as_slice(&self) -> &[GroupKey] {
        &self.keys
    }
}

impl TryFrom<Vec<GroupKey>> for KeyStore {
    type Error = GroupError;

    fn try_from(keys: Vec<GroupKey>) -> Result<Self, Self::Error> {
        let mut store = KeyStore::new();
        store.append(keys)?;
        Ok(store)
    }
}

impl From<KeyStore> for Vec<GroupKey> {
    fn from(store: KeyStore) -> Self {
        store.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{make_key, make_keys};
    use proptest::prelude::*;

    fn assert_bijection(store: &KeyStore) {
        assert_eq!(store.key_map.len(), store.keys.len());
        for (i, key) in store.keys.iter().enumerate() {
            assert_eq!(store.lookup(&key.group_key_id), Some(i));
        }
        for index in store.key_map.values() {
            assert!(*index < store.keys.len());
        }
    }

    #[test]
    fn test_append_indexes_new_positions() {
        let mut store = KeyStore::new();
        assert_eq!(store.append(make_keys(3)).unwrap(), 3);
        assert_eq!(store.append(vec![make_key("k-10", 10)]).unwrap(), 1);

        assert_eq!(store.len(), 4);
        assert_eq!(store.lookup("k-10"), Some(3));
        assert_eq!(store.latest().unwrap().group_key_id, "k-10");
        assert_bijection(&store);
    }

    #[test]
    fn test_first_key_is_found_at_index_zero() {
        let store = KeyStore::try_from(make_keys(2)).unwrap();
        assert_eq!(store.lookup("key-0"), Some(0));
        assert!(store.get("key-0").is_some());
    }

    #[test]
    fn test_latest_on_empty_store() {
        let store = KeyStore::new();
        assert!(matches!(store.latest(), Err(GroupError::EmptyStore)));
        assert!(matches!(store.cursor(), Err(GroupError::EmptyStore)));
    }

    #[test]
    fn test_duplicate_rejected_without_mutation() {
        let mut store = KeyStore::try_from(make_keys(2)).unwrap();

        let err = store.append(vec![make_key("k-new", 5), make_key("key-1", 6)]).unwrap_err();
        assert!(matches!(err, GroupError::DuplicateKeyId(id) if id == "key-1"));
        assert_eq!(store.len(), 2);
        assert!(!store.contains("k-new"));
        assert_bijection(&store);

        let err = store.append(vec![make_key("twin", 7), make_key("twin", 8)]).unwrap_err();
        assert!(matches!(err, GroupError::DuplicateKeyId(_)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_out_of_order_time_rejected() {
        let mut store = KeyStore::try_from(vec![make_key("a", 100)]).unwrap();

        let err = store.append(vec![make_key("b", 99)]).unwrap_err();
        assert!(matches!(err, GroupError::KeyOutOfOrder { time: 99, latest: 100, .. }));

        // Equal timestamps are allowed
        store.append(vec![make_key("b", 100)]).unwrap();
        assert_eq!(store.lookup("b"), Some(1));
    }

    #[test]
    fn test_serde_rebuilds_index() {
        let store = KeyStore::try_from(make_keys(4)).unwrap();
        let json = serde_json::to_string(&store).unwrap();
        let back: KeyStore = serde_json::from_str(&json).unwrap();
        assert_bijection(&back);
        assert_eq!(back.lookup("key-3"), Some(3));
    }

    #[test]
    fn test_serde_rejects_duplicate_history() {
        let keys = vec![make_key("x", 1), make_key("x", 2)];
        let json = serde_json::to_string(&keys).unwrap();
        assert!(serde_json::from_str::<KeyStore>(&json).is_err());
    }

    proptest! {
        #[test]
        fn prop_append_keeps_bijection(batches in proptest::collection::vec(0usize..20, 0..8)) {
            let mut store = KeyStore::new();
            let mut next = 0u64;
            for size in batches {
                let batch: Vec<GroupKey> = (0..size)
                    .map(|_| {
                        next += 1;
                        make_key(&format!("k{}", next), next)
                    })
                    .collect();
                store.append(batch).unwrap();
                assert_bijection(&store);
            }
        }
    }
}
