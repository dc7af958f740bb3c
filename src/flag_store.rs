//! A thread-safe in-memory storage for compiled flags. [`FlagStore`] provides concurrent access
//! for readers (flag evaluation) and writers (whatever reloads flag definitions from storage).
//!
//! Compiled flags are never mutated. Every change builds a new [`FlagSnapshot`] and swaps it in
//! as a whole, so in-flight evaluations keep reading the snapshot they started with.
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};

use crate::{
    flag::{prepare, CompiledFlag},
    models::Flag,
    Result, Str,
};

/// An immutable set of compiled flags, indexed by id and key.
#[derive(Debug, Clone)]
pub struct FlagSnapshot {
    flags: HashMap<u64, Arc<CompiledFlag>>,
    by_key: HashMap<Str, u64>,
    published_at: DateTime<Utc>,
}

impl Default for FlagSnapshot {
    fn default() -> Self {
        FlagSnapshot {
            flags: HashMap::new(),
            by_key: HashMap::new(),
            published_at: Utc::now(),
        }
    }
}

impl FlagSnapshot {
    fn from_flags(flags: impl IntoIterator<Item = Arc<CompiledFlag>>) -> FlagSnapshot {
        let mut snapshot = FlagSnapshot::default();
        for flag in flags {
            snapshot.insert(flag);
        }
        snapshot
    }

    fn insert(&mut self, flag: Arc<CompiledFlag>) {
        if let Some(previous) = self.flags.get(&flag.id()) {
            let previous_key = previous.key().clone();
            self.release_key(&previous_key, flag.id());
        }
        if !flag.key().is_empty() {
            self.by_key.insert(flag.key().clone(), flag.id());
        }
        self.flags.insert(flag.id(), flag);
    }

    fn remove(&mut self, flag_id: u64) -> Option<Arc<CompiledFlag>> {
        let flag = self.flags.remove(&flag_id)?;
        self.release_key(flag.key(), flag_id);
        Some(flag)
    }

    /// Stop resolving `key` to `flag_id`. If another flag shares the key, the one with the lowest
    /// id takes it over.
    fn release_key(&mut self, key: &Str, flag_id: u64) {
        if self.by_key.get(key) != Some(&flag_id) {
            return;
        }
        let successor = self
            .flags
            .values()
            .filter(|flag| flag.id() != flag_id && flag.key() == key)
            .map(|flag| flag.id())
            .min();
        match successor {
            Some(successor) => {
                self.by_key.insert(key.clone(), successor);
            }
            None => {
                self.by_key.remove(key);
            }
        }
    }

    /// Get flag by id.
    pub fn get(&self, flag_id: u64) -> Option<&Arc<CompiledFlag>> {
        self.flags.get(&flag_id)
    }

    /// Get flag by key.
    pub fn get_by_key(&self, flag_key: &str) -> Option<&Arc<CompiledFlag>> {
        self.by_key
            .get(flag_key)
            .and_then(|flag_id| self.flags.get(flag_id))
    }

    /// Number of flags in the snapshot.
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Iterate over all flags in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledFlag>> {
        self.flags.values()
    }

    /// When this snapshot replaced the previous one.
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }
}

/// `FlagStore` provides a thread-safe (`Sync`) storage for compiled flags that allows concurrent
/// access for readers and writers.
///
/// Writers compile outside of the lock. A flag that fails to compile is never published and the
/// previously published version stays live.
#[derive(Debug, Default)]
pub struct FlagStore {
    snapshot: RwLock<Arc<FlagSnapshot>>,
}

impl FlagStore {
    /// Create a new empty flag store.
    pub fn new() -> Self {
        FlagStore::default()
    }

    /// Get the currently published snapshot.
    pub fn snapshot(&self) -> Arc<FlagSnapshot> {
        // A writer can't panic while holding the lock (it only swaps an Arc), so poisoning is
        // harmless here.
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get a published flag by id.
    pub fn get(&self, flag_id: u64) -> Option<Arc<CompiledFlag>> {
        self.snapshot().get(flag_id).cloned()
    }

    /// Get a published flag by key.
    pub fn get_by_key(&self, flag_key: &str) -> Option<Arc<CompiledFlag>> {
        self.snapshot().get_by_key(flag_key).cloned()
    }

    /// Replace all flags.
    ///
    /// All flags are compiled first. If any of them fails, nothing is published and the error is
    /// returned.
    pub fn publish(&self, flags: &[Flag]) -> Result<()> {
        let compiled = flags
            .iter()
            .map(|flag| prepare_logged(flag).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let snapshot = Arc::new(FlagSnapshot::from_flags(compiled));
        log::debug!(target: "flag_eval", flags = snapshot.len(); "published flag snapshot");
        self.swap(|_| snapshot);
        Ok(())
    }

    /// Compile and publish a single flag, replacing the previous version with the same id.
    pub fn upsert(&self, flag: &Flag) -> Result<Arc<CompiledFlag>> {
        let compiled = Arc::new(prepare_logged(flag)?);
        self.swap(|current| {
            let mut snapshot = FlagSnapshot::clone(current);
            snapshot.insert(compiled.clone());
            snapshot.published_at = Utc::now();
            Arc::new(snapshot)
        });
        log::debug!(target: "flag_eval", flag_id = flag.id, flag_key = flag.key.as_str(); "published flag");
        Ok(compiled)
    }

    /// Unpublish a flag. Returns the removed flag, if any.
    pub fn remove(&self, flag_id: u64) -> Option<Arc<CompiledFlag>> {
        let mut removed = None;
        self.swap(|current| {
            if current.get(flag_id).is_none() {
                return current.clone();
            }
            let mut snapshot = FlagSnapshot::clone(current);
            removed = snapshot.remove(flag_id);
            snapshot.published_at = Utc::now();
            Arc::new(snapshot)
        });
        if removed.is_some() {
            log::debug!(target: "flag_eval", flag_id; "removed flag");
        }
        removed
    }

    fn swap(&self, f: impl FnOnce(&Arc<FlagSnapshot>) -> Arc<FlagSnapshot>) {
        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = f(&slot);
    }
}

fn prepare_logged(flag: &Flag) -> Result<CompiledFlag> {
    prepare(flag).map_err(|err| {
        log::warn!(target: "flag_eval",
                   flag_id = flag.id,
                   flag_key = flag.key.as_str();
                   "failed to prepare flag: {err}");
        err
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::FlagStore;
    use crate::{models::Flag, Entity, Error};

    fn flag(id: u64, key: &str, variant_key: &str) -> Flag {
        serde_json::from_value(json!({
            "id": id,
            "key": key,
            "enabled": true,
            "segments": [{
                "id": id * 10,
                "rank": 0,
                "rolloutPercent": 100,
                "distributions": [{"variantId": 1, "percent": 100}]
            }],
            "variants": [{"id": 1, "key": variant_key}]
        }))
        .unwrap()
    }

    fn broken_flag(id: u64, key: &str) -> Flag {
        let mut flag = flag(id, key, "on");
        flag.segments[0].constraints = vec![crate::models::Constraint::new("age", "GT", "\"x\"")];
        flag
    }

    fn variant_of(store: &FlagStore, key: &str) -> Option<String> {
        store
            .get_by_key(key)?
            .evaluate(&Entity::new("e1", json!({})))
            .unwrap()
            .into_assignment()
            .map(|a| a.variant_key.to_string())
    }

    #[test]
    fn starts_empty() {
        let store = FlagStore::new();
        assert!(store.snapshot().is_empty());
        assert!(store.get(1).is_none());
        assert!(store.get_by_key("a").is_none());
    }

    #[test]
    fn publish_replaces_all_flags() {
        let store = FlagStore::new();
        store
            .publish(&[flag(1, "a", "on"), flag(2, "b", "on")])
            .unwrap();
        assert_eq!(store.snapshot().len(), 2);

        store.publish(&[flag(3, "c", "on")]).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get_by_key("a").is_none());
        assert_eq!(snapshot.get_by_key("c").map(|f| f.id()), Some(3));
    }

    #[test]
    fn failed_publish_keeps_previous_snapshot() {
        let store = FlagStore::new();
        store.publish(&[flag(1, "a", "on")]).unwrap();

        let result = store.publish(&[flag(1, "a", "off"), broken_flag(2, "b")]);
        assert!(matches!(result, Err(Error::UnsupportedValueType { .. })));
        assert!(result.unwrap_err().is_prepare_error());
        assert_eq!(variant_of(&store, "a").as_deref(), Some("on"));
        assert!(store.get(2).is_none());
    }

    #[test]
    fn upsert_replaces_single_flag() {
        let store = FlagStore::new();
        store
            .publish(&[flag(1, "a", "on"), flag(2, "b", "on")])
            .unwrap();
        let before = store.snapshot();

        store.upsert(&flag(1, "a", "off")).unwrap();
        assert_eq!(variant_of(&store, "a").as_deref(), Some("off"));
        assert_eq!(variant_of(&store, "b").as_deref(), Some("on"));

        // Readers holding an older snapshot are unaffected.
        let old = before.get_by_key("a").unwrap();
        let decision = old.evaluate(&Entity::new("e1", json!({}))).unwrap();
        assert_eq!(decision.assignment().unwrap().variant_key.as_ref(), "on");
    }

    #[test]
    fn upsert_handles_key_rename() {
        let store = FlagStore::new();
        store.publish(&[flag(1, "a", "on")]).unwrap();
        store.upsert(&flag(1, "renamed", "on")).unwrap();

        assert!(store.get_by_key("a").is_none());
        assert_eq!(store.get_by_key("renamed").map(|f| f.id()), Some(1));
    }

    #[test]
    fn failed_upsert_keeps_previous_version() {
        let store = FlagStore::new();
        store.publish(&[flag(1, "a", "on")]).unwrap();

        let err = store.upsert(&broken_flag(1, "a")).unwrap_err();
        assert!(err.is_prepare_error());
        assert!(!Error::FlagNotFound.is_prepare_error());
        assert!(!Error::InvalidEntityContext.is_prepare_error());
        assert_eq!(variant_of(&store, "a").as_deref(), Some("on"));
    }

    #[test]
    fn remove_flag() {
        let store = FlagStore::new();
        store
            .publish(&[flag(1, "a", "on"), flag(2, "b", "on")])
            .unwrap();

        assert_eq!(store.remove(1).map(|f| f.id()), Some(1));
        assert!(store.remove(1).is_none());
        assert!(store.get_by_key("a").is_none());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn shared_key_falls_back_to_remaining_flag() {
        let store = FlagStore::new();
        store
            .publish(&[flag(1, "a", "first"), flag(2, "a", "second")])
            .unwrap();
        assert_eq!(store.get_by_key("a").map(|f| f.id()), Some(2));

        store.remove(2);
        assert_eq!(store.get_by_key("a").map(|f| f.id()), Some(1));
        assert_eq!(variant_of(&store, "a").as_deref(), Some("first"));

        store.upsert(&flag(3, "a", "third")).unwrap();
        store.upsert(&flag(3, "b", "third")).unwrap();
        assert_eq!(store.get_by_key("a").map(|f| f.id()), Some(1));
        assert_eq!(store.get_by_key("b").map(|f| f.id()), Some(3));

        store.remove(1);
        assert!(store.get_by_key("a").is_none());
    }

    #[test]
    fn can_publish_from_another_thread() {
        let store = Arc::new(FlagStore::new());

        {
            let store = store.clone();
            std::thread::spawn(move || {
                store.publish(&[flag(1, "a", "on")]).unwrap();
            })
            .join()
            .unwrap();
        }

        assert_eq!(variant_of(&store, "a").as_deref(), Some("on"));
    }

    #[test]
    fn concurrent_readers_see_whole_versions() {
        let store = Arc::new(FlagStore::new());
        store.publish(&[flag(1, "a", "v0")]).unwrap();

        let readers = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let variant = variant_of(&store, "a").unwrap();
                        assert!(variant.starts_with('v'));
                    }
                })
            })
            .collect::<Vec<_>>();

        for i in 1..50 {
            store.upsert(&flag(1, "a", &format!("v{i}"))).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(variant_of(&store, "a").as_deref(), Some("v49"));
    }
}
