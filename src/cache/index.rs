//! Secondary index of live keys per namespace.
//!
//! Used for prefix sweeps when the backend cannot enumerate its own keys.
//! The index may hold keys the backend already expired or evicted; deleting
//! those during a sweep is a no-op.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::index";

#[derive(Default)]
pub struct KeyIndex {
    namespaces: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, namespace: &str, key: &str) {
        let mut namespaces = mutex_lock(&self.namespaces, SOURCE, "record");
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string());
    }

    pub fn forget(&self, namespace: &str, key: &str) {
        let mut namespaces = mutex_lock(&self.namespaces, SOURCE, "forget");
        if let Some(keys) = namespaces.get_mut(namespace) {
            keys.remove(key);
            if keys.is_empty() {
                namespaces.remove(namespace);
            }
        }
    }

    pub fn keys(&self, namespace: &str) -> Vec<String> {
        mutex_lock(&self.namespaces, SOURCE, "keys")
            .get(namespace)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, namespace: &str) {
        mutex_lock(&self.namespaces, SOURCE, "clear").remove(namespace);
    }

    pub fn len(&self, namespace: &str) -> usize {
        mutex_lock(&self.namespaces, SOURCE, "len")
            .get(namespace)
            .map_or(0, BTreeSet::len)
    }
}
