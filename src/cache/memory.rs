//! In-process blob store
//!
//! Lives as long as the value; useful as a volatile tier that must never touch
//! the filesystem, and as a scratch backend in tests.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::cache::store::{StoreBackend, StoreResult};

type Blobs = HashMap<Vec<String>, Vec<u8>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, Blobs>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn owned(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }
}

impl StoreBackend for MemoryStore {
    fn contains(&self, namespace: &str, parts: &[&str]) -> StoreResult<bool> {
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(namespace)
            .is_some_and(|blobs| blobs.contains_key(&Self::owned(parts))))
    }

    fn get(&self, namespace: &str, parts: &[&str]) -> StoreResult<Option<Vec<u8>>> {
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(namespace)
            .and_then(|blobs| blobs.get(&Self::owned(parts)).cloned()))
    }

    fn put(&self, namespace: &str, parts: &[&str], bytes: &[u8]) -> StoreResult<()> {
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(Self::owned(parts), bytes.to_vec());
        Ok(())
    }

    fn remove_all(&self, namespace: &str) -> StoreResult<()> {
        if let Some(blobs) = self.namespaces.write().get_mut(namespace) {
            blobs.clear();
        }
        Ok(())
    }

    fn destroy(&self, namespace: &str) -> StoreResult<()> {
        self.namespaces.write().remove(namespace);
        Ok(())
    }

    fn estimate_size(&self, namespace: &str) -> StoreResult<Option<u64>> {
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(namespace)
            .map(|blobs| blobs.values().map(|b| b.len() as u64).sum()))
    }

    fn describe(&self, namespace: &str) -> String {
        format!("memory://{}", namespace)
    }
}
