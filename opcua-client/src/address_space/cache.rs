//! Cache of resolved child node ids
//!
//! Entries are keyed by `(parent, browse name)`. The whole cache is dropped
//! on reconnection, since a new session may see a different address space.
//! A resolution that started before an invalidation is not stored.

use opcua_core::{NodeId, QualifiedName, StatusCode, UaError, UaResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

type Key = (NodeId, QualifiedName);

#[derive(Debug, Default)]
struct Entries {
    generation: u64,
    nodes: HashMap<Key, NodeId>,
}

#[derive(Debug, Default)]
pub struct NodeCache {
    entries: RwLock<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatistics {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub generation: u64,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, parent: &NodeId, name: &QualifiedName) -> Option<NodeId> {
        let key = (parent.clone(), name.clone());
        let found = self.read().nodes.get(&key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn insert(&self, parent: NodeId, name: QualifiedName, node: NodeId) {
        self.write().nodes.insert((parent, name), node);
    }

    /// Drop every entry
    pub fn invalidate(&self) {
        let mut entries = self.write();
        entries.generation += 1;
        let dropped = entries.nodes.len();
        entries.nodes.clear();
        log::debug!("Node cache invalidated ({} entries, generation {})", dropped, entries.generation);
    }

    /// Drop the children cached below `parent`
    pub fn invalidate_parent(&self, parent: &NodeId) {
        self.write().nodes.retain(|(p, _), _| p != parent);
    }

    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn statistics(&self) -> CacheStatistics {
        let entries = self.read();
        CacheStatistics {
            entries: entries.nodes.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            generation: entries.generation,
        }
    }

    /// Cached child of `parent` named `name`, resolving it on a miss
    ///
    /// # Errors
    ///
    /// Errors from `resolve` are returned unchanged; a child that does not
    /// exist yields `UaError::Service(BadNoMatch)`.
    pub async fn get_or_resolve<F, Fut>(&self, parent: &NodeId, name: &QualifiedName, resolve: F) -> UaResult<NodeId>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = UaResult<Option<NodeId>>>,
    {
        if let Some(node) = self.get(parent, name) {
            return Ok(node);
        }
        let generation = self.read().generation;
        let node = resolve().await?.ok_or(UaError::Service(StatusCode::BAD_NO_MATCH))?;

        let mut entries = self.write();
        if entries.generation == generation {
            entries.nodes.insert((parent.clone(), name.clone()), node.clone());
        } else {
            log::trace!("Not caching {}/{}: invalidated during resolution", parent, name);
        }
        Ok(node)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
