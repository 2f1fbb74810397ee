// Worker resource caches: which workers hold a copy of a resource cache.
//
// The table lives in memory and is changed through transactions. A
// transaction holds the table lock for its whole lifetime, so concurrent
// callers are serialized and `find_or_create` converges on a single row per
// (resource cache, worker). Dropping a transaction without committing rolls
// it back.

use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceCacheError {
    #[error("worker '{worker_name}' does not provide base resource type '{base_resource_type}'")]
    BaseResourceTypeNotFound {
        worker_name: String,
        base_resource_type: String,
    },
}

/// A resource cache that is in use by some build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedResourceCache {
    pub id: i32,
    pub base_resource_type: String,
}

/// A resource cache as seen from the worker that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResourceCache {
    pub resource_cache: UsedResourceCache,
    /// The worker the cache data originally came from.
    pub worker_name: String,
}

/// A row of the worker resource cache table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedWorkerResourceCache {
    pub id: i32,
    pub resource_cache_id: i32,
    pub worker_name: String,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    last_id: i32,
    rows: Vec<UsedWorkerResourceCache>,
    base_resource_types: HashMap<String, HashSet<String>>,
}

impl Tables {
    fn provides(&self, worker_name: &str, base_resource_type: &str) -> bool {
        self.base_resource_types
            .get(worker_name)
            .is_some_and(|types| types.contains(base_resource_type))
    }
}

#[derive(Debug, Default)]
pub struct WorkerResourceCacheTable {
    tables: Mutex<Tables>,
}

impl WorkerResourceCacheTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `worker_name` provides `base_resource_type`.
    pub fn register_base_resource_type(&self, worker_name: &str, base_resource_type: &str) {
        self.tables
            .lock()
            .base_resource_types
            .entry(worker_name.to_string())
            .or_default()
            .insert(base_resource_type.to_string());
    }

    /// Forget everything `worker_name` provides, e.g. when it leaves the pool.
    pub fn remove_worker(&self, worker_name: &str) {
        self.tables.lock().base_resource_types.remove(worker_name);
    }

    pub fn begin(&self) -> Transaction<'_> {
        let guard = self.tables.lock();
        let working = guard.clone();
        Transaction {
            guard,
            working,
        }
    }

    pub fn len(&self) -> usize {
        self.tables.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Changes to the table that become visible on [`Transaction::commit`].
pub struct Transaction<'a> {
    guard: MutexGuard<'a, Tables>,
    working: Tables,
}

impl Transaction<'_> {
    pub fn commit(mut self) {
        *self.guard = std::mem::take(&mut self.working);
    }

    /// Discard the changes. Same as dropping the transaction.
    pub fn rollback(self) {}
}

impl WorkerResourceCache {
    pub fn new(resource_cache: UsedResourceCache, worker_name: impl Into<String>) -> Self {
        Self {
            resource_cache,
            worker_name: worker_name.into(),
        }
    }

    /// Find the row for this cache on `worker_name`, creating it if needed.
    /// Calling it again for the same worker returns the same row.
    pub fn find_or_create(
        &self,
        tx: &mut Transaction<'_>,
        worker_name: &str,
    ) -> Result<UsedWorkerResourceCache, ResourceCacheError> {
        let tables = &mut tx.working;
        let base_type = &self.resource_cache.base_resource_type;

        if !tables.provides(&self.worker_name, base_type) {
            return Err(ResourceCacheError::BaseResourceTypeNotFound {
                worker_name: self.worker_name.clone(),
                base_resource_type: base_type.clone(),
            });
        }

        if let Some(existing) = tables
            .rows
            .iter()
            .find(|row| row.resource_cache_id == self.resource_cache.id && row.worker_name == worker_name)
        {
            return Ok(existing.clone());
        }

        tables.last_id += 1;
        let row = UsedWorkerResourceCache {
            id: tables.last_id,
            resource_cache_id: self.resource_cache.id,
            worker_name: worker_name.to_string(),
        };
        tables.rows.push(row.clone());

        tracing::debug!(
            target: "tasker::resource_cache",
            id = row.id,
            resource_cache_id = row.resource_cache_id,
            worker = %row.worker_name,
            "created worker resource cache"
        );
        Ok(row)
    }

    /// Find a row for this cache on any worker that still provides the base
    /// resource type. A row on this cache's own worker is preferred.
    pub fn find(&self, tx: &Transaction<'_>) -> Option<UsedWorkerResourceCache> {
        let tables = &tx.working;
        let base_type = &self.resource_cache.base_resource_type;

        let mut candidates = tables.rows.iter().filter(|row| {
            row.resource_cache_id == self.resource_cache.id && tables.provides(&row.worker_name, base_type)
        });

        let first = candidates.next()?;
        if first.worker_name == self.worker_name {
            return Some(first.clone());
        }
        let own = candidates.find(|row| row.worker_name == self.worker_name);
        Some(own.unwrap_or(first).clone())
    }
}
