//! File Catalog
//!
//! Maps logical object names to their ShardSet and current shard locations.
//! Every mutation is written through to the [`MetadataStore`] before the
//! in-memory view changes, so a crash never leaves the view ahead of disk.
//! Mutations of one pool are serialized; reads never wait on them.

mod shard_set;

pub use shard_set::{ObjectHealth, Shard, ShardHealth, ShardSet, ShardSetId, ShardStatus};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::domain::ports::MetadataStore;
use crate::error::{Error, Result};
use crate::pool::types::ParticipantId;

/// Catalog contents of one pool.
#[derive(Debug, Default)]
struct PoolCatalog {
    /// object name -> shard set
    objects: BTreeMap<String, ShardSetId>,
    sets: HashMap<ShardSetId, ShardSet>,
}

impl PoolCatalog {
    fn insert(&mut self, set: ShardSet) -> Option<ShardSet> {
        let previous = self
            .objects
            .insert(set.object.clone(), set.id)
            .filter(|old| *old != set.id)
            .and_then(|old| self.sets.remove(&old));
        self.sets.insert(set.id, set);
        previous
    }
}

/// Object name → ShardSet index, persisted through a [`MetadataStore`].
pub struct FileCatalog {
    pools: DashMap<String, Arc<RwLock<PoolCatalog>>>,
    write_gates: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    store: Arc<dyn MetadataStore>,
}

impl FileCatalog {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            pools: DashMap::new(),
            write_gates: DashMap::new(),
            store,
        }
    }

    fn pool(&self, pool: &str) -> Arc<RwLock<PoolCatalog>> {
        self.pools
            .entry(pool.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(PoolCatalog::default())))
            .clone()
    }

    fn gate(&self, pool: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_gates
            .entry(pool.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Start an empty catalog for a new pool. Commits are refused for pools
    /// that were never opened or loaded, or that were purged.
    pub fn open_pool(&self, pool: &str) {
        self.pool(pool);
    }

    /// Load a pool's catalog from the metadata store.
    #[instrument(skip(self))]
    pub async fn load(&self, pool: &str) -> Result<usize> {
        let sets = self.store.load_shard_sets(pool).await?;
        let count = sets.len();

        let catalog = self.pool(pool);
        let mut guard = catalog.write();
        *guard = PoolCatalog::default();
        for set in sets {
            if let Some(stale) = guard.insert(set) {
                warn!(
                    "Catalog for {} holds two shard sets for {}; keeping the newer record",
                    pool, stale.object
                );
            }
        }

        info!("Loaded {} shard sets for pool {}", count, pool);
        Ok(count)
    }

    /// Make a fully written ShardSet visible. Returns the set it replaced.
    #[instrument(skip(self, set), fields(pool = %set.pool, object = %set.object, shard_set = %set.id))]
    pub async fn commit(&self, set: ShardSet) -> Result<Option<ShardSet>> {
        set.check_distinct()?;

        let gate = self.gate(&set.pool);
        let _held = gate.lock().await;

        let pool = set.pool.clone();
        let catalog = self
            .pools
            .get(&pool)
            .map(|c| c.clone())
            .ok_or_else(|| Error::PoolNotFound(pool.clone()))?;

        self.store.save_shard_set(&set).await?;

        let previous = catalog.write().insert(set);
        if let Some(old) = &previous {
            self.store.delete_shard_set(&pool, &old.id).await?;
            debug!("Replaced shard set {} of {}", old.id, old.object);
        }
        Ok(previous)
    }

    pub fn get(&self, pool: &str, object: &str) -> Option<ShardSet> {
        let catalog = self.pools.get(pool)?.clone();
        let guard = catalog.read();
        let id = guard.objects.get(object)?;
        guard.sets.get(id).cloned()
    }

    pub fn get_set(&self, pool: &str, id: &ShardSetId) -> Option<ShardSet> {
        let catalog = self.pools.get(pool)?.clone();
        let guard = catalog.read();
        guard.sets.get(id).cloned()
    }

    /// Forget an object. Its shards become garbage for the caller to delete.
    #[instrument(skip(self))]
    pub async fn remove(&self, pool: &str, object: &str) -> Result<ShardSet> {
        let gate = self.gate(pool);
        let _held = gate.lock().await;

        let set = self.get(pool, object).ok_or_else(|| Error::ObjectNotFound {
            pool: pool.to_string(),
            object: object.to_string(),
        })?;

        self.store.delete_shard_set(pool, &set.id).await?;

        let catalog = self.pool(pool);
        let mut guard = catalog.write();
        guard.objects.remove(object);
        guard.sets.remove(&set.id);
        Ok(set)
    }

    /// All ShardSets of a pool ordered by object name.
    pub fn list(&self, pool: &str) -> Vec<ShardSet> {
        let Some(catalog) = self.pools.get(pool).map(|c| c.clone()) else {
            return Vec::new();
        };
        let guard = catalog.read();
        guard
            .objects
            .values()
            .filter_map(|id| guard.sets.get(id).cloned())
            .collect()
    }

    pub fn object_count(&self, pool: &str) -> usize {
        self.pools
            .get(pool)
            .map(|c| c.read().objects.len())
            .unwrap_or(0)
    }

    pub fn logical_bytes(&self, pool: &str) -> u64 {
        self.pools
            .get(pool)
            .map(|c| c.read().sets.values().map(|s| s.object_size).sum())
            .unwrap_or(0)
    }

    /// Point shard `index` at `to`, provided it still lives on `from`.
    #[instrument(skip(self))]
    pub async fn relocate_shard(
        &self,
        pool: &str,
        id: &ShardSetId,
        index: usize,
        from: &ParticipantId,
        to: &ParticipantId,
    ) -> Result<ShardSet> {
        let gate = self.gate(pool);
        let _held = gate.lock().await;

        let mut set = self.current(pool, id)?;
        let shard = set.shards.get_mut(index).ok_or_else(|| {
            Error::Internal(format!("shard set {} has no shard {}", id, index))
        })?;
        if &shard.location != from {
            return Err(Error::Internal(format!(
                "shard {}#{} moved to {} meanwhile",
                id, index, shard.location
            )));
        }
        shard.location = to.clone();
        shard.status = ShardStatus::Present;
        set.touch();
        set.check_distinct()?;

        self.store.save_shard_set(&set).await?;
        self.pool(pool).write().sets.insert(set.id, set.clone());
        Ok(set)
    }

    /// Record a shard's status, e.g. `Missing` after a failed read.
    pub async fn mark_status(
        &self,
        pool: &str,
        id: &ShardSetId,
        index: usize,
        status: ShardStatus,
    ) -> Result<()> {
        let gate = self.gate(pool);
        let _held = gate.lock().await;

        let mut set = self.current(pool, id)?;
        match set.shards.get_mut(index) {
            Some(shard) if shard.status != status => shard.status = status,
            Some(_) => return Ok(()),
            None => {
                return Err(Error::Internal(format!(
                    "shard set {} has no shard {}",
                    id, index
                )))
            }
        }
        set.touch();

        self.store.save_shard_set(&set).await?;
        self.pool(pool).write().sets.insert(set.id, set);
        Ok(())
    }

    /// Drop every record of a pool, returning what was orphaned.
    #[instrument(skip(self))]
    pub async fn purge_pool(&self, pool: &str) -> Result<Vec<ShardSet>> {
        let gate = self.gate(pool);
        let held = gate.lock().await;

        self.store.delete_pool_catalog(pool).await?;
        let orphaned = self
            .pools
            .remove(pool)
            .map(|(_, c)| c.read().sets.values().cloned().collect())
            .unwrap_or_default();
        drop(held);
        self.write_gates.remove(pool);
        Ok(orphaned)
    }

    fn current(&self, pool: &str, id: &ShardSetId) -> Result<ShardSet> {
        self.get_set(pool, id)
            .ok_or_else(|| Error::Internal(format!("shard set {} not in pool {}", id, pool)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryMetadataStore;
    use crate::ec::ErasureCodec;
    use assert_matches::assert_matches;

    fn targets(n: usize) -> Vec<ParticipantId> {
        (0..n)
            .map(|i| ParticipantId::new(format!("n{}", i), "/d"))
            .collect()
    }

    fn make_set(pool: &str, object: &str) -> ShardSet {
        let codec = ErasureCodec::new(2, 1).unwrap();
        let encoded = codec.encode(object.as_bytes()).unwrap();
        ShardSet::from_encoded(pool, object, &encoded, &targets(3), 2, 1).unwrap()
    }

    fn catalog() -> (FileCatalog, Arc<InMemoryMetadataStore>) {
        let store = Arc::new(InMemoryMetadataStore::new());
        let catalog = FileCatalog::new(store.clone());
        catalog.open_pool("p");
        (catalog, store)
    }

    #[tokio::test]
    async fn test_commit_and_get() {
        let (catalog, store) = catalog();
        let set = make_set("p", "a.txt");
        assert!(catalog.commit(set.clone()).await.unwrap().is_none());

        assert_eq!(catalog.get("p", "a.txt"), Some(set.clone()));
        assert_eq!(catalog.object_count("p"), 1);
        assert_eq!(store.load_shard_sets("p").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_returns_previous() {
        let (catalog, store) = catalog();
        let first = make_set("p", "a.txt");
        let second = make_set("p", "a.txt");
        catalog.commit(first.clone()).await.unwrap();

        let replaced = catalog.commit(second.clone()).await.unwrap();
        assert_eq!(replaced.map(|s| s.id), Some(first.id));
        assert_eq!(catalog.get("p", "a.txt").map(|s| s.id), Some(second.id));
        assert_eq!(store.load_shard_sets("p").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_object() {
        let (catalog, _) = catalog();
        assert_matches!(
            catalog.remove("p", "nope").await,
            Err(Error::ObjectNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let (catalog, _) = catalog();
        for name in ["c", "a", "b"] {
            catalog.commit(make_set("p", name)).await.unwrap();
        }
        let names: Vec<_> = catalog.list("p").into_iter().map(|s| s.object).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_relocate_requires_current_source() {
        let (catalog, _) = catalog();
        let set = make_set("p", "a");
        catalog.commit(set.clone()).await.unwrap();

        let new_home = ParticipantId::new("n9", "/d");
        let moved = catalog
            .relocate_shard("p", &set.id, 1, &targets(3)[1], &new_home)
            .await
            .unwrap();
        assert_eq!(moved.shards[1].location, new_home);
        assert_eq!(moved.generation, set.generation + 1);

        // stale source
        assert!(catalog
            .relocate_shard("p", &set.id, 1, &targets(3)[1], &new_home)
            .await
            .is_err());
        // would put two shards on one participant
        assert!(catalog
            .relocate_shard("p", &set.id, 0, &targets(3)[0], &targets(3)[2])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_mark_status_and_reload() {
        let (catalog, store) = catalog();
        let set = make_set("p", "a");
        catalog.commit(set.clone()).await.unwrap();
        catalog
            .mark_status("p", &set.id, 2, ShardStatus::Missing)
            .await
            .unwrap();

        let reloaded = FileCatalog::new(store);
        assert_eq!(reloaded.load("p").await.unwrap(), 1);
        let got = reloaded.get("p", "a").unwrap();
        assert_eq!(got.shards[2].status, ShardStatus::Missing);
    }

    #[tokio::test]
    async fn test_purge_pool() {
        let (catalog, store) = catalog();
        catalog.commit(make_set("p", "a")).await.unwrap();
        catalog.commit(make_set("p", "b")).await.unwrap();

        let orphaned = catalog.purge_pool("p").await.unwrap();
        assert_eq!(orphaned.len(), 2);
        assert_eq!(catalog.object_count("p"), 0);
        assert!(store.load_shard_sets("p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_refuses_unknown_or_purged_pool() {
        let (catalog, store) = catalog();
        assert_matches!(
            catalog.commit(make_set("ghost", "a")).await,
            Err(Error::PoolNotFound(_))
        );

        catalog.purge_pool("p").await.unwrap();
        assert_matches!(
            catalog.commit(make_set("p", "late")).await,
            Err(Error::PoolNotFound(_))
        );
        assert_eq!(catalog.object_count("p"), 0);
        assert!(store.load_shard_sets("p").await.unwrap().is_empty());
    }
}
