//! JSON-file metadata store.
//!
//! ```text
//! <data_dir>/
//!   pools/<pool>.json
//!   catalog/<pool>/<shard set id>.json
//! ```
//!
//! Every document is written to a temp file, synced and renamed over the
//! old one, so a crash leaves either the old or the new record.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::{ShardSet, ShardSetId};
use crate::domain::ports::MetadataStore;
use crate::error::Result;
use crate::pool::types::PoolConfig;

#[derive(Debug, Clone)]
pub struct JsonMetadataStore {
    data_dir: PathBuf,
}

impl JsonMetadataStore {
    /// Open (and create if needed) the store under `data_dir`.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(data_dir.join("pools")).await?;
        fs::create_dir_all(data_dir.join("catalog")).await?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn pool_path(&self, name: &str) -> PathBuf {
        self.data_dir.join("pools").join(format!("{}.json", name))
    }

    fn catalog_dir(&self, pool: &str) -> PathBuf {
        self.data_dir.join("catalog").join(pool)
    }

    fn set_path(&self, pool: &str, id: &ShardSetId) -> PathBuf {
        self.catalog_dir(pool).join(format!("{}.json", id))
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).await?;

    let temp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
    let written = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        fs::rename(&temp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Parse every `*.json` document in `dir`. A missing directory is empty.
async fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut docs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = fs::read(&path).await?;
        match serde_json::from_slice(&raw) {
            Ok(doc) => docs.push(doc),
            Err(e) => {
                warn!("Skipping unreadable metadata file {}: {}", path.display(), e);
            }
        }
    }
    Ok(docs)
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl MetadataStore for JsonMetadataStore {
    async fn load_pools(&self) -> Result<Vec<PoolConfig>> {
        let mut pools: Vec<PoolConfig> = read_all(&self.data_dir.join("pools")).await?;
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pools)
    }

    async fn save_pool(&self, pool: &PoolConfig) -> Result<()> {
        write_json(&self.pool_path(&pool.name), pool).await
    }

    async fn delete_pool(&self, name: &str) -> Result<()> {
        remove_if_present(&self.pool_path(name)).await
    }

    async fn load_shard_sets(&self, pool: &str) -> Result<Vec<ShardSet>> {
        read_all(&self.catalog_dir(pool)).await
    }

    async fn save_shard_set(&self, set: &ShardSet) -> Result<()> {
        write_json(&self.set_path(&set.pool, &set.id), set).await
    }

    async fn delete_shard_set(&self, pool: &str, id: &ShardSetId) -> Result<()> {
        remove_if_present(&self.set_path(pool, id)).await
    }

    async fn delete_pool_catalog(&self, pool: &str) -> Result<()> {
        match fs::remove_dir_all(self.catalog_dir(pool)).await {
            Ok(()) => {
                debug!("Removed catalog of {}", pool);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
