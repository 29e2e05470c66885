//! Local disk adapter.
//!
//! Each participant's mount is a directory on this host. Shards live at
//! `<mount>/.shardpool/<pool>/<shard set>/<index>.shard` and are written to a
//! temp file, synced, then renamed into place so readers never see a torn
//! copy.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::domain::ports::{ReachabilityProbe, ShardKey, ShardStore};
use crate::error::{Error, Result};
use crate::pool::types::ParticipantId;

/// Directory under each mount that holds shard files.
pub const SHARD_DIR: &str = ".shardpool";

#[derive(Debug, Default)]
pub struct LocalDiskStore {
    /// Overrides for participants whose mount is not their own path here
    roots: DashMap<ParticipantId, PathBuf>,
}

impl LocalDiskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `participant` from `root` instead of its disk mount path.
    pub fn with_root(self, participant: ParticipantId, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(participant, root.into());
        self
    }

    fn root(&self, participant: &ParticipantId) -> PathBuf {
        self.roots
            .get(participant)
            .map(|r| r.clone())
            .unwrap_or_else(|| PathBuf::from(&participant.disk))
    }

    pub fn shard_path(&self, participant: &ParticipantId, key: &ShardKey) -> PathBuf {
        self.root(participant)
            .join(SHARD_DIR)
            .join(key.relative_path())
    }

    /// The mount must exist and be a directory; anything else is treated as
    /// an unreachable participant.
    async fn mounted(&self, participant: &ParticipantId) -> Result<PathBuf> {
        let root = self.root(participant);
        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => Ok(root),
            Ok(_) => Err(Error::transient(participant, "mount is not a directory")),
            Err(e) => Err(Error::transient(participant, e)),
        }
    }
}

#[async_trait]
impl ShardStore for LocalDiskStore {
    async fn write_shard(
        &self,
        location: &ParticipantId,
        key: &ShardKey,
        bytes: Bytes,
    ) -> Result<()> {
        self.mounted(location).await?;
        let path = self.shard_path(location, key);
        let parent = path
            .parent()
            .ok_or_else(|| Error::Internal(format!("shard path {} has no parent", path.display())))?;
        fs::create_dir_all(parent).await?;

        let temp = parent.join(format!(".{}.{}.tmp", key.index, Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            fs::rename(&temp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        debug!("Wrote {} ({} bytes) to {}", key, bytes.len(), path.display());
        Ok(())
    }

    async fn read_shard(&self, location: &ParticipantId, key: &ShardKey) -> Result<Option<Bytes>> {
        self.mounted(location).await?;
        match fs::read(self.shard_path(location, key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_shard(&self, location: &ParticipantId, key: &ShardKey) -> Result<bool> {
        self.mounted(location).await?;
        let path = self.shard_path(location, key);
        let existed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        // drop the set directory once its last shard is gone
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir(parent).await;
        }
        Ok(existed)
    }

    async fn free_bytes(&self, location: &ParticipantId) -> Result<u64> {
        let root = self.mounted(location).await?;
        tokio::task::spawn_blocking(move || available_bytes(&root))
            .await
            .map_err(|e| Error::Internal(format!("statvfs task failed: {}", e)))?
            .map_err(Error::from)
    }
}

#[async_trait]
impl ReachabilityProbe for LocalDiskStore {
    async fn probe(&self, participant: &ParticipantId) -> bool {
        self.mounted(participant).await.is_ok()
    }
}

/// Bytes available to unprivileged writers on the filesystem holding `path`.
#[cfg(unix)]
fn available_bytes(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: statvfs is plain old data; zeroed is a valid initial value
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out pointer
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::unnecessary_cast)]
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn available_bytes(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "free space lookup needs statvfs",
    ))
}
