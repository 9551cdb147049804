use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use chunkline_protocol::{JobError, JobResult, JobSnapshot, JobStore, SessionKey, SnapshotMetadata};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::index::SessionIndex;

pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub max_entries: usize,
    pub ttl: Duration,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: Duration::days(DEFAULT_TTL_DAYS),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

pub(crate) fn storage_error(error: anyhow::Error) -> JobError {
    JobError::Storage(format!("{error:#}"))
}

/// Snapshots as JSON files under `<root>/snapshots`, plus `<root>/index.json`.
///
/// Full saves rewrite the data file and move the session to the front of the
/// index; partial saves only rewrite the data file.
#[derive(Debug)]
pub struct FileJobStore {
    config: StoreConfig,
    index_lock: Mutex<()>,
}

impl FileJobStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            index_lock: Mutex::new(()),
        }
    }

    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::new(StoreConfig::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn index_path(&self) -> PathBuf {
        self.config.root.join("index.json")
    }

    /// Data file for a session. The name is the hex of the storage key so
    /// distinct keys never share a file.
    fn data_path(&self, storage_key: &str) -> PathBuf {
        let file_name: String = storage_key
            .bytes()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        self.config
            .root
            .join("snapshots")
            .join(format!("{file_name}.json"))
    }

    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create store dir {parent:?}"))?;
        }
        Ok(())
    }

    /// Write through a temp file so readers never see a torn snapshot.
    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
        Self::ensure_parent(path).await?;
        let payload = serde_json::to_vec_pretty(value).context("failed serializing store file")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, payload)
            .await
            .with_context(|| format!("failed writing {tmp:?}"))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed replacing {path:?}"))?;
        Ok(())
    }

    async fn read_index(&self) -> Result<SessionIndex> {
        let path = self.index_path();
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(SessionIndex::default());
        }
        let raw = fs::read(&path)
            .await
            .with_context(|| format!("failed reading index {path:?}"))?;
        serde_json::from_slice(&raw).with_context(|| format!("failed parsing index {path:?}"))
    }

    async fn remove_data(&self, storage_key: &str) -> Result<()> {
        let path = self.data_path(storage_key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).with_context(|| format!("failed removing {path:?}")),
        }
    }

    /// Drop expired index entries and their data files.
    async fn clean_expired(&self) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        let expired = index.expire(Utc::now(), self.config.ttl);
        if expired.is_empty() {
            return Ok(());
        }
        for key in &expired {
            self.remove_data(key).await?;
        }
        Self::write_json(&self.index_path(), &index).await?;
        info!(count = expired.len(), "expired snapshots removed");
        Ok(())
    }

    async fn load_inner(&self, session_key: &SessionKey) -> Result<Option<JobSnapshot>> {
        if let Err(error) = self.clean_expired().await {
            warn!(error = %format!("{error:#}"), "expiry sweep failed");
        }

        let path = self.data_path(&session_key.storage_key());
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let raw = fs::read(&path)
            .await
            .with_context(|| format!("failed reading snapshot {path:?}"))?;
        let snapshot: JobSnapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("failed parsing snapshot {path:?}"))?;
        if snapshot.session_key != *session_key {
            warn!(
                requested = %session_key,
                stored = %snapshot.session_key,
                "snapshot belongs to another session"
            );
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    async fn save_full_inner(&self, session_key: &SessionKey, snapshot: &JobSnapshot) -> Result<()> {
        let storage_key = session_key.storage_key();
        Self::write_json(&self.data_path(&storage_key), snapshot).await?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        let evicted = index.touch(storage_key, snapshot.metadata(), self.config.max_entries);
        for key in &evicted {
            self.remove_data(key).await?;
        }
        Self::write_json(&self.index_path(), &index).await?;
        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted oldest snapshots");
        }
        Ok(())
    }

    async fn delete_inner(&self, session_key: &SessionKey) -> Result<()> {
        let storage_key = session_key.storage_key();
        self.remove_data(&storage_key).await?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        if index.remove(&storage_key) {
            Self::write_json(&self.index_path(), &index).await?;
        }
        Ok(())
    }

    async fn list_inner(&self) -> Result<Vec<SnapshotMetadata>> {
        self.clean_expired().await?;
        let _guard = self.index_lock.lock().await;
        Ok(self.read_index().await?.metadata())
    }

    /// Remove every indexed snapshot and the index itself.
    #[instrument(skip(self), fields(root = ?self.config.root))]
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.index_lock.lock().await;
        let index = self.read_index().await?;
        for key in index.keys() {
            self.remove_data(key).await?;
        }
        let index_path = self.index_path();
        if fs::try_exists(&index_path).await.unwrap_or(false) {
            fs::remove_file(&index_path)
                .await
                .with_context(|| format!("failed removing index {index_path:?}"))?;
        }
        info!(count = index.len(), "store cleared");
        Ok(index.len())
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.list_inner().await?.len())
    }

    /// Bytes used by the index and every indexed snapshot.
    pub async fn storage_bytes(&self) -> Result<u64> {
        let _guard = self.index_lock.lock().await;
        let index = self.read_index().await?;
        let mut paths = vec![self.index_path()];
        paths.extend(index.keys().map(|key| self.data_path(key)));

        let mut total = 0_u64;
        for path in paths {
            if let Ok(metadata) = fs::metadata(&path).await {
                total += metadata.len();
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    #[instrument(skip(self), fields(session = %session_key))]
    async fn load(&self, session_key: &SessionKey) -> JobResult<Option<JobSnapshot>> {
        self.load_inner(session_key).await.map_err(storage_error)
    }

    #[instrument(skip(self, snapshot), fields(session = %session_key, completed = snapshot.completed_chunk_count))]
    async fn save_full(&self, session_key: &SessionKey, snapshot: &JobSnapshot) -> JobResult<()> {
        self.save_full_inner(session_key, snapshot)
            .await
            .map_err(storage_error)?;
        debug!("snapshot saved and indexed");
        Ok(())
    }

    #[instrument(skip(self, snapshot), fields(session = %session_key, completed = snapshot.completed_chunk_count))]
    async fn save_partial(&self, session_key: &SessionKey, snapshot: &JobSnapshot) -> JobResult<()> {
        Self::write_json(&self.data_path(&session_key.storage_key()), snapshot)
            .await
            .map_err(storage_error)?;
        debug!("partial snapshot saved");
        Ok(())
    }

    #[instrument(skip(self), fields(session = %session_key))]
    async fn delete(&self, session_key: &SessionKey) -> JobResult<()> {
        self.delete_inner(session_key).await.map_err(storage_error)
    }

    async fn list_all(&self) -> JobResult<Vec<SnapshotMetadata>> {
        self.list_inner().await.map_err(storage_error)
    }
}
