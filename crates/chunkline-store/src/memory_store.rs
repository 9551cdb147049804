use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use chunkline_protocol::{JobResult, JobSnapshot, JobStore, SessionKey, SnapshotMetadata};
use parking_lot::Mutex;

use crate::file_store::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL_DAYS};
use crate::index::SessionIndex;

#[derive(Debug, Default)]
struct State {
    data: HashMap<String, JobSnapshot>,
    index: SessionIndex,
}

impl State {
    fn sweep(&mut self, ttl: Duration) {
        for key in self.index.expire(Utc::now(), ttl) {
            self.data.remove(&key);
        }
    }
}

/// In-process store with the same index rules as [`crate::FileJobStore`].
#[derive(Debug)]
pub struct MemoryJobStore {
    state: Mutex<State>,
    max_entries: usize,
    ttl: Duration,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, Duration::days(DEFAULT_TTL_DAYS))
    }
}

impl MemoryJobStore {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_entries,
            ttl,
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.data.clear();
        state.index = SessionIndex::default();
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self, session_key: &SessionKey) -> JobResult<Option<JobSnapshot>> {
        let mut state = self.state.lock();
        state.sweep(self.ttl);
        Ok(state.data.get(&session_key.storage_key()).cloned())
    }

    async fn save_full(&self, session_key: &SessionKey, snapshot: &JobSnapshot) -> JobResult<()> {
        let storage_key = session_key.storage_key();
        let mut state = self.state.lock();
        state.data.insert(storage_key.clone(), snapshot.clone());
        let evicted = state
            .index
            .touch(storage_key, snapshot.metadata(), self.max_entries);
        for key in evicted {
            state.data.remove(&key);
        }
        Ok(())
    }

    async fn save_partial(&self, session_key: &SessionKey, snapshot: &JobSnapshot) -> JobResult<()> {
        self.state
            .lock()
            .data
            .insert(session_key.storage_key(), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, session_key: &SessionKey) -> JobResult<()> {
        let storage_key = session_key.storage_key();
        let mut state = self.state.lock();
        state.data.remove(&storage_key);
        state.index.remove(&storage_key);
        Ok(())
    }

    async fn list_all(&self) -> JobResult<Vec<SnapshotMetadata>> {
        let mut state = self.state.lock();
        state.sweep(self.ttl);
        Ok(state.index.metadata())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    fn snapshot(key: &SessionKey) -> JobSnapshot {
        JobSnapshot {
            session_key: key.clone(),
            translations: Vec::new(),
            is_partial: true,
            completed_chunk_count: 1,
            transcript_fingerprint: String::new(),
            source_chunk_checkpoints: Vec::new(),
            is_refined: false,
            title: "Unknown".into(),
            source_lang: "Auto".into(),
            target_lang: key.target_lang.clone(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn mirrors_index_rules() -> Result<()> {
        let store = MemoryJobStore::new(1, Duration::days(30));
        let a = SessionKey::new("a", "ko");
        let b = SessionKey::new("b", "ko");

        store.save_partial(&a, &snapshot(&a)).await?;
        assert!(store.list_all().await?.is_empty());
        assert!(store.load(&a).await?.is_some());

        store.save_full(&a, &snapshot(&a)).await?;
        store.save_full(&b, &snapshot(&b)).await?;
        assert!(store.load(&a).await?.is_none());
        assert_eq!(store.list_all().await?.len(), 1);

        store.delete(&b).await?;
        assert!(store.list_all().await?.is_empty());
        Ok(())
    }
}
