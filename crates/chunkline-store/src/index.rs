//! Most-recent-first index of stored sessions, shared by both stores.

use chrono::{DateTime, Duration, Utc};
use chunkline_protocol::SnapshotMetadata;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIndex {
    entries: IndexMap<String, SnapshotMetadata>,
}

impl SessionIndex {
    /// Move `key` to the front. Returns keys pushed past `max_entries`.
    pub fn touch(&mut self, key: String, metadata: SnapshotMetadata, max_entries: usize) -> Vec<String> {
        self.entries.shift_remove(&key);
        self.entries.shift_insert(0, key, metadata);

        if self.entries.len() > max_entries {
            self.entries
                .drain(max_entries..)
                .map(|(key, _)| key)
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Drop entries older than `ttl`. Returns their keys.
    pub fn expire(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, metadata)| now - metadata.timestamp > ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.shift_remove(key);
        }
        expired
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn metadata(&self) -> Vec<SnapshotMetadata> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chunkline_protocol::SessionKey;

    use super::*;

    fn meta(content: &str, timestamp: DateTime<Utc>) -> SnapshotMetadata {
        SnapshotMetadata {
            session_key: SessionKey::new(content, "ko"),
            title: content.to_owned(),
            source_lang: "Auto".into(),
            target_lang: "ko".into(),
            timestamp,
            is_refined: false,
            is_partial: false,
        }
    }

    #[test]
    fn touch_moves_to_front_and_evicts_oldest() {
        let now = Utc::now();
        let mut index = SessionIndex::default();
        assert!(index.touch("a".into(), meta("a", now), 2).is_empty());
        assert!(index.touch("b".into(), meta("b", now), 2).is_empty());
        assert!(index.touch("a".into(), meta("a", now), 2).is_empty());

        let evicted = index.touch("c".into(), meta("c", now), 2);
        assert_eq!(evicted, vec!["b".to_owned()]);
        assert_eq!(index.keys().cloned().collect::<Vec<_>>(), vec!["c", "a"]);
    }

    #[test]
    fn expire_drops_old_entries() {
        let now = Utc::now();
        let mut index = SessionIndex::default();
        index.touch("old".into(), meta("old", now - Duration::days(31)), 10);
        index.touch("new".into(), meta("new", now - Duration::days(1)), 10);

        assert_eq!(index.expire(now, Duration::days(30)), vec!["old".to_owned()]);
        assert_eq!(index.len(), 1);
    }
}
