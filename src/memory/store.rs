use crate::error::AIError;
use crate::memory::types::{MemoryEntry, MemoryId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Durable storage for long-term memory entries.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or replace by id.
    async fn put(&self, entry: MemoryEntry) -> Result<(), AIError>;

    async fn get(&self, id: MemoryId) -> Result<Option<MemoryEntry>, AIError>;

    /// Every entry owned by `agent_id`, expired ones included.
    async fn list(&self, agent_id: &str) -> Result<Vec<MemoryEntry>, AIError>;

    /// Stamp the given entries as accessed at `now` and bump their counters.
    async fn update_access(&self, ids: &[MemoryId], now: DateTime<Utc>) -> Result<(), AIError>;

    /// Returns whether the entry existed.
    async fn delete(&self, id: MemoryId) -> Result<bool, AIError>;

    /// Remove all entries of an agent; returns how many were removed.
    async fn delete_agent(&self, agent_id: &str) -> Result<usize, AIError>;

    /// Drop entries whose TTL has elapsed at `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AIError>;
}

fn touch(entries: &mut HashMap<MemoryId, MemoryEntry>, ids: &[MemoryId], now: DateTime<Utc>) -> usize {
    let mut touched = 0;
    for id in ids {
        if let Some(entry) = entries.get_mut(id) {
            entry.accessed_at = now;
            entry.access_count += 1;
            touched += 1;
        }
    }
    touched
}

fn remove_where(
    entries: &mut HashMap<MemoryId, MemoryEntry>,
    drop: impl Fn(&MemoryEntry) -> bool,
) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !drop(entry));
    before - entries.len()
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    entries: RwLock<HashMap<MemoryId, MemoryEntry>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn put(&self, entry: MemoryEntry) -> Result<(), AIError> {
        self.entries.write().await.insert(entry.id, entry);
        Ok(())
    }

    async fn get(&self, id: MemoryId) -> Result<Option<MemoryEntry>, AIError> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<MemoryEntry>, AIError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn update_access(&self, ids: &[MemoryId], now: DateTime<Utc>) -> Result<(), AIError> {
        touch(&mut *self.entries.write().await, ids, now);
        Ok(())
    }

    async fn delete(&self, id: MemoryId) -> Result<bool, AIError> {
        Ok(self.entries.write().await.remove(&id).is_some())
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<usize, AIError> {
        Ok(remove_where(&mut *self.entries.write().await, |e| e.agent_id == agent_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AIError> {
        Ok(remove_where(&mut *self.entries.write().await, |e| e.is_expired_at(now)))
    }
}

/// JSON file store. The whole file is rewritten on every change through a
/// temporary sibling that is renamed over the target, so a crash leaves either
/// the old or the new contents.
#[derive(Debug)]
pub struct FileMemoryStore {
    path: PathBuf,
    entries: RwLock<HashMap<MemoryId, MemoryEntry>>,
}

impl FileMemoryStore {
    /// Load `path` if it exists; otherwise start empty and create it on first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AIError> {
        let path = path.into();
        let entries = if async_fs::try_exists(&path).await.map_err(storage_error(&path))? {
            let bytes = async_fs::read(&path).await.map_err(storage_error(&path))?;
            let list: Vec<MemoryEntry> = if bytes.iter().all(u8::is_ascii_whitespace) {
                Vec::new()
            } else {
                serde_json::from_slice(&bytes).map_err(|e| {
                    AIError::Storage(format!("corrupt memory file {}: {}", path.display(), e))
                })?
            };
            info!(path = %path.display(), entries = list.len(), "loaded memory store");
            list.into_iter().map(|e| (e.id, e)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `change` on a copy of the entries and install the copy only after it
    /// reached disk. `change` returns its result and whether anything changed.
    async fn commit<T>(
        &self,
        change: impl FnOnce(&mut HashMap<MemoryId, MemoryEntry>) -> (T, bool),
    ) -> Result<T, AIError> {
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        let (result, changed) = change(&mut next);
        if changed {
            self.persist(&next).await?;
            *entries = next;
        }
        Ok(result)
    }

    async fn persist(&self, entries: &HashMap<MemoryId, MemoryEntry>) -> Result<(), AIError> {
        let mut list: Vec<&MemoryEntry> = entries.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let data = serde_json::to_vec_pretty(&list)
            .map_err(|e| AIError::Storage(format!("failed to serialize memory: {}", e)))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            async_fs::create_dir_all(parent)
                .await
                .map_err(storage_error(parent))?;
        }

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_file = PathBuf::from(temp_name);
        async_fs::write(&temp_file, &data)
            .await
            .map_err(storage_error(&temp_file))?;
        async_fs::rename(&temp_file, &self.path)
            .await
            .map_err(storage_error(&self.path))?;

        debug!(path = %self.path.display(), entries = list.len(), bytes = data.len(), "persisted memory store");
        Ok(())
    }
}

fn storage_error(path: &Path) -> impl FnOnce(std::io::Error) -> AIError + '_ {
    move |e| AIError::Storage(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn put(&self, entry: MemoryEntry) -> Result<(), AIError> {
        self.commit(|entries| {
            entries.insert(entry.id, entry);
            ((), true)
        })
        .await
    }

    async fn get(&self, id: MemoryId) -> Result<Option<MemoryEntry>, AIError> {
        Ok(self.entries.read().await.get(&id).cloned())
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<MemoryEntry>, AIError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn update_access(&self, ids: &[MemoryId], now: DateTime<Utc>) -> Result<(), AIError> {
        self.commit(|entries| ((), touch(entries, ids, now) > 0)).await
    }

    async fn delete(&self, id: MemoryId) -> Result<bool, AIError> {
        self.commit(|entries| {
            let existed = entries.remove(&id).is_some();
            (existed, existed)
        })
        .await
    }

    async fn delete_agent(&self, agent_id: &str) -> Result<usize, AIError> {
        self.commit(|entries| {
            let removed = remove_where(entries, |e| e.agent_id == agent_id);
            (removed, removed > 0)
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AIError> {
        self.commit(|entries| {
            let removed = remove_where(entries, |e| e.is_expired_at(now));
            (removed, removed > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("memory.json");

        let store = FileMemoryStore::open(&path).await.unwrap();
        let entry = MemoryEntry::new("agent-1", MemoryType::Preference, "likes tea", 0.8);
        let id = entry.id;
        store.put(entry).await.unwrap();
        store.update_access(&[id], Utc::now()).await.unwrap();
        drop(store);

        let reopened = FileMemoryStore::open(&path).await.unwrap();
        let loaded = reopened.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "likes tea");
        assert_eq!(loaded.access_count, 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_entries_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        let store = FileMemoryStore::open(&path).await.unwrap();
        let kept = MemoryEntry::new("agent-1", MemoryType::Semantic, "kept", 0.5);
        let kept_id = kept.id;
        store.put(kept).await.unwrap();

        // a directory where the temporary file goes makes every write fail
        std::fs::create_dir(dir.path().join("memory.json.tmp")).unwrap();

        let rejected = MemoryEntry::new("agent-1", MemoryType::Semantic, "rejected", 0.5);
        let rejected_id = rejected.id;
        assert!(matches!(store.put(rejected).await, Err(AIError::Storage(_))));
        assert!(store.get(rejected_id).await.unwrap().is_none());

        assert!(store.delete(kept_id).await.is_err());
        assert!(store.update_access(&[kept_id], Utc::now()).await.is_err());
        let still_there = store.get(kept_id).await.unwrap().unwrap();
        assert_eq!(still_there.access_count, 0);
        assert_eq!(store.list("agent-1").await.unwrap().len(), 1);

        let reopened = FileMemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.list("agent-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileMemoryStore::open(&path).await.unwrap_err();
        assert!(matches!(err, AIError::Storage(_)));
    }

    #[tokio::test]
    async fn test_purge_expired_and_delete_agent() {
        let store = InMemoryMemoryStore::new();
        let now = Utc::now();
        let old = now - chrono::Duration::hours(2);
        store
            .put(MemoryEntry::new_at("a", MemoryType::Episodic, "stale", 0.5, old).with_ttl(60))
            .await
            .unwrap();
        store
            .put(MemoryEntry::new_at("a", MemoryType::Semantic, "fresh", 0.5, now))
            .await
            .unwrap();
        store
            .put(MemoryEntry::new_at("b", MemoryType::Semantic, "other", 0.5, now))
            .await
            .unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert_eq!(store.list("a").await.unwrap().len(), 1);
        assert_eq!(store.delete_agent("a").await.unwrap(), 1);
        assert_eq!(store.list("b").await.unwrap().len(), 1);
    }
}
