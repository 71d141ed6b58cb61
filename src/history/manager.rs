//! Unified history manager: write-through cache over a storage adapter with
//! TTL eviction (spec C4).

use super::entry::{HistoryEntry, HistoryKey};
use super::storage::HistoryStorage;
use crate::error::GateResult;
use crate::llm::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

struct CachedEntries {
    entries: Vec<HistoryEntry>,
    last_access: Instant,
    created_at: Instant,
}

struct Inner {
    storage: Arc<dyn HistoryStorage>,
    cache: RwLock<HashMap<HistoryKey, CachedEntries>>,
    ttl: Option<Duration>,
}

/// Cache-through layer over a pluggable [`HistoryStorage`] adapter.
///
/// Mirrors the teacher's `tokio::spawn` background-task pattern for its TTL
/// sweep, held behind an abortable [`JoinHandle`] so `close()` can stop it.
pub struct HistoryManager {
    inner: Arc<Inner>,
    sweep_handle: Option<JoinHandle<()>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl HistoryManager {
    pub fn new(
        storage: Arc<dyn HistoryStorage>,
        ttl: Option<Duration>,
        cleanup_interval: Option<Duration>,
    ) -> Self {
        let inner = Arc::new(Inner {
            storage,
            cache: RwLock::new(HashMap::new()),
            ttl,
        });
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let sweep_handle = match (ttl, cleanup_interval) {
            (Some(ttl), Some(interval)) if !interval.is_zero() => {
                let inner = inner.clone();
                let closed = closed.clone();
                Some(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    loop {
                        ticker.tick().await;
                        if closed.load(std::sync::atomic::Ordering::SeqCst) {
                            break;
                        }
                        let now = Instant::now();
                        let mut cache = inner.cache.write().await;
                        cache.retain(|_, cached| now.duration_since(cached.last_access) <= ttl);
                    }
                }))
            }
            _ => None,
        };

        Self {
            inner,
            sweep_handle,
            closed,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn fresh(&self, cached: &CachedEntries) -> bool {
        match self.inner.ttl {
            Some(ttl) => cached.last_access.elapsed() <= ttl,
            None => true,
        }
    }

    /// Returns an owned copy; callers mutating the result never affect the
    /// manager's cache.
    pub async fn get_entries(&self, key: &HistoryKey) -> GateResult<Vec<HistoryEntry>> {
        if self.is_closed() {
            crate::log("history manager: get_entries called after close()");
            return Ok(Vec::new());
        }

        {
            let mut cache = self.inner.cache.write().await;
            if let Some(cached) = cache.get_mut(key) {
                if self.fresh(cached) {
                    cached.last_access = Instant::now();
                    return Ok(cached.entries.clone());
                }
            }
        }

        let entries = self.inner.storage.load(key).await?;
        let mut cache = self.inner.cache.write().await;
        let now = Instant::now();
        cache.insert(
            key.clone(),
            CachedEntries {
                entries: entries.clone(),
                last_access: now,
                created_at: now,
            },
        );
        Ok(entries)
    }

    pub async fn get_messages(&self, key: &HistoryKey) -> GateResult<Vec<Message>> {
        Ok(self
            .get_entries(key)
            .await?
            .into_iter()
            .map(|e| e.message)
            .collect())
    }

    /// Load+cache if needed, append, then save the full resulting list.
    /// On adapter error the cache still reflects the attempted state, but
    /// the error is surfaced to the caller.
    pub async fn add_entries(&self, key: &HistoryKey, new_entries: Vec<HistoryEntry>) -> GateResult<()> {
        if self.is_closed() {
            crate::log("history manager: add_entries called after close()");
            return Ok(());
        }

        let mut existing = self.get_entries(key).await?;
        existing.extend(new_entries);

        {
            let mut cache = self.inner.cache.write().await;
            let now = Instant::now();
            cache.insert(
                key.clone(),
                CachedEntries {
                    entries: existing.clone(),
                    last_access: now,
                    created_at: now,
                },
            );
        }

        self.inner.storage.save(key, &existing).await
    }

    pub async fn clear(&self, key: &HistoryKey) -> GateResult<()> {
        {
            let mut cache = self.inner.cache.write().await;
            let now = Instant::now();
            cache.insert(
                key.clone(),
                CachedEntries {
                    entries: Vec::new(),
                    last_access: now,
                    created_at: now,
                },
            );
        }
        self.inner.storage.save(key, &[]).await
    }

    pub async fn delete(&self, key: &HistoryKey) -> GateResult<()> {
        {
            let mut cache = self.inner.cache.write().await;
            cache.remove(key);
        }
        self.inner.storage.delete(key).await
    }

    pub async fn list_keys(&self) -> GateResult<Vec<HistoryKey>> {
        self.inner.storage.list_keys().await
    }

    /// Stop the TTL sweep, drop the cache, and close the adapter. Idempotent.
    pub async fn close(&mut self) -> GateResult<()> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
        }
        self.inner.cache.write().await.clear();
        self.inner.storage.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::memory_storage::MemoryHistoryStorage;

    #[tokio::test]
    async fn add_entries_suffix_matches_added() {
        let manager = HistoryManager::new(Arc::new(MemoryHistoryStorage::new()), None, None);
        let key = HistoryKey::new("u1");
        manager
            .add_entries(&key, vec![HistoryEntry::new(Message::user("hi"))])
            .await
            .unwrap();
        manager
            .add_entries(&key, vec![HistoryEntry::new(Message::user("again"))])
            .await
            .unwrap();
        let entries = manager.get_entries(&key).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message.content.as_deref(), Some("again"));
    }

    #[tokio::test]
    async fn returned_entries_are_copies() {
        let manager = HistoryManager::new(Arc::new(MemoryHistoryStorage::new()), None, None);
        let key = HistoryKey::new("u1");
        manager
            .add_entries(&key, vec![HistoryEntry::new(Message::user("hi"))])
            .await
            .unwrap();
        let mut entries = manager.get_entries(&key).await.unwrap();
        entries.push(HistoryEntry::new(Message::user("mutated locally")));
        let fresh = manager.get_entries(&key).await.unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn clear_empties_key() {
        let manager = HistoryManager::new(Arc::new(MemoryHistoryStorage::new()), None, None);
        let key = HistoryKey::new("u1");
        manager
            .add_entries(&key, vec![HistoryEntry::new(Message::user("hi"))])
            .await
            .unwrap();
        manager.clear(&key).await.unwrap();
        assert!(manager.get_entries(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_then_operations_return_empty() {
        let mut manager = HistoryManager::new(Arc::new(MemoryHistoryStorage::new()), None, None);
        let key = HistoryKey::new("u1");
        manager
            .add_entries(&key, vec![HistoryEntry::new(Message::user("hi"))])
            .await
            .unwrap();
        manager.close().await.unwrap();
        assert!(manager.get_entries(&key).await.unwrap().is_empty());
    }
}
