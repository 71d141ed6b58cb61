//! In-memory map-backed storage adapter.

use super::entry::{HistoryEntry, HistoryKey};
use super::storage::HistoryStorage;
use crate::error::GateResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryHistoryStorage {
    data: Mutex<HashMap<HistoryKey, Vec<HistoryEntry>>>,
}

impl MemoryHistoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStorage for MemoryHistoryStorage {
    async fn load(&self, key: &HistoryKey) -> GateResult<Vec<HistoryEntry>> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(key).cloned().unwrap_or_default())
    }

    async fn save(&self, key: &HistoryKey, entries: &[HistoryEntry]) -> GateResult<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.insert(key.clone(), entries.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &HistoryKey) -> GateResult<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> GateResult<Vec<HistoryKey>> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    #[tokio::test]
    async fn absent_key_returns_empty() {
        let storage = MemoryHistoryStorage::new();
        let key = HistoryKey::new("u1");
        assert!(storage.load(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let storage = MemoryHistoryStorage::new();
        let key = HistoryKey::new("u1");
        let entries = vec![HistoryEntry::new(Message::user("hi"))];
        storage.save(&key, &entries).await.unwrap();
        let loaded = storage.load(&key).await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn delete_clears_key() {
        let storage = MemoryHistoryStorage::new();
        let key = HistoryKey::new("u1");
        storage
            .save(&key, &[HistoryEntry::new(Message::user("hi"))])
            .await
            .unwrap();
        storage.delete(&key).await.unwrap();
        assert!(storage.load(&key).await.unwrap().is_empty());
    }
}
