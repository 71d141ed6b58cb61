//! On-disk JSON storage adapter: one file per sanitized key.

use super::entry::{HistoryEntry, HistoryKey};
use super::storage::{looks_like_legacy_message, HistoryStorage};
use crate::error::{GateError, GateErrorKind, GateResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "history_";

/// Persists one JSON file per key under `dir`, created lazily on first write.
pub struct DiskHistoryStorage {
    dir: PathBuf,
}

impl DiskHistoryStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn sanitize(raw: &str) -> String {
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ':') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn path_for(&self, key: &HistoryKey) -> PathBuf {
        let sanitized = Self::sanitize(&key.as_string());
        self.dir.join(format!("{FILE_PREFIX}{sanitized}.json"))
    }

    async fn ensure_dir(&self) -> GateResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| GateError::new(GateErrorKind::InternalError, format!("failed to create history dir: {e}")))
    }

    fn parse_entries(raw: &str) -> GateResult<Vec<HistoryEntry>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let array = value
            .as_array()
            .ok_or_else(|| GateError::new(GateErrorKind::InternalError, "history file is not a JSON array"))?;

        let mut entries = Vec::with_capacity(array.len());
        for item in array {
            if looks_like_legacy_message(item) {
                crate::log("history adapter: lifting legacy bare-message entry");
                let message = serde_json::from_value(item.clone())?;
                entries.push(HistoryEntry::new(message));
            } else {
                entries.push(serde_json::from_value(item.clone())?);
            }
        }
        Ok(entries)
    }

    async fn read_file(path: &Path) -> GateResult<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GateError::new(GateErrorKind::InternalError, format!("failed to read history file: {e}"))),
        }
    }
}

#[async_trait]
impl HistoryStorage for DiskHistoryStorage {
    async fn load(&self, key: &HistoryKey) -> GateResult<Vec<HistoryEntry>> {
        let path = self.path_for(key);
        match Self::read_file(&path).await? {
            Some(raw) => Self::parse_entries(&raw),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, key: &HistoryKey, entries: &[HistoryEntry]) -> GateResult<()> {
        self.ensure_dir().await?;
        let path = self.path_for(key);
        let contents = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| GateError::new(GateErrorKind::InternalError, format!("failed to write history file: {e}")))
    }

    async fn delete(&self, key: &HistoryKey) -> GateResult<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GateError::new(GateErrorKind::InternalError, format!("failed to delete history file: {e}"))),
        }
    }

    async fn list_keys(&self) -> GateResult<Vec<HistoryKey>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(GateError::new(GateErrorKind::InternalError, format!("failed to list history dir: {e}"))),
        };
        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| GateError::new(GateErrorKind::InternalError, format!("failed to read dir entry: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_prefix(FILE_PREFIX).and_then(|s| s.strip_suffix(".json")) {
                // Exact recovery of the original key isn't guaranteed by the
                // spec; the sanitized stem is returned as the key's user id.
                keys.push(HistoryKey::new(stem.to_string()));
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskHistoryStorage::new(dir.path());
        let key = HistoryKey::new("user one");
        let entries = vec![HistoryEntry::new(Message::user("hi"))];
        storage.save(&key, &entries).await.unwrap();
        let loaded = storage.load(&key).await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn absent_key_returns_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskHistoryStorage::new(dir.path());
        let key = HistoryKey::new("nope");
        assert!(storage.load(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn legacy_bare_message_array_is_lifted() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskHistoryStorage::new(dir.path());
        let key = HistoryKey::new("legacy");
        storage.ensure_dir().await.unwrap();
        let path = storage.path_for(&key);
        tokio::fs::write(&path, r#"[{"role":"user","content":"hi","tool_call_id":null,"tool_calls":null}]"#)
            .await
            .unwrap();
        let loaded = storage.load(&key).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].metadata.is_none());
    }

    #[test]
    fn key_characters_are_sanitized() {
        assert_eq!(DiskHistoryStorage::sanitize("a/b c*d"), "a_b_c_d");
    }
}
