//! Storage adapter contract (spec C3).

use super::entry::{HistoryEntry, HistoryKey};
use crate::error::GateResult;
use async_trait::async_trait;

/// Pluggable backend for persisting ordered history entries by key.
///
/// Implementors must return an empty list (never an error) for an absent
/// key, and must hand callers owned copies rather than aliasing internal
/// state.
#[async_trait]
pub trait HistoryStorage: Send + Sync {
    async fn load(&self, key: &HistoryKey) -> GateResult<Vec<HistoryEntry>>;

    /// Replace-all semantics: `entries` becomes the authoritative state for `key`.
    async fn save(&self, key: &HistoryKey, entries: &[HistoryEntry]) -> GateResult<()>;

    async fn delete(&self, key: &HistoryKey) -> GateResult<()>;

    async fn list_keys(&self) -> GateResult<Vec<HistoryKey>>;

    /// Release any resources held by the adapter. Default no-op.
    async fn close(&self) -> GateResult<()> {
        Ok(())
    }
}

/// Detect the legacy bare-message-array shape on disk/wire (spec.md §4.2,
/// §9) by looking at the top-level shape: `role`+`content` siblings instead
/// of a nested `message` object.
pub fn looks_like_legacy_message(value: &serde_json::Value) -> bool {
    value.get("role").is_some() && value.get("content").is_some() && value.get("message").is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_legacy_shape() {
        let legacy = serde_json::json!({"role": "user", "content": "hi"});
        assert!(looks_like_legacy_message(&legacy));
        let current = serde_json::json!({"message": {"role": "user", "content": "hi"}});
        assert!(!looks_like_legacy_message(&current));
    }
}
