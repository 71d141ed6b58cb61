//! History data model (spec.md §3: HistoryEntry, HistoryKey, ApiCallMetadata).

use crate::llm::{FinishReason, Message, TokenUsage};
use serde::{Deserialize, Serialize};

/// Composite identifier for a stored transcript, derived from a user id and
/// an optional group id. Opaque to storage adapters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryKey {
    pub user_id: String,
    pub group_id: Option<String>,
}

impl HistoryKey {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_id: None,
        }
    }

    pub fn with_group(user_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            group_id: Some(group_id.into()),
        }
    }

    /// Canonical string form used by storage adapters that key by string.
    pub fn as_string(&self) -> String {
        match &self.group_id {
            Some(group) => format!("{}:{}", self.user_id, group),
            None => self.user_id.clone(),
        }
    }
}

/// Metadata describing the remote call that produced (or accompanied) a
/// history entry's message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallMetadata {
    pub model_used: String,
    pub usage: TokenUsage,
    pub cost: Option<f64>,
    #[serde(with = "finish_reason_serde")]
    pub finish_reason: FinishReason,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub request_id: String,
}

/// One message plus optional metadata about the API call that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub message: Message,
    #[serde(rename = "apiCallMetadata", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ApiCallMetadata>,
}

impl HistoryEntry {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            metadata: None,
        }
    }

    pub fn with_metadata(message: Message, metadata: ApiCallMetadata) -> Self {
        Self {
            message,
            metadata: Some(metadata),
        }
    }
}

mod finish_reason_serde {
    use crate::llm::FinishReason;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &FinishReason, s: S) -> Result<S::Ok, S::Error> {
        let text = match value {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(other) => other.as_str(),
        };
        text.to_string().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<FinishReason, D::Error> {
        let text = String::deserialize(d)?;
        Ok(FinishReason::from_wire(Some(&text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_key_as_string_includes_group() {
        let key = HistoryKey::with_group("u1", "g1");
        assert_eq!(key.as_string(), "u1:g1");
    }

    #[test]
    fn history_key_as_string_without_group() {
        let key = HistoryKey::new("u1");
        assert_eq!(key.as_string(), "u1");
    }
}
