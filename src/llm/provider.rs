use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Message Types
// ============================================================================

/// Message role in conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Message in conversation history.
///
/// `content` is nullable per the wire contract: an assistant message that
/// only carries tool calls has `content: None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool call ID (for tool-role responses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls made by assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            name: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let content = self.content.as_deref().unwrap_or("");
        match self.role {
            Role::System => write!(f, "System: {}", content),
            Role::User => write!(f, "User: {}", content),
            Role::Assistant => write!(f, "Assistant: {}", content),
            Role::Tool => write!(f, "Tool: {}", content),
        }
    }
}

/// Tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

// ============================================================================
// Tool Definition and Results
// ============================================================================

/// Per-tool security override, resolved by the security gate (spec.md C9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSecurity {
    pub required_role: Option<String>,
    pub required_scopes: Option<Vec<String>>,
    pub rate_limit: Option<crate::security::rate_limit::RateLimit>,
    /// When true, this tool is never run concurrently with other calls of
    /// the same round even if `parallel_tool_calls` is set.
    pub sequential_only: bool,
    /// Extra argument-sanitizer patterns shipped with the tool itself,
    /// checked alongside any patterns configured for this tool by name.
    pub sanitizer_patterns: Option<Vec<String>>,
}

/// Tool definition for function calling.
#[derive(Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema

    /// Full detailed description (not serialized to the model).
    #[serde(skip_serializing, default)]
    pub full_description: Option<String>,

    #[serde(skip_serializing, default)]
    pub security: Option<ToolSecurity>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool").field("name", &self.name).finish()
    }
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        brief: impl Into<String>,
        full_description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: brief.into(),
            parameters,
            full_description: Some(full_description.into()),
            security: None,
        }
    }

    pub fn get_full_description(&self) -> &str {
        self.full_description
            .as_deref()
            .unwrap_or(&self.description)
    }

    /// Strip fields not meant for the model's view of the tool.
    pub fn as_brief(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            full_description: None,
            security: None,
        }
    }
}

/// Tool execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

// ============================================================================
// Helper: Tool Call Assembler
// ============================================================================

/// Assembles parallel tool calls from streaming deltas keyed by index.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    order: Vec<String>,
    calls: HashMap<String, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_delta(
        &mut self,
        id: String,
        name: Option<String>,
        arguments_delta: Option<String>,
    ) {
        if !self.calls.contains_key(&id) {
            self.order.push(id.clone());
        }
        let call = self
            .calls
            .entry(id.clone())
            .or_insert_with(|| PartialToolCall {
                id: id.clone(),
                name: None,
                arguments: String::new(),
            });

        if let Some(n) = name {
            call.name = Some(n);
        }
        if let Some(delta) = arguments_delta {
            call.arguments.push_str(&delta);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Finalize all accumulated calls, preserving first-seen order.
    pub fn into_tool_calls(self) -> Result<Vec<ToolCall>, serde_json::Error> {
        let ToolCallAssembler { order, mut calls } = self;
        order
            .into_iter()
            .map(|id| {
                let partial = calls.remove(&id).expect("order tracks calls map");
                let arguments = if partial.arguments.trim().is_empty() {
                    serde_json::Value::Object(Default::default())
                } else {
                    serde_json::from_str(&partial.arguments)?
                };
                Ok(ToolCall {
                    id: partial.id,
                    name: partial.name.unwrap_or_default(),
                    arguments,
                })
            })
            .collect()
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Token usage statistics for one round.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
    }
}

/// Reason generation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(s: Option<&str>) -> Self {
        match s {
            None => FinishReason::Stop,
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_display_handles_missing_content() {
        let msg = Message {
            role: Role::Assistant,
            content: None,
            name: None,
            tool_call_id: None,
            tool_calls: None,
        };
        assert_eq!(msg.to_string(), "Assistant: ");
    }

    #[test]
    fn tool_call_assembler_preserves_order() {
        let mut assembler = ToolCallAssembler::new();
        assembler.process_delta("call_2".into(), Some("multiply".into()), Some("{}".into()));
        assembler.process_delta("call_1".into(), Some("add".into()), Some("{}".into()));
        let calls = assembler.into_tool_calls().unwrap();
        assert_eq!(calls[0].id, "call_2");
        assert_eq!(calls[1].id, "call_1");
    }

    #[test]
    fn tool_call_assembler_merges_deltas() {
        let mut assembler = ToolCallAssembler::new();
        assembler.process_delta(
            "call_1".to_string(),
            Some("get_weather".to_string()),
            Some(r#"{"city": "#.to_string()),
        );
        assembler.process_delta("call_1".to_string(), None, Some(r#""Tokyo"}"#.to_string()));
        let tool_calls = assembler.into_tool_calls().unwrap();
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "get_weather");
        assert_eq!(tool_calls[0].arguments["city"], "Tokyo");
    }

    #[test]
    fn finish_reason_from_wire_defaults_to_stop() {
        assert_eq!(FinishReason::from_wire(None), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(Some("tool_calls")), FinishReason::ToolCalls);
    }
}
