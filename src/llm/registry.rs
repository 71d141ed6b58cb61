//! Tool registry: name -> definition + executor lookup (spec C12).

use super::{Tool, ToolCall, ToolResult};
use crate::error::{GateError, GateErrorKind};
use crate::tools::ToolProvider;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry for managing tools.
///
/// # Example
///
/// ```no_run
/// use chatgate::llm::ToolRegistry;
/// use chatgate::tools::BashTool;
///
/// let registry = ToolRegistry::new().register_all_builtin();
/// let tools = registry.get_tools_for_llm();
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolProvider>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: ToolProvider + 'static>(mut self, tool: T) -> Self {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
        self
    }

    pub fn register_all_builtin(mut self) -> Self {
        for tool in crate::tools::all_tools() {
            let name = tool.name().to_string();
            self.tools.insert(name, tool);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolProvider>> {
        self.tools.get(name)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Full definitions to send to the model.
    pub fn get_tools_for_llm(&self) -> Vec<Tool> {
        self.tools
            .values()
            .map(|provider| Tool {
                name: provider.name().to_string(),
                description: provider.brief().to_string(),
                parameters: provider.parameters(),
                full_description: None,
                security: None,
            })
            .collect()
    }

    /// Validate `call.arguments` against the tool's JSON Schema, if it declares
    /// required properties beyond the permissive default.
    pub fn validate_arguments(&self, call: &ToolCall) -> Result<(), GateError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| {
            GateError::new(GateErrorKind::ToolError, format!("unknown tool '{}'", call.name))
        })?;
        let schema = tool.parameters();
        let compiled = jsonschema::validator_for(&schema).map_err(|e| {
            GateError::new(
                GateErrorKind::InternalError,
                format!("invalid schema for tool '{}': {}", call.name, e),
            )
        })?;
        let errors: Vec<String> = compiled
            .iter_errors(&call.arguments)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GateError::new(
                GateErrorKind::ValidationError,
                format!("arguments for '{}' failed schema validation: {}", call.name, errors.join("; ")),
            ))
        }
    }

    /// Execute a tool call. Returns `None` if the tool is not registered —
    /// the orchestrator treats that as its own `TOOL_ERROR`.
    pub async fn execute(&self, call: &ToolCall) -> Option<ToolResult> {
        let tool = self.tools.get(&call.name)?.clone();
        Some(match tool.execute(call).await {
            Ok(output) => ToolResult {
                tool_call_id: call.id.clone(),
                content: output,
                is_error: false,
            },
            Err(error) => ToolResult {
                tool_call_id: call.id.clone(),
                content: error,
                is_error: true,
            },
        })
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ToolRegistry {
    fn clone(&self) -> Self {
        Self {
            tools: self.tools.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_creation_is_empty() {
        let registry = ToolRegistry::new();
        assert!(registry.tool_names().is_empty());
    }

    #[test]
    fn register_all_builtin_includes_bash() {
        let registry = ToolRegistry::new().register_all_builtin();
        assert!(registry.get("bash").is_some());
    }

    #[test]
    fn get_tools_for_llm_has_bash() {
        let registry = ToolRegistry::new().register_all_builtin();
        let tools = registry.get_tools_for_llm();
        let bash_tool = tools.iter().find(|t| t.name == "bash");
        assert!(bash_tool.is_some());
    }

    #[tokio::test]
    async fn execute_tool_runs_command() {
        use crate::tools::BashTool;

        let registry = ToolRegistry::new().register(BashTool::new());
        let call = ToolCall {
            id: "test".to_string(),
            name: "bash".to_string(),
            arguments: serde_json::json!({"command": "echo hello"}),
        };

        let result = registry.execute(&call).await.unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("hello"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_none() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "test".to_string(),
            name: "unknown".to_string(),
            arguments: serde_json::json!({}),
        };
        assert!(registry.execute(&call).await.is_none());
    }

    #[test]
    fn validate_arguments_rejects_missing_required_field() {
        let registry = ToolRegistry::new().register_all_builtin();
        let call = ToolCall {
            id: "test".to_string(),
            name: "bash".to_string(),
            arguments: serde_json::json!({}),
        };
        assert!(registry.validate_arguments(&call).is_err());
    }

    #[test]
    fn validate_arguments_accepts_well_formed_call() {
        let registry = ToolRegistry::new().register_all_builtin();
        let call = ToolCall {
            id: "test".to_string(),
            name: "bash".to_string(),
            arguments: serde_json::json!({"command": "echo hi"}),
        };
        assert!(registry.validate_arguments(&call).is_ok());
    }
}
