//! Built-in tool providers and the tool contract the registry executes against.

pub mod bash;
pub mod editor_edit;

pub use bash::BashTool;
pub use editor_edit::EditorEditTool;

use crate::llm::ToolCall;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A tool a model can call. Implementors describe themselves for the model
/// and the registry (`name`, `brief`, `full_description`, `parameters`) and
/// execute a call's arguments into a result string.
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;
    fn brief(&self) -> &str;
    fn full_description(&self) -> String;
    fn parameters(&self) -> serde_json::Value;
    fn execute<'a>(&'a self, call: &'a ToolCall) -> BoxFuture<'a, Result<String, String>>;
}

/// All tools built into this crate, ready to feed `ToolRegistry::register`.
pub fn all_tools() -> Vec<Arc<dyn ToolProvider>> {
    vec![Arc::new(BashTool::new()), Arc::new(EditorEditTool::new())]
}
