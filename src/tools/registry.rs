//! Tool Registry (§4.1): every tool the LLM Driver can invoke lives behind
//! one `Tool` trait object, looked up by name. A `HashMap` alone would let
//! the catalog serialize in a different order every run, which would
//! invalidate the provider's prompt cache on the static tool-catalog
//! breakpoint (§4.5 step 1); this keeps an insertion-ordered `Vec<String>`
//! alongside the map so `api_definitions()` is stable across runs, unlike
//! the teacher's `llm/tools.rs`, which dispatches out of a bare `HashMap`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, input: Value) -> ToolResult<Value>;
}

#[derive(Debug, Clone, Default)]
struct ToolStats {
    call_count: u64,
    error_count: u64,
}

pub struct ToolRegistry {
    order: RwLock<Vec<String>>,
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    stats: RwLock<HashMap<String, ToolStats>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            order: RwLock::new(Vec::new()),
            tools: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a tool, preserving first-seen insertion order. Registering
    /// the same name twice replaces the implementation without moving its
    /// position in the catalog.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut order = self.order.write().unwrap();
        if !order.contains(&name) {
            order.push(name.clone());
        }
        self.tools.write().unwrap().insert(name.clone(), tool);
        self.stats.write().unwrap().entry(name).or_default();
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    /// The tool catalog in stable, insertion order — what goes into the
    /// outbound LLM request's `tools` field.
    pub fn api_definitions(&self) -> Vec<Value> {
        let order = self.order.read().unwrap();
        let tools = self.tools.read().unwrap();
        order
            .iter()
            .filter_map(|name| tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "input_schema": tool.parameters_schema(),
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, input: Value) -> ToolResult<Value> {
        let tool = self.get(name).ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        let outcome = tool.execute(input).await;
        let mut stats = self.stats.write().unwrap();
        let entry = stats.entry(name.to_string()).or_default();
        entry.call_count += 1;
        if outcome.is_err() {
            entry.error_count += 1;
        }
        outcome
    }

    pub fn call_count(&self, name: &str) -> u64 {
        self.stats.read().unwrap().get(name).map(|s| s.call_count).unwrap_or(0)
    }

    pub fn error_count(&self, name: &str) -> u64 {
        self.stats.read().unwrap().get(name).map(|s| s.error_count).unwrap_or(0)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.read().unwrap().clone()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input back"
        }
        fn parameters_schema(&self) -> Value {
            crate::tools::schema_object(&[("text", "string", "text to echo", true)])
        }
        async fn execute(&self, input: Value) -> ToolResult<Value> {
            Ok(input)
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> Value {
            crate::tools::schema_object(&[])
        }
        async fn execute(&self, _input: Value) -> ToolResult<Value> {
            Err(ToolError::ExecutionFailed("boom".into()))
        }
    }

    #[tokio::test]
    async fn execute_dispatches_by_name_and_tracks_stats() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let result = registry.execute("echo", serde_json::json!({"text": "hi"})).await.unwrap();
        assert_eq!(result["text"], "hi");
        assert_eq!(registry.call_count("echo"), 1);
        assert_eq!(registry.error_count("echo"), 0);
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_an_error() {
        let registry = ToolRegistry::new();
        assert!(registry.execute("nope", serde_json::json!({})).await.is_err());
    }

    #[tokio::test]
    async fn execute_records_error_count_on_failure() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        assert!(registry.execute("fail", serde_json::json!({})).await.is_err());
        assert_eq!(registry.error_count("fail"), 1);
    }

    #[test]
    fn api_definitions_preserve_insertion_order_across_reregistration() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(FailingTool));
        registry.register(Arc::new(EchoTool)); // re-register, should not move position
        let names = registry.tool_names();
        assert_eq!(names, vec!["echo".to_string(), "fail".to_string()]);
    }
}
