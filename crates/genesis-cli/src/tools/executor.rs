//! Tool dispatch behind the action port

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::registry::ToolRegistry;
use super::{ToolCall, ToolContext};

/// What came back from one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub output: String,
    /// The handler is flagged as changing state
    pub mutates_state: bool,
}

impl ActionOutcome {
    fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            mutates_state: false,
        }
    }
}

/// Boundary between the life loop and side-effecting handlers
#[async_trait]
pub trait ActionPort: Send + Sync {
    /// Run a named action. Never fails: problems come back as unsuccessful outcomes.
    async fn execute(&self, call: &ToolCall) -> ActionOutcome;

    /// Function-calling schemas to offer the planner
    fn schemas(&self) -> Vec<Value>;
}

/// Executes calls against a registry it owns
#[derive(Debug)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    ctx: ToolContext,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, ctx: ToolContext) -> Self {
        Self { registry, ctx }
    }
}

#[async_trait]
impl ActionPort for ToolExecutor {
    #[instrument(skip(self), fields(tool = %call.name))]
    async fn execute(&self, call: &ToolCall) -> ActionOutcome {
        let tool = match self.registry.get(&call.name) {
            Some(t) => t,
            None => {
                warn!(tool = %call.name, "Tool not found");
                return ActionOutcome::failed(format!("Unknown tool: {}", call.name));
            }
        };

        info!(tool = %call.name, "Executing tool");
        match tool.execute(&call.arguments, &self.ctx).await {
            Ok(result) => {
                if result.success {
                    info!(tool = %call.name, output_len = result.output.len(), "Tool executed successfully");
                } else {
                    warn!(tool = %call.name, output = %result.output, "Tool execution failed");
                }
                ActionOutcome {
                    success: result.success,
                    output: result.output,
                    mutates_state: tool.mutates_state(),
                }
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution error");
                ActionOutcome::failed(format!("Error executing tool: {}", e))
            }
        }
    }

    fn schemas(&self) -> Vec<Value> {
        self.registry.schemas()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin::create_default_registry;
    use serde_json::json;
    use tempfile::TempDir;

    fn executor(dir: &TempDir) -> ToolExecutor {
        ToolExecutor::new(create_default_registry(), ToolContext::new(dir.path().to_path_buf()))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let outcome = executor(&dir).execute(&ToolCall::new("launch_rocket", json!({}))).await;

        assert!(!outcome.success);
        assert!(outcome.output.contains("Unknown tool: launch_rocket"));
    }

    #[tokio::test]
    async fn test_write_is_flagged_as_mutating() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        let write = exec
            .execute(&ToolCall::new("write_file", json!({"path": "a.txt", "content": "hi"})))
            .await;
        assert!(write.success);
        assert!(write.mutates_state);

        let read = exec.execute(&ToolCall::new("read_file", json!({"path": "a.txt"}))).await;
        assert!(read.success);
        assert!(!read.mutates_state);
        assert_eq!(read.output, "hi");
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed_outcome() {
        let dir = TempDir::new().unwrap();
        let outcome = executor(&dir).execute(&ToolCall::new("write_file", json!({"path": "a.txt"}))).await;

        assert!(!outcome.success);
        assert!(outcome.output.contains("Missing required parameter: content"));
    }

    #[test]
    fn test_schemas_cover_builtins() {
        let dir = TempDir::new().unwrap();
        let names: Vec<String> = executor(&dir)
            .schemas()
            .iter()
            .map(|s| s["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["create_folder", "read_file", "write_file"]);
    }
}
