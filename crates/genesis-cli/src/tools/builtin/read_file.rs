//! `read_file`: the only handler that leaves the world untouched

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use tokio::fs;

use crate::tools::{
    required_str, truncate_output, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult,
};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Return the text of a file so later steps can build on it."
    }

    fn mutates_state(&self) -> bool {
        false
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("path", ParameterProperty::string("File to read, relative to the agent's working directory"))
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = ctx.resolve(required_str(args, "path")?);

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(ToolResult::error(format!("File not found: {}", path.display())));
            }
            Err(e) => return Ok(ToolResult::error(format!("Cannot inspect {}: {}", path.display(), e))),
        };
        if !metadata.is_file() {
            return Ok(ToolResult::error(format!("Not a file: {}", path.display())));
        }

        Ok(match fs::read_to_string(&path).await {
            Ok(text) => ToolResult::success(truncate_output(text, ctx.max_output_chars)),
            Err(e) => ToolResult::error(format!("Cannot read {}: {}", path.display(), e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn test_read_absolute_path() {
        let mut notes = NamedTempFile::new().unwrap();
        writeln!(notes, "# Notes").unwrap();
        writeln!(notes, "ship the landing page").unwrap();

        let args = json!({ "path": notes.path().to_str().unwrap() });
        let result = ReadFileTool.execute(&args, &ToolContext::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.output, "# Notes\nship the landing page\n");
    }

    #[tokio::test]
    async fn test_long_file_is_truncated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(40)).unwrap();
        let ctx = ToolContext {
            max_output_chars: 10,
            ..ToolContext::new(dir.path().to_path_buf())
        };

        let result = ReadFileTool.execute(&json!({ "path": "big.txt" }), &ctx).await.unwrap();
        assert!(result.success);
        assert!(result.output.starts_with("xxxxxxxxxx\n"));
        assert!(result.output.contains("10 of 40"));
    }

    #[tokio::test]
    async fn test_read_nonexistent_file() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());
        let args = json!({ "path": "missing.txt" });

        let result = ReadFileTool.execute(&args, &ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("File not found"));
    }

    #[tokio::test]
    async fn test_read_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf());

        let result = ReadFileTool.execute(&json!({ "path": "." }), &ctx).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Not a file"));
    }

    #[tokio::test]
    async fn test_missing_path_argument() {
        let result = ReadFileTool.execute(&json!({}), &ToolContext::default()).await;
        assert!(result.is_err());
    }
}
