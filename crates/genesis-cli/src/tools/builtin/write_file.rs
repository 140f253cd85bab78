//! `write_file`: create or replace a file

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write the full text of a file, replacing what was there. Missing parent folders are created. Use it to create and to edit files."
    }

    fn mutates_state(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("path", ParameterProperty::string("Target file, including its extension"))
            .with_required("content", ParameterProperty::string("Complete new text of the file"))
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = ctx.resolve(required_str(args, "path")?);
        let content = required_str(args, "content")?;

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(format!("Cannot create {}: {}", parent.display(), e)));
            }
        }

        Ok(match fs::write(&path, content).await {
            Ok(()) => ToolResult::success(format!(
                "Wrote {} ({} chars)",
                path.display(),
                content.chars().count()
            )),
            Err(e) => ToolResult::error(format!("Cannot write {}: {}", path.display(), e)),
        })
    }
}
