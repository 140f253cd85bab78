//! `create_folder`: mkdir -p, where an existing folder is fine

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult};

pub struct CreateFolderTool;

#[async_trait]
impl Tool for CreateFolderTool {
    fn name(&self) -> &str {
        "create_folder"
    }

    fn description(&self) -> &str {
        "Create a folder, including any missing parents."
    }

    fn mutates_state(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("path", ParameterProperty::string("The folder path to create"))
    }

    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let path = ctx.resolve(required_str(args, "path")?);

        if fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(ToolResult::success(format!("Folder already exists: {}", path.display())));
        }

        Ok(match fs::create_dir_all(&path).await {
            Ok(()) => ToolResult::success(format!("Folder created: {}", path.display())),
            Err(e) => ToolResult::error(format!("Cannot create {}: {}", path.display(), e)),
        })
    }
}
