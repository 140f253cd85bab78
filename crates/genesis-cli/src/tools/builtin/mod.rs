//! Built-in file tools

mod create_folder;
mod read_file;
mod write_file;

pub use create_folder::CreateFolderTool;
pub use read_file::ReadFileTool;
pub use write_file::WriteFileTool;

use super::registry::ToolRegistry;

/// Registry holding the three file tools
pub fn create_default_registry() -> ToolRegistry {
    ToolRegistry::new()
        .with(ReadFileTool)
        .with(WriteFileTool)
        .with(CreateFolderTool)
}
