//! File delete tool — remove a single file with path validation.

use async_trait::async_trait;
use tidepool_core::error::ToolError;
use tidepool_core::tool::Tool;

use crate::paths::check_path;

pub struct FileDeleteTool;

impl FileDeleteTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileDeleteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileDeleteTool {
    fn name(&self) -> &str {
        "file_delete"
    }

    fn description(&self) -> &str {
        "Delete a file at the specified path. Use with caution as this is irreversible."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the file to delete"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let path = check_path(self.name(), path)?;

        // Only plain files; refusing directories keeps a single bad call
        // from taking out a whole tree.
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                return Ok(format!("{path} is a directory; only files can be deleted"));
            }
            Err(e) => return Ok(format!("Failed to delete {path}: {e}")),
            _ => {}
        }

        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(format!("Deleted {path}")),
            Err(e) => Ok(format!("Failed to delete {path}: {e}")),
        }
    }
}
