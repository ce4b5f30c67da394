//! File write tool — create or overwrite a file with path validation.

use async_trait::async_trait;
use tidepool_core::error::ToolError;
use tidepool_core::tool::Tool;

use crate::paths::check_path;

pub struct FileWriteTool;

impl FileWriteTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file at the specified path. Creates the file if it doesn't exist, overwrites if it does."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;
        let path = check_path(self.name(), path)?;

        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        match tokio::fs::write(path, content).await {
            Ok(()) => Ok(format!("Wrote {} bytes to {path}", content.len())),
            Err(e) => Ok(format!("Failed to write {path}: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("out.txt");

        let tool = FileWriteTool::new();
        let output = tool
            .execute(serde_json::json!({
                "path": file_path.to_str().unwrap(),
                "content": "written by tool"
            }))
            .await
            .unwrap();

        assert!(output.contains("Wrote"));
        let on_disk = std::fs::read_to_string(&file_path).unwrap();
        assert_eq!(on_disk, "written by tool");
    }

    #[tokio::test]
    async fn write_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("out.txt");
        std::fs::write(&file_path, "old").unwrap();

        let tool = FileWriteTool::new();
        tool.execute(serde_json::json!({
            "path": file_path.to_str().unwrap(),
            "content": "new"
        }))
        .await
        .unwrap();

        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "new");
    }

    #[tokio::test]
    async fn missing_content_argument() {
        let tool = FileWriteTool::new();
        let result = tool
            .execute(serde_json::json!({"path": "/tmp/x.txt"}))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn sensitive_path_blocked() {
        let tool = FileWriteTool::new();
        let result = tool
            .execute(serde_json::json!({"path": "/etc/passwd", "content": "x"}))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }
}
