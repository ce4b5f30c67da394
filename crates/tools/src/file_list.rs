//! File list tool — list the entries of a directory.

use async_trait::async_trait;
use tidepool_core::error::ToolError;
use tidepool_core::tool::Tool;

use crate::paths::check_path;

pub struct FileListTool;

impl FileListTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileListTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List all files and directories in the specified directory path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "The directory path to list contents of",
                    "default": "."
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let directory = arguments["directory"].as_str().unwrap_or(".");
        let directory = check_path(self.name(), directory)?;

        let mut entries = match tokio::fs::read_dir(directory).await {
            Ok(rd) => rd,
            Err(e) => return Ok(format!("Failed to list {directory}: {e}")),
        };

        let mut names: Vec<String> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => "/",
                _ => "",
            };
            names.push(format!("{name}{suffix}"));
        }
        names.sort();

        if names.is_empty() {
            Ok(format!("{directory} is empty"))
        } else {
            Ok(names.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let tool = FileListTool::new();
        let output = tool
            .execute(serde_json::json!({"directory": dir.path().to_str().unwrap()}))
            .await
            .unwrap();

        assert!(output.contains("a.txt"));
        assert!(output.contains("sub/"));
    }

    #[tokio::test]
    async fn empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileListTool::new();
        let output = tool
            .execute(serde_json::json!({"directory": dir.path().to_str().unwrap()}))
            .await
            .unwrap();
        assert!(output.contains("is empty"));
    }

    #[tokio::test]
    async fn defaults_to_current_directory() {
        let tool = FileListTool::new();
        let result = tool.execute(serde_json::json!({})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn nonexistent_directory_reports_failure() {
        let tool = FileListTool::new();
        let output = tool
            .execute(serde_json::json!({"directory": "/tmp/tidepool_no_such_dir_98765"}))
            .await
            .unwrap();
        assert!(output.contains("Failed to list"));
    }
}
