//! Sample tool — returns static text.
//!
//! Useful for exercising the tool-call round trip without side effects.

use async_trait::async_trait;
use tidepool_core::error::ToolError;
use tidepool_core::tool::Tool;

pub struct SampleTool;

#[async_trait]
impl Tool for SampleTool {
    fn name(&self) -> &str {
        "sample"
    }

    fn description(&self) -> &str {
        "A sample tool that returns static text. Use this to test the agent loop."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": "Any input string to echo back"
                }
            },
            "required": ["input"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let input = arguments["input"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'input' argument".into()))?;
        Ok(format!("Sample response for: {input}"))
    }
}
