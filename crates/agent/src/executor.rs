//! Batch tool execution.
//!
//! `ToolExecutor` takes the tool-call requests collected in one
//! completion round and resolves every one of them: validate the
//! arguments against the tool's declared schema, run the tool under a
//! per-call timeout, and convert every failure into an error-flagged
//! result. One bad call never aborts its siblings, and an unknown tool
//! name is a per-request error, not a batch failure.
//!
//! All requests in a batch are dispatched concurrently; the returned
//! list preserves request order regardless of completion order, one
//! result per request with matching ids.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use tidepool_core::completion::ToolDefinition;
use tidepool_core::message::{ToolCallRequest, ToolCallResult};
use tidepool_core::tool::ToolRegistry;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    /// Compiled JSON Schema validators keyed by tool name.
    validators: HashMap<String, jsonschema::Validator>,
    tool_timeout: Duration,
}

impl ToolExecutor {
    /// Create an executor over a registry, precompiling one validator
    /// per tool. A schema that fails to compile skips validation for
    /// that tool with a warning.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        let mut validators = HashMap::new();
        for def in registry.definitions() {
            match jsonschema::validator_for(&def.parameters) {
                Ok(validator) => {
                    validators.insert(def.name.clone(), validator);
                }
                Err(e) => {
                    warn!(
                        tool = %def.name,
                        "Invalid tool parameter schema, skipping validation: {e}"
                    );
                }
            }
        }

        Self {
            registry,
            validators,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Definitions of every registered tool, for the completion request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Execute a batch of requests concurrently (fan-out/fan-in).
    ///
    /// Returns one result per request, in request order, ids matching.
    pub async fn execute(&self, requests: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        futures::future::join_all(requests.iter().map(|req| self.execute_one(req))).await
    }

    async fn execute_one(&self, request: &ToolCallRequest) -> ToolCallResult {
        let Some(tool) = self.registry.get(&request.name) else {
            return ToolCallResult::error(
                &request.id,
                &request.name,
                format!("Tool not found: {}", request.name),
            );
        };

        if let Some(validator) = self.validators.get(request.name.as_str())
            && let Some(message) = validation_errors(validator, &request.arguments)
        {
            return ToolCallResult::error(&request.id, &request.name, message);
        }

        debug!(tool = %request.name, call_id = %request.id, "Executing tool");

        match tokio::time::timeout(self.tool_timeout, tool.execute(request.arguments.clone()))
            .await
        {
            Ok(Ok(output)) => ToolCallResult::ok(&request.id, &request.name, output),
            Ok(Err(e)) => {
                warn!(tool = %request.name, error = %e, "Tool execution failed");
                ToolCallResult::error(&request.id, &request.name, format!("Error: {e}"))
            }
            Err(_) => {
                warn!(tool = %request.name, timeout = ?self.tool_timeout, "Tool timed out");
                ToolCallResult::error(
                    &request.id,
                    &request.name,
                    format!("Tool timed out after {}s", self.tool_timeout.as_secs()),
                )
            }
        }
    }
}

/// Collect schema violations into one message.
/// Returns `None` when the arguments are valid.
fn validation_errors(
    validator: &jsonschema::Validator,
    arguments: &serde_json::Value,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tidepool_core::error::ToolError;
    use tidepool_core::tool::Tool;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    /// Sleeps for the requested number of milliseconds, then echoes.
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps, then answers"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "ms": { "type": "integer" }
                },
                "required": ["ms"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            let ms = arguments["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(format!("slept {ms}ms"))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "failing".into(),
                reason: "deliberate failure".into(),
            })
        }
    }

    fn test_executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(SlowTool));
        registry.register(Box::new(FailingTool));
        ToolExecutor::new(Arc::new(registry))
    }

    fn request(id: &str, name: &str, args: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn one_result_per_request_in_order() {
        let executor = test_executor();
        let requests = vec![
            request("c1", "echo", serde_json::json!({"text": "first"})),
            request("c2", "no_such_tool", serde_json::json!({})),
            request("c3", "echo", serde_json::json!({"text": "third"})),
        ];

        let results = executor.execute(&requests).await;

        assert_eq!(results.len(), 3);
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert!(!results[0].is_error);
        assert!(results[1].is_error);
        assert!(!results[2].is_error);
    }

    #[tokio::test]
    async fn order_preserved_despite_completion_order() {
        let executor = test_executor();
        let requests = vec![
            request("slow_call", "slow", serde_json::json!({"ms": 80})),
            request("fast_call", "echo", serde_json::json!({"text": "quick"})),
        ];

        let results = executor.execute(&requests).await;

        // The fast tool finishes first, but the result list follows
        // request order.
        assert_eq!(results[0].id, "slow_call");
        assert_eq!(results[0].output, "slept 80ms");
        assert_eq!(results[1].id, "fast_call");
        assert_eq!(results[1].output, "quick");
    }

    #[tokio::test]
    async fn invalid_arguments_flagged_not_raised() {
        let executor = test_executor();
        let requests = vec![
            request("bad", "echo", serde_json::json!({"text": 42})),
            request("good", "echo", serde_json::json!({"text": "ok"})),
        ];

        let results = executor.execute(&requests).await;

        assert!(results[0].is_error);
        assert!(results[0].output.contains("validation failed"));
        // The sibling call still ran.
        assert!(!results[1].is_error);
        assert_eq!(results[1].output, "ok");
    }

    #[tokio::test]
    async fn missing_required_field_flagged() {
        let executor = test_executor();
        let results = executor
            .execute(&[request("c1", "echo", serde_json::json!({}))])
            .await;
        assert!(results[0].is_error);
        assert!(results[0].output.contains("text"));
    }

    #[tokio::test]
    async fn execution_failure_becomes_error_result() {
        let executor = test_executor();
        let results = executor
            .execute(&[request("c1", "failing", serde_json::json!({}))])
            .await;
        assert!(results[0].is_error);
        assert!(results[0].output.contains("deliberate failure"));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let executor = test_executor().with_timeout(Duration::from_millis(20));
        let results = executor
            .execute(&[request("c1", "slow", serde_json::json!({"ms": 500}))])
            .await;
        assert!(results[0].is_error);
        assert!(results[0].output.contains("timed out"));
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let executor = test_executor();
        let results = executor.execute(&[]).await;
        assert!(results.is_empty());
    }
}
