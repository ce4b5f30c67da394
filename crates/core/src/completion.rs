//! CompletionClient trait — the abstraction over the streaming
//! text-generation service.
//!
//! A client knows how to send a conversation to an LLM and yield the
//! response back as a finite, ordered sequence of typed events: text
//! fragments, tool-call requests, and a finish marker. The sequence is
//! produced by a single request and consumed exactly once, in order.
//!
//! Implementations: the Anthropic Messages API adapter in
//! `tidepool-providers`, and scripted doubles in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, ToolCallRequest};

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Why a completion round stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Natural end of response
    Stop,
    /// The model requested tool invocations
    ToolCalls,
    /// Maximum output tokens reached
    Length,
    /// The provider reported an error finish
    Error,
}

/// One event in a completion stream.
///
/// A well-formed stream is zero or more `TextDelta`/`ToolCall` events
/// followed by exactly one `Finish`. Transport failures surface as `Err`
/// items in the stream instead, never as silent truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CompletionEvent {
    /// A fragment of assistant text, in arrival order
    TextDelta { delta: String },

    /// A complete tool-call request (arguments fully accumulated)
    ToolCall { request: ToolCallRequest },

    /// End of the round
    Finish { reason: FinishReason },
}

/// The lazily-produced event sequence for one completion round.
pub type CompletionEventStream =
    tokio::sync::mpsc::Receiver<std::result::Result<CompletionEvent, ProviderError>>;

/// Parameters for one completion round.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The model to use (e.g., "claude-sonnet-4-20250514")
    pub model: String,

    /// Committed conversation history
    pub messages: Vec<Message>,

    /// System prompt, passed out-of-band to the provider
    pub system_prompt: Option<String>,

    /// Temperature (0.0 = deterministic)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    pub tools: Vec<ToolDefinition>,
}

/// The streaming completion service.
///
/// The run loop calls `stream()` without knowing which backend is in
/// play — pure polymorphism. The consumer must tolerate arbitrary delay
/// between events; it suspends on each `recv`.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// A human-readable name for this client (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Open one completion round and return its event stream.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionEventStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_text_delta() {
        let event = CompletionEvent::TextDelta { delta: "4".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""kind":"text-delta""#));
        assert!(json.contains(r#""delta":"4""#));
    }

    #[test]
    fn event_serialization_finish() {
        let event = CompletionEvent::Finish {
            reason: FinishReason::ToolCalls,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""reason":"tool-calls""#));
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"kind":"text-delta","delta":"hi"}"#;
        let event: CompletionEvent = serde_json::from_str(json).unwrap();
        match event {
            CompletionEvent::TextDelta { delta } => assert_eq!(delta, "hi"),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "shell".into(),
            description: "Execute a shell command".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The command to run" }
                },
                "required": ["command"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("shell"));
        assert!(json.contains("command"));
    }
}
