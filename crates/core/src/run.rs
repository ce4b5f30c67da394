//! Run and conversation state value objects.
//!
//! `RunSnapshot` is the observable, in-progress state of the current turn;
//! it is distinct from committed history and is replaced wholesale (never
//! merged) when a new turn starts. `ConversationState` combines committed
//! messages with the optional active run and is the single source of
//! truth, owned exclusively by the state store. All mutations are
//! whole-state replacements so each version is an immutable value safely
//! handed to subscribers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, ToolCallRequest, ToolCallResult};

/// Unique identifier for one run (one user turn in flight).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of the active run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Model output is being consumed and republished incrementally
    Streaming,
    /// The turn committed a final assistant message
    Done,
    /// The turn terminated abnormally; see `RunSnapshot::error`
    Error,
}

/// The in-flight text accumulator. Partial text lives here and only
/// here; committed history never contains a partial message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStream {
    /// Id the accumulated text will be committed under
    pub target_message_id: String,

    /// Text accumulated so far this round
    pub text: String,
}

/// One tool call within the active run: the request, and the result
/// once execution has produced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallState {
    pub request: ToolCallRequest,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ToolCallResult>,
}

/// The observable state of the current turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: RunId,

    pub status: RunStatus,

    /// Present while a round is streaming text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_stream: Option<TextStream>,

    /// Tool calls collected this turn, in arrival order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallState>,

    /// Human-readable failure description when status is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSnapshot {
    /// A fresh streaming snapshot for a new turn.
    pub fn streaming() -> Self {
        Self {
            run_id: RunId::new(),
            status: RunStatus::Streaming,
            text_stream: None,
            tool_calls: Vec::new(),
            error: None,
        }
    }
}

/// Committed history plus the optional active run. `current_run` is
/// non-null only while a turn is executing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_run: Option<RunSnapshot>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy-on-write append: returns a new state with the message added.
    pub fn with_message(&self, message: Message) -> Self {
        let mut messages = self.messages.clone();
        messages.push(message);
        Self {
            messages,
            current_run: self.current_run.clone(),
        }
    }

    /// Copy-on-write run replacement.
    pub fn with_run(&self, run: Option<RunSnapshot>) -> Self {
        Self {
            messages: self.messages.clone(),
            current_run: run,
        }
    }
}
