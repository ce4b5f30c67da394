//! The turn state machine.
//!
//! `AgentRunLoop::run_turn` drives one user message to completion:
//! install a fresh run snapshot (discarding any prior run), then iterate
//! completion rounds — streaming deltas and tool-call requests into the
//! snapshot as they arrive, committing the assistant's structured turn at
//! each finish, executing tool batches between rounds — until the model
//! answers without tool calls or the iteration limit trips.
//!
//! Every write is guarded by run id: if a newer user message has replaced
//! the snapshot, the write is dropped and the loop exits as superseded,
//! so stray late results can never leak into the new run. Dropping the
//! event stream receiver is what aborts the in-flight provider task.
//! Errors fold into the snapshot's `error` field; nothing propagates past
//! `run_turn`.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tidepool_core::completion::{
    CompletionClient, CompletionEvent, CompletionRequest, FinishReason,
};
use tidepool_core::message::{Message, ToolCallRequest};
use tidepool_core::run::{ConversationState, RunId, RunSnapshot, RunStatus, TextStream, ToolCallState};
use tidepool_core::tool::ToolRegistry;
use tidepool_state::StateStore;

use crate::executor::ToolExecutor;

const DEFAULT_MAX_ITERATIONS: u32 = 10;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The run committed a final assistant message
    Done,
    /// The run failed; the snapshot carries the error
    Error,
    /// A newer user message replaced this run mid-flight
    Superseded,
}

/// Drives conversations through bounded tool-call rounds.
///
/// One instance serves many conversations; all per-conversation state
/// lives in the [`StateStore`] passed to [`run_turn`](Self::run_turn).
pub struct AgentRunLoop {
    client: Arc<dyn CompletionClient>,
    executor: ToolExecutor,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    max_iterations: u32,
    request_timeout: Duration,
}

impl AgentRunLoop {
    /// Create a new run loop.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            executor: ToolExecutor::new(tools),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the max tokens per completion round.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the maximum number of tool-call rounds per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the timeout for each wait on the completion stream.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the per-tool execution timeout.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.executor = self.executor.with_timeout(timeout);
        self
    }

    /// Process one inbound user message to completion.
    ///
    /// Any run already in the store is discarded (not merged) in the same
    /// atomic update that appends the user message and installs the new
    /// streaming snapshot.
    pub async fn run_turn(&self, store: &StateStore, content: &str) -> TurnOutcome {
        let user = Message::user(content);
        let snapshot = RunSnapshot::streaming();
        let run_id = snapshot.run_id.clone();

        store.update(move |state| state.with_message(user).with_run(Some(snapshot)));

        info!(run_id = %run_id, "Turn starting");

        let outcome = match self.drive(store, &run_id).await {
            Ok(outcome) => outcome,
            Err(message) => {
                warn!(run_id = %run_id, error = %message, "Turn failed");
                self.fail(store, &run_id, message)
            }
        };

        info!(run_id = %run_id, ?outcome, "Turn finished");
        outcome
    }

    /// Iterate completion rounds until done, error, or supersession.
    ///
    /// `Err` carries a failure description for [`fail`](Self::fail);
    /// supersession is an `Ok` exit because it is not a fault of this
    /// turn.
    async fn drive(&self, store: &StateStore, run_id: &RunId) -> Result<TurnOutcome, String> {
        let mut iteration = 0u32;

        loop {
            let request = CompletionRequest {
                model: self.model.clone(),
                messages: store.read().state.messages.clone(),
                system_prompt: self.system_prompt.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: self.executor.definitions(),
            };

            debug!(run_id = %run_id, iteration, "Completion round starting");

            let mut events = self
                .client
                .stream(request)
                .await
                .map_err(|e| e.to_string())?;

            // Consume the round's event stream. Text accumulates under a
            // fixed message id so the client can correlate the stream
            // with the eventual committed message.
            let target_message_id = Uuid::new_v4().to_string();
            let mut text = String::new();
            let mut requests: Vec<ToolCallRequest> = Vec::new();

            let finish_reason = loop {
                let event = match tokio::time::timeout(self.request_timeout, events.recv()).await {
                    Err(_) => {
                        return Err(format!(
                            "Completion stream timed out after {}s",
                            self.request_timeout.as_secs()
                        ));
                    }
                    Ok(None) => {
                        return Err("Completion stream ended without a finish event".into());
                    }
                    Ok(Some(Err(e))) => return Err(e.to_string()),
                    Ok(Some(Ok(event))) => event,
                };

                match event {
                    CompletionEvent::TextDelta { delta } => {
                        text.push_str(&delta);
                        let stream = TextStream {
                            target_message_id: target_message_id.clone(),
                            text: text.clone(),
                        };
                        if !update_if_current(store, run_id, |state, run| {
                            let mut run = run.clone();
                            run.text_stream = Some(stream);
                            state.with_run(Some(run))
                        }) {
                            return Ok(TurnOutcome::Superseded);
                        }
                    }
                    CompletionEvent::ToolCall { request } => {
                        requests.push(request.clone());
                        if !update_if_current(store, run_id, |state, run| {
                            let mut run = run.clone();
                            run.tool_calls.push(ToolCallState {
                                request,
                                output: None,
                            });
                            state.with_run(Some(run))
                        }) {
                            return Ok(TurnOutcome::Superseded);
                        }
                    }
                    CompletionEvent::Finish { reason } => break reason,
                }
            };

            // Commit the model's structured turn: accumulated text plus
            // any tool-call requests, under the streamed message id. The
            // accumulator is cleared in the same update — history never
            // holds partial text, and the snapshot never holds committed
            // text.
            let mut assistant = Message::assistant(text, requests.clone());
            assistant.id = target_message_id;

            let is_final = finish_reason != FinishReason::ToolCalls || requests.is_empty();

            if !update_if_current(store, run_id, |state, run| {
                let mut run = run.clone();
                run.text_stream = None;
                if is_final {
                    run.status = RunStatus::Done;
                }
                state.with_message(assistant).with_run(Some(run))
            }) {
                return Ok(TurnOutcome::Superseded);
            }

            if is_final {
                debug!(run_id = %run_id, iteration, ?finish_reason, "Turn complete");
                return Ok(TurnOutcome::Done);
            }

            // Fan out the batch; fold every result into its snapshot
            // entry and append a tool-role message, atomically.
            let results = self.executor.execute(&requests).await;

            if !update_if_current(store, run_id, |state, run| {
                let mut run = run.clone();
                for result in &results {
                    if let Some(entry) = run
                        .tool_calls
                        .iter_mut()
                        .find(|tc| tc.request.id == result.id)
                    {
                        entry.output = Some(result.clone());
                    }
                }
                let mut next = state.clone();
                for result in &results {
                    next = next.with_message(Message::tool_result(result));
                }
                next.with_run(Some(run))
            }) {
                return Ok(TurnOutcome::Superseded);
            }

            iteration += 1;
            if iteration >= self.max_iterations {
                return Err(format!(
                    "Run aborted: too many tool-call rounds (limit {})",
                    self.max_iterations
                ));
            }
        }
    }

    /// Fold a failure into the snapshot. History keeps only committed
    /// messages; any partial text in the accumulator is discarded.
    fn fail(&self, store: &StateStore, run_id: &RunId, message: String) -> TurnOutcome {
        let applied = update_if_current(store, run_id, |state, run| {
            let mut run = run.clone();
            run.status = RunStatus::Error;
            run.error = Some(message);
            run.text_stream = None;
            state.with_run(Some(run))
        });

        if applied {
            TurnOutcome::Error
        } else {
            TurnOutcome::Superseded
        }
    }
}

/// Apply a state transformation only if `run_id` still owns the current
/// run. Returns `false` when the run has been superseded, in which case
/// the state is left untouched.
fn update_if_current(
    store: &StateStore,
    run_id: &RunId,
    f: impl FnOnce(&ConversationState, &RunSnapshot) -> ConversationState,
) -> bool {
    let committed = store.update(|state| match &state.current_run {
        Some(run) if &run.run_id == run_id => f(state, run),
        _ => state.clone(),
    });

    matches!(&committed.state.current_run, Some(run) if &run.run_id == run_id)
}
