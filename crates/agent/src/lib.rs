//! The agent run loop — the heart of Tidepool.
//!
//! A turn follows a **stream → execute → commit** cycle:
//!
//! 1. **Receive** a user message; discard any prior run and install a
//!    fresh streaming snapshot
//! 2. **Stream** one completion round, republishing every text delta and
//!    tool-call request through the state store
//! 3. **Commit** the assistant's structured turn to history
//! 4. **If tool calls**: execute the batch concurrently, fold results
//!    back in, loop to step 2
//! 5. **If text only**: the run is done
//!
//! The loop continues until the model responds with no tool calls or the
//! iteration limit is reached. Errors fold into the run snapshot rather
//! than propagating — the connection handler driving the loop stays
//! alive to keep serving the conversation.

pub mod executor;
pub mod run_loop;

pub use executor::ToolExecutor;
pub use run_loop::{AgentRunLoop, TurnOutcome};
