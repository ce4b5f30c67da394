//! `tidepool chat` — Interactive or single-message chat mode.
//!
//! Streams the assistant's answer token-by-token by watching the state
//! store the same way a connected client would.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tidepool_agent::AgentRunLoop;
use tidepool_config::AppConfig;
use tidepool_core::run::{RunId, RunStatus};
use tidepool_state::StateStore;
use tokio::io::AsyncBufReadExt;

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for API key early — give a clear error
    if config.api_key.is_none() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    ANTHROPIC_API_KEY = 'sk-ant-...'");
        eprintln!("    TIDEPOOL_API_KEY  = 'sk-ant-...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let client = tidepool_providers::from_config(&config)?;
    let tools = Arc::new(tidepool_tools::default_registry());

    let agent = Arc::new(
        AgentRunLoop::new(client, tools, &config.default_model)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_system_prompt(&config.agent.system_prompt)
            .with_max_iterations(config.agent.max_iterations)
            .with_request_timeout(Duration::from_secs(config.agent.request_timeout_secs))
            .with_tool_timeout(Duration::from_secs(config.agent.tool_timeout_secs)),
    );

    let store = Arc::new(StateStore::new());

    if let Some(msg) = message {
        // Single message mode
        run_turn_streaming(&agent, &store, &msg).await;
    } else {
        // Interactive mode
        println!();
        println!("  Tidepool — Interactive Chat");
        println!("  Model: {}", config.default_model);
        println!("  Type your message and press Enter. Type 'exit' to quit.");
        println!();

        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        loop {
            print!("  You > ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line == "exit" || line == "quit" {
                break;
            }

            run_turn_streaming(&agent, &store, &line).await;
        }
    }

    Ok(())
}

/// Run one turn, printing text deltas and tool activity as the run
/// snapshot evolves.
async fn run_turn_streaming(agent: &Arc<AgentRunLoop>, store: &Arc<StateStore>, content: &str) {
    let (initial, mut updates) = store.subscribe();

    let turn = {
        let agent = agent.clone();
        let store = store.clone();
        let content = content.to_string();
        tokio::spawn(async move { agent.run_turn(&store, &content).await })
    };

    let mut target: Option<RunId> = None;
    let mut printed_bytes = 0usize;
    let mut seen_tool_calls = 0usize;

    loop {
        let versioned = match updates.recv().await {
            Ok(v) => v,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        let Some(run) = &versioned.state.current_run else {
            continue;
        };

        match &target {
            None => {
                if run.status == RunStatus::Streaming && versioned.version > initial.version {
                    target = Some(run.run_id.clone());
                } else {
                    continue;
                }
            }
            Some(id) if *id != run.run_id => break,
            Some(_) => {}
        }

        for call in run.tool_calls.iter().skip(seen_tool_calls) {
            println!("  [tool: {}]", call.request.name);
        }
        seen_tool_calls = run.tool_calls.len();

        if let Some(ts) = &run.text_stream
            && ts.text.len() > printed_bytes
        {
            print!("{}", &ts.text[printed_bytes..]);
            let _ = std::io::stdout().flush();
            printed_bytes = ts.text.len();
        }

        match run.status {
            RunStatus::Streaming => {
                // A new round resets the accumulator offset.
                if run.text_stream.is_none() {
                    printed_bytes = 0;
                }
            }
            RunStatus::Done => break,
            RunStatus::Error => {
                if let Some(error) = &run.error {
                    eprintln!("\n  ERROR: {error}");
                }
                break;
            }
        }
    }

    let _ = turn.await;
    println!();
}
