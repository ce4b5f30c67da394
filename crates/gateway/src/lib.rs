//! HTTP and WebSocket gateway for Tidepool.
//!
//! Endpoints:
//!
//! - `GET  /health`                  — Liveness probe
//! - `POST /api/chat`                — Send a message, receive SSE text deltas
//! - `GET  /api/ws`                  — WebSocket; full state pushed on every update
//! - `GET  /api/conversations`       — List conversations
//! - `GET  /api/conversations/{id}`  — Conversation history
//! - `GET  /api/tools`               — Declared tool definitions
//!
//! Built on Axum. Clients resynchronize from the state pushes: each one
//! is a complete replacement of the conversation value, never a delta.

use axum::{
    Router,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use tidepool_agent::AgentRunLoop;
use tidepool_core::completion::ToolDefinition;
use tidepool_core::message::ConversationId;
use tidepool_core::run::RunStatus;
use tidepool_state::{StoreRegistry, VersionedState};

/// Conversation id used when the client does not supply one.
const DEFAULT_CONVERSATION: &str = "default";

// ── State ─────────────────────────────────────────────────────────────────

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: Arc<AgentRunLoop>,
    pub conversations: Arc<StoreRegistry>,
    pub tools: Vec<ToolDefinition>,
}

pub type SharedState = Arc<GatewayState>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    // Dev CORS: the browser client runs on its own origin.
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/ws", get(ws_handler))
        .route("/api/conversations", get(list_conversations_handler))
        .route("/api/conversations/{id}", get(get_conversation_handler))
        .route("/api/tools", get(list_tools_handler))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: tidepool_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let client = tidepool_providers::from_config(&config)?;
    let tools = Arc::new(tidepool_tools::default_registry());
    let tool_definitions = tools.definitions();

    let agent = Arc::new(
        AgentRunLoop::new(client, tools, &config.default_model)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_system_prompt(&config.agent.system_prompt)
            .with_max_iterations(config.agent.max_iterations)
            .with_request_timeout(std::time::Duration::from_secs(
                config.agent.request_timeout_secs,
            ))
            .with_tool_timeout(std::time::Duration::from_secs(config.agent.tool_timeout_secs)),
    );

    let state = Arc::new(GatewayState {
        agent,
        conversations: Arc::new(StoreRegistry::new()),
        tools: tool_definitions,
    });

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ConversationListResponse {
    conversations: Vec<ConversationSummary>,
}

#[derive(Serialize)]
struct ConversationSummary {
    id: String,
    message_count: usize,
    version: u64,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDefinition>,
    count: usize,
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /api/chat` — body `{"message": {"role": "user", "content": "..."}}`,
/// optional `"conversation_id"`.
///
/// Responds with SSE lines `data: {"type":"text-delta","delta":"..."}`
/// per fragment, terminated by `data: [DONE]`. Malformed bodies are
/// rejected before any state mutation.
async fn chat_handler(
    State(state): State<SharedState>,
    payload: Result<Json<serde_json::Value>, axum::extract::rejection::JsonRejection>,
) -> Result<
    Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>,
    (StatusCode, Json<ErrorResponse>),
> {
    let Ok(Json(payload)) = payload else {
        return Err(bad_request("Invalid JSON"));
    };

    let Some(content) = payload
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    else {
        return Err(bad_request("Missing message object"));
    };

    let conv_id = payload
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_CONVERSATION);
    let conv_id = ConversationId::from(conv_id);

    info!(conversation_id = %conv_id, "api/chat request");

    let store = state.conversations.get_or_create(&conv_id).await;

    // Subscribe before the turn starts so no published version is missed.
    let (initial, updates) = store.subscribe();

    let agent = state.agent.clone();
    let run_store = store.clone();
    let content = content.to_string();
    tokio::spawn(async move {
        agent.run_turn(&run_store, &content).await;
    });

    let rx = spawn_delta_feed(initial, updates);
    let stream = ReceiverStream::new(rx).map(|event| Ok(event));

    Ok(Sse::new(stream))
}

/// Bridge state updates into the SSE delta protocol.
///
/// Latches onto the first streaming run published after the snapshot we
/// subscribed at, forwards each text-suffix as a `text-delta`, and ends
/// with `[DONE]` when that run leaves the streaming state or is replaced.
fn spawn_delta_feed(
    initial: Arc<VersionedState>,
    mut updates: tokio::sync::broadcast::Receiver<Arc<VersionedState>>,
) -> tokio::sync::mpsc::Receiver<SseEvent> {
    let (tx, rx) = tokio::sync::mpsc::channel::<SseEvent>(64);

    tokio::spawn(async move {
        let mut target_run = None;
        let mut sent_bytes = 0usize;

        let done = || SseEvent::default().data("[DONE]");

        loop {
            let versioned = match updates.recv().await {
                Ok(v) => v,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Delta feed lagged behind state updates");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            let Some(run) = &versioned.state.current_run else {
                continue;
            };

            match &target_run {
                None => {
                    if run.status == RunStatus::Streaming && versioned.version > initial.version {
                        target_run = Some(run.run_id.clone());
                    } else {
                        continue;
                    }
                }
                Some(id) if *id != run.run_id => {
                    // A newer message replaced our run mid-stream.
                    let _ = tx.send(done()).await;
                    return;
                }
                Some(_) => {}
            }

            if let Some(ts) = &run.text_stream
                && ts.text.len() > sent_bytes
            {
                // The accumulator is append-only, so the byte offset is
                // always a char boundary of the previous text.
                let delta = ts.text[sent_bytes..].to_string();
                sent_bytes = ts.text.len();
                let json = serde_json::json!({"type": "text-delta", "delta": delta});
                if tx
                    .send(SseEvent::default().data(json.to_string()))
                    .await
                    .is_err()
                {
                    return; // client disconnected
                }
            }

            match run.status {
                RunStatus::Streaming => {}
                RunStatus::Done => {
                    let _ = tx.send(done()).await;
                    return;
                }
                RunStatus::Error => {
                    let error = run.error.clone().unwrap_or_else(|| "run failed".into());
                    let json = serde_json::json!({"type": "error", "error": error});
                    let _ = tx.send(SseEvent::default().data(json.to_string())).await;
                    let _ = tx.send(done()).await;
                    return;
                }
            }
        }
    });

    rx
}

async fn list_conversations_handler(
    State(state): State<SharedState>,
) -> Json<ConversationListResponse> {
    let mut conversations = Vec::new();
    for id in state.conversations.ids().await {
        if let Some(store) = state.conversations.get(&id).await {
            let snap = store.read();
            conversations.push(ConversationSummary {
                id: id.to_string(),
                message_count: snap.state.messages.len(),
                version: snap.version,
            });
        }
    }
    conversations.sort_by(|a, b| a.id.cmp(&b.id));
    Json(ConversationListResponse { conversations })
}

/// `GET /api/conversations/{id}` — the committed history.
async fn get_conversation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let conv_id = ConversationId::from(&id);
    let Some(store) = state.conversations.get(&conv_id).await else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Unknown conversation: {id}"),
            }),
        ));
    };

    let snap = store.read();
    Ok(Json(serde_json::json!({ "messages": snap.state.messages })))
}

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        count: state.tools.len(),
        tools: state.tools.clone(),
    })
}

// ── WebSocket ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WsQuery {
    #[serde(default)]
    conversation: Option<String>,
}

/// `GET /api/ws?conversation={id}` — full bidirectional connection.
///
/// Protocol:
/// - Client → Server: `{ "type": "chat", "content": "..." }`
/// - Server → Client: the versioned conversation state as JSON, pushed on
///   every durable update (complete replacement, not a delta), starting
///   with the current state at attach.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let conv_id = ConversationId::from(
        query
            .conversation
            .as_deref()
            .unwrap_or(DEFAULT_CONVERSATION),
    );
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, conv_id))
}

/// WebSocket message from the client.
#[derive(Deserialize)]
struct WsClientMessage {
    #[serde(rename = "type")]
    msg_type: String,
    content: String,
}

/// Parse an inbound text frame into chat content.
fn parse_chat_frame(text: &str) -> Result<String, String> {
    let msg: WsClientMessage =
        serde_json::from_str(text).map_err(|e| format!("Invalid message: {e}"))?;
    if msg.msg_type != "chat" {
        return Err(format!("Unknown message type: '{}'", msg.msg_type));
    }
    Ok(msg.content)
}

async fn handle_ws_connection(socket: WebSocket, state: SharedState, conv_id: ConversationId) {
    info!(conversation_id = %conv_id, "WebSocket connection established");

    let store = state.conversations.get_or_create(&conv_id).await;
    let (mut sink, mut source) = socket.split();

    // Replication task: current state first, then every update.
    let (initial, mut updates) = store.subscribe();
    let push_task = tokio::spawn(async move {
        let payload = serde_json::to_string(&*initial).unwrap_or_default();
        if sink.send(WsMessage::Text(payload.into())).await.is_err() {
            return;
        }

        loop {
            match updates.recv().await {
                Ok(versioned) => {
                    let payload = serde_json::to_string(&*versioned).unwrap_or_default();
                    if sink.send(WsMessage::Text(payload.into())).await.is_err() {
                        return; // client disconnected
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "WebSocket push lagged behind state updates");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    // Inbound loop: each chat frame starts a turn. Turns run on their own
    // tasks so a new message can arrive (and supersede) mid-stream.
    while let Some(msg) = source.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue, // ignore binary, ping, pong
            Err(_) => break,
        };

        match parse_chat_frame(&text) {
            Ok(content) => {
                let agent = state.agent.clone();
                let run_store = store.clone();
                tokio::spawn(async move {
                    agent.run_turn(&run_store, &content).await;
                });
            }
            Err(reason) => {
                // Rejected at the boundary: logged, no state mutation.
                warn!(conversation_id = %conv_id, %reason, "Ignoring malformed WebSocket frame");
            }
        }
    }

    push_task.abort();
    info!(conversation_id = %conv_id, "WebSocket connection closed");
}

// ── Tests ─────────────────────────────────────────────────────────────────
