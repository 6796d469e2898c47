// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The HTTP + SSE surface (§A.6): a thin axum router translating requests
//! into `SessionService`/`SseHub`/`ClientToolBridge` calls. Route handlers
//! stay small on purpose — all the actual orchestration logic lives in
//! `sessiond-core`.
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use sessiond_bridge::ClientToolBridge;
use sessiond_core::prompt::PromptContext;
use sessiond_core::events::SessionUpdate;
use sessiond_core::SessionService;
use sessiond_model::domain::ModelRef;
use sessiond_model::error::{CoreError, ErrorKind};
use sessiond_permission::{PermissionArbiter, PermissionResponse};
use sessiond_sse::StreamScope;
use sessiond_tools::{ToolCall, ToolRegistry};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionService,
    pub permission: PermissionArbiter,
    pub sse: sessiond_sse::SseHub,
    pub bridge: ClientToolBridge,
    pub tools: Arc<ToolRegistry>,
    pub config: sessiond_config::Config,
}

/// The `{"error": {"code", "message", "details"?}}` envelope every non-2xx
/// HTTP response uses (§A.6/§A.7).
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({ "code": self.0.kind.code(), "message": self.0.message });
        if let Some(details) = &self.0.details {
            body["details"] = details.clone();
        }
        (status, Json(json!({ "error": body }))).into_response()
    }
}

/// Newtype so `CoreError` (foreign) can implement `IntoResponse` here
/// without violating the orphan rule.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/session", get(list_sessions).post(create_session))
        .route("/session/:id", get(get_session).patch(update_session).delete(delete_session))
        .route("/session/:id/fork", post(fork_session))
        .route("/session/:id/revert", post(revert_session))
        .route("/session/:id/unrevert", post(unrevert_session))
        .route("/session/:id/abort", post(abort_session))
        .route("/session/:id/message", get(list_messages).post(send_message))
        .route("/session/:id/permissions/:perm_id", post(reply_permission))
        .route("/event", get(event_stream_global))
        .route("/file/content", get(file_content))
        .route("/file/status", get(file_status))
        .route("/find", get(find_grep))
        .route("/find/file", get(find_file))
        .route("/find/symbol", get(find_symbol))
        .route("/client-tool/:call_id/result", post(client_tool_result))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ── Sessions ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ListSessionsQuery {
    directory: Option<String>,
}

async fn list_sessions(State(state): State<AppState>, Query(q): Query<ListSessionsQuery>) -> ApiResult<Json<serde_json::Value>> {
    let sessions = state.sessions.list(q.directory.as_deref()).await?;
    Ok(Json(json!(sessions)))
}

#[derive(Deserialize)]
struct CreateSessionBody {
    directory: String,
    title: Option<String>,
}

async fn create_session(State(state): State<AppState>, Json(body): Json<CreateSessionBody>) -> ApiResult<Json<serde_json::Value>> {
    let session = state.sessions.create(&body.directory, body.title).await?;
    Ok(Json(json!(session)))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!(state.sessions.get(&id).await?)))
}

#[derive(Deserialize)]
struct UpdateSessionBody {
    title: String,
}

async fn update_session(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<UpdateSessionBody>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!(state.sessions.update_title(&id, body.title).await?)))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.sessions.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ForkBody {
    #[serde(rename = "messageID")]
    message_id: String,
}

async fn fork_session(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<ForkBody>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!(state.sessions.fork(&id, &body.message_id).await?)))
}

#[derive(Deserialize)]
struct RevertBody {
    #[serde(rename = "messageID")]
    message_id: String,
    #[serde(rename = "partID")]
    part_id: Option<String>,
}

async fn revert_session(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<RevertBody>) -> ApiResult<StatusCode> {
    state.sessions.revert(&id, &body.message_id, body.part_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unrevert_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.sessions.unrevert(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn abort_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.sessions.abort(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Messages ──────────────────────────────────────────────────────────────

async fn list_messages(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let loaded = state.sessions.list_messages(&id).await?;
    let out: Vec<serde_json::Value> = loaded.into_iter().map(|m| json!({ "info": m.message, "parts": m.parts })).collect();
    Ok(Json(json!(out)))
}

/// `tools`/`files` are part of the §A.6 contract but narrowing the tool set
/// or attaching files per-turn isn't wired into the orchestration loop yet;
/// they are accepted (ignored, via serde's default unknown-field tolerance)
/// rather than rejected as a validation error.
#[derive(Deserialize)]
struct SendMessageBody {
    content: Option<String>,
    parts: Option<Vec<serde_json::Value>>,
    model: Option<String>,
    agent: Option<String>,
}

/// Resolve a `"provider/model"` override, falling back to the session
/// service's configured default when the caller omits one.
fn resolve_model_ref(model: Option<&str>) -> Result<ModelRef, ApiError> {
    let Some(spec) = model else {
        return Ok(ModelRef { provider_id: "mock".into(), model_id: "mock-model".into() });
    };
    let (provider_id, model_id) = spec.split_once('/').ok_or_else(|| {
        ApiError(CoreError::new(ErrorKind::Validation, "model must be \"provider/model\""))
    })?;
    Ok(ModelRef { provider_id: provider_id.to_string(), model_id: model_id.to_string() })
}

/// Resolve the named agent preset's system prompt from config, if any. An
/// unknown or absent `agent` falls back to `build_system_prompt`'s own
/// default persona.
fn resolve_prompt_ctx(state: &AppState, agent: Option<&str>) -> PromptContext {
    let Some(name) = agent else { return PromptContext::default() };
    let preset = state.config.agents.get(name);
    PromptContext {
        agent_name: Some(name.to_string()),
        agent_system_prompt: preset.and_then(|p| p.system_prompt.clone()),
        ..Default::default()
    }
}

/// Streams newline-delimited JSON `{info, parts}` snapshots as the turn
/// progresses, independent of the SSE event stream (§A.6). The terminal
/// line's `info.time.completed` marks the end of the turn.
async fn send_message(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<SendMessageBody>) -> ApiResult<Response> {
    // 404 up front, before spawning the streaming task, so a bad id gets a
    // proper error envelope instead of a truncated chunked body.
    state.sessions.get(&id).await?;

    let content = body
        .content
        .or_else(|| {
            body.parts.as_ref().map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        })
        .unwrap_or_default();
    let model_ref = resolve_model_ref(body.model.as_deref())?;
    let prompt_ctx = resolve_prompt_ctx(&state, body.agent.as_deref());

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let sessions = state.sessions.clone();
    let session_id = id.clone();

    tokio::spawn(async move {
        let mut parts: Vec<serde_json::Value> = Vec::new();
        let tx_updates = tx.clone();
        let result = sessions
            .process(&session_id, &content, model_ref.clone(), prompt_ctx, move |update| {
                if let SessionUpdate::PartUpdated(part) = &update {
                    let part_json = json!(part);
                    if let Some(slot) = parts.iter_mut().find(|p| p["id"] == part_json["id"]) {
                        *slot = part_json;
                    } else {
                        parts.push(part_json);
                    }
                    let line = json!({ "parts": parts }).to_string();
                    let _ = tx_updates.send(format!("{line}\n"));
                }
            })
            .await;

        let terminal = match result {
            Ok((message, parts)) => json!({ "info": message, "parts": parts }),
            Err(e) => json!({ "error": { "code": e.kind.code(), "message": e.message } }),
        };
        let _ = tx.send(format!("{}\n", terminal));
    });

    let stream = UnboundedReceiverStream::new(rx).map(|line| Ok::<_, std::io::Error>(line.into_bytes()));
    Ok(Response::builder()
        .header("content-type", "application/jsonlines")
        .body(Body::from_stream(stream))
        .expect("static response parts are always valid"))
}

// ── Permissions ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PermissionReplyBody {
    granted: bool,
}

async fn reply_permission(
    State(state): State<AppState>,
    Path((id, perm_id)): Path<(String, String)>,
    Json(body): Json<PermissionReplyBody>,
) -> ApiResult<StatusCode> {
    let response = if body.granted { PermissionResponse::Once } else { PermissionResponse::Reject };
    state.permission.reply(&id, &perm_id, response).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── SSE ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EventQuery {
    #[serde(rename = "sessionID")]
    session_id: Option<String>,
}

async fn event_stream_global(State(state): State<AppState>, Query(q): Query<EventQuery>) -> impl IntoResponse {
    let scope = match q.session_id {
        Some(id) => StreamScope::Session(id),
        None => StreamScope::Global,
    };
    Sse::new(state.sse.stream(scope))
}

// ── File / find ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct FileContentQuery {
    path: String,
    offset: Option<u64>,
    limit: Option<u64>,
}

async fn file_content(State(state): State<AppState>, Query(q): Query<FileContentQuery>) -> ApiResult<Json<serde_json::Value>> {
    let mut input = json!({ "path": q.path });
    if let Some(offset) = q.offset {
        input["offset"] = json!(offset);
    }
    if let Some(limit) = q.limit {
        input["limit"] = json!(limit);
    }
    run_tool(&state, "read_file", input).await
}

#[derive(Deserialize)]
struct FileStatusQuery {
    directory: String,
}

/// `git status --porcelain` summary for the given directory. There is no
/// dedicated built-in tool for this — it is a thin, direct shell-out, same
/// as `SessionService::get_diffs`'s own `git diff` invocation.
async fn file_status(Query(q): Query<FileStatusQuery>) -> ApiResult<Json<serde_json::Value>> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(&q.directory)
        .args(["status", "--porcelain=v1"])
        .output()
        .await
        .map_err(|e| ApiError(CoreError::new(ErrorKind::Internal, format!("git status failed: {e}"))))?;
    let text = String::from_utf8_lossy(&output.stdout);
    let entries: Vec<serde_json::Value> = text
        .lines()
        .filter(|l| !l.is_empty())
        .map(|line| {
            let (status, path) = line.split_at(2.min(line.len()));
            json!({ "status": status.trim(), "path": path.trim() })
        })
        .collect();
    Ok(Json(json!({ "directory": q.directory, "entries": entries })))
}

#[derive(Deserialize)]
struct GrepQuery {
    pattern: String,
    path: Option<String>,
}

async fn find_grep(State(state): State<AppState>, Query(q): Query<GrepQuery>) -> ApiResult<Json<serde_json::Value>> {
    let mut input = json!({ "pattern": q.pattern });
    if let Some(path) = q.path {
        input["path"] = json!(path);
    }
    run_tool(&state, "grep", input).await
}

#[derive(Deserialize)]
struct GlobQuery {
    pattern: String,
}

async fn find_file(State(state): State<AppState>, Query(q): Query<GlobQuery>) -> ApiResult<Json<serde_json::Value>> {
    run_tool(&state, "glob", json!({ "pattern": q.pattern })).await
}

#[derive(Deserialize)]
struct SymbolQuery {
    query: String,
}

/// `query` on the wire, `symbol` in the tool's own schema — the HTTP
/// contract names it after what LSP calls a workspace-symbol query, the
/// tool names it after what it actually searches for.
async fn find_symbol(State(state): State<AppState>, Query(q): Query<SymbolQuery>) -> ApiResult<Json<serde_json::Value>> {
    run_tool(&state, "symbol_search", json!({ "symbol": q.query })).await
}

async fn run_tool(state: &AppState, tool: &str, input: serde_json::Value) -> ApiResult<Json<serde_json::Value>> {
    let call = ToolCall { call_id: sessiond_model::domain::new_id(), tool: tool.to_string(), input };
    let output = state.tools.execute(CancellationToken::new(), &call).await;
    if output.is_error {
        return Err(ApiError(CoreError::new(ErrorKind::Tool, output.content)));
    }
    Ok(Json(json!({ "content": output.content })))
}

// ── Client-tool bridge ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct ClientToolResultBody {
    content: String,
    #[serde(default)]
    is_error: bool,
}

/// External client posting back the result of a `client-tool.request` it
/// received over SSE (§A.4, the client-tool callout flow). Not part of the
/// contract table in §A.6, but implied by it — there is otherwise no way
/// for a bridged client tool call to ever resolve.
async fn client_tool_result(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(body): Json<ClientToolResultBody>,
) -> ApiResult<StatusCode> {
    let output = if body.is_error {
        sessiond_tools::ToolOutput::err(&call_id, body.content)
    } else {
        sessiond_tools::ToolOutput::ok(&call_id, body.content)
    };
    state.bridge.resolve(&call_id, output)?;
    Ok(StatusCode::NO_CONTENT)
}
