// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session Service (C6): session lifecycle, message ingestion, fork/revert,
//! and the thin operational wrappers. The LLM orchestration loop itself
//! lives in [`crate::orchestrate`].
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};

use sessiond_bus::{Event, EventBus, Topic};
use sessiond_model::domain::{new_id, now_ms, Message, Part, Session, TextPart, Todo};
use sessiond_model::error::{CoreError, ErrorKind};
use sessiond_model::ModelProvider;
use sessiond_permission::{PermissionArbiter, PermissionResponse};
use sessiond_storage::{Store, StorageError};
use sessiond_tools::{ToolOutput, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::history::LoadedMessage;
use crate::keys;

/// Default re-invocation budget (§A.4.6): exceeding this many provider
/// rounds within one `process()` call yields `ErrorPart{kind:
/// tool-loop-exceeded}` instead of looping forever.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 25;

/// `StorageError` and `CoreError` are both foreign to this crate, so a
/// `From` impl would violate the orphan rule; map explicitly at each call
/// site instead.
fn storage_err(e: StorageError) -> CoreError {
    match e {
        StorageError::NotFound { key } => CoreError::new(ErrorKind::NotFound, format!("not found: {key}")),
        StorageError::Conflict { key, .. } => CoreError::new(ErrorKind::Conflict, format!("conflict: {key}")),
        StorageError::Io { key, source } => {
            CoreError::new(ErrorKind::Storage, format!("io error on {key}: {source}"))
        }
    }
}

fn json_err(e: serde_json::Error, what: &str) -> CoreError {
    CoreError::new(ErrorKind::Internal, format!("failed to (de)serialize {what}: {e}"))
}

/// The active LLM orchestration for one session, if any. §A.5: at most one
/// turn in flight per session; a second `process()` call is refused.
struct ActiveTurn {
    cancel: CancellationToken,
}

/// Owns session lifecycle and LLM orchestration. Cheap to clone — every
/// clone shares the same storage root, bus, and tool/provider registries.
#[derive(Clone)]
pub struct SessionService {
    pub(crate) store: Store,
    pub(crate) bus: EventBus,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) permission: PermissionArbiter,
    pub(crate) providers: Arc<StdMutex<HashMap<String, Arc<dyn ModelProvider>>>>,
    active: Arc<StdMutex<HashMap<String, ActiveTurn>>>,
    pub(crate) max_tool_rounds: u32,
}

impl SessionService {
    pub fn new(store: Store, bus: EventBus, tools: Arc<ToolRegistry>, permission: PermissionArbiter) -> Self {
        Self {
            store,
            bus,
            tools,
            permission,
            providers: Arc::new(StdMutex::new(HashMap::new())),
            active: Arc::new(StdMutex::new(HashMap::new())),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, max: u32) -> Self {
        self.max_tool_rounds = max;
        self
    }

    /// Register a provider instance under `provider_id`; `process()` resolves
    /// a turn's `model_ref.provider_id` against this table. Wire construction
    /// (credentials, endpoint) is out of scope here, same as C5 itself.
    pub fn register_provider(&self, provider_id: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.providers.lock().unwrap().insert(provider_id.into(), provider);
    }

    pub(crate) fn resolve_provider(&self, provider_id: &str) -> Result<Arc<dyn ModelProvider>, CoreError> {
        self.providers
            .lock()
            .unwrap()
            .get(provider_id)
            .cloned()
            .ok_or_else(|| CoreError::new(ErrorKind::Provider, format!("unknown provider: {provider_id}")))
    }

    // ── CRUD ──────────────────────────────────────────────────────────────

    pub async fn create(&self, directory: &str, title: Option<String>) -> Result<Session, CoreError> {
        let session = Session::new(directory, title.unwrap_or_else(|| "untitled".to_string()));
        self.persist_session(&session).await?;
        self.store.put(&keys::dir_index_key(directory, &session.id), b"", None).await.map_err(storage_err)?;
        self.bus.publish(Event::new(Topic::SessionCreated, serde_json::json!({ "id": session.id })));
        Ok(session)
    }

    pub(crate) async fn persist_session(&self, session: &Session) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(session).map_err(|e| json_err(e, "session"))?;
        self.store.put(&keys::session_key(&session.id), &bytes, None).await.map_err(storage_err)?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Session, CoreError> {
        let bytes = self.store.get(&keys::session_key(id)).await.map_err(storage_err)?;
        serde_json::from_slice(&bytes).map_err(|e| json_err(e, "session"))
    }

    pub async fn list(&self, directory: Option<&str>) -> Result<Vec<Session>, CoreError> {
        let mut sessions = Vec::new();
        match directory {
            Some(dir) => {
                for (key, _) in self.store.list(&keys::dir_index_prefix(dir)).await.map_err(storage_err)? {
                    let id = key.rsplit('/').next().unwrap_or_default();
                    sessions.push(self.get(id).await?);
                }
            }
            None => {
                for (key, bytes) in self.store.list("session/").await.map_err(storage_err)? {
                    if keys::is_session_record_key(&key) {
                        sessions.push(serde_json::from_slice(&bytes).map_err(|e| json_err(e, "session"))?);
                    }
                }
            }
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    pub async fn delete(&self, id: &str) -> Result<(), CoreError> {
        let session = self.get(id).await?;
        self.store.delete_prefix(&keys::session_prefix(id)).await.map_err(storage_err)?;
        self.store.delete(&keys::dir_index_key(&session.project_directory, id)).await.map_err(storage_err)?;
        self.active.lock().unwrap().remove(id);
        self.bus.publish(Event::new(Topic::SessionDeleted, serde_json::json!({ "id": id })));
        Ok(())
    }

    /// `fork(at_message_id)` deep-copies every message and part up to and
    /// including `at_message_id` under fresh ids into a brand new session.
    pub async fn fork(&self, session_id: &str, at_message_id: &str) -> Result<Session, CoreError> {
        let parent = self.get(session_id).await?;
        let loaded = self.load_messages(session_id).await?;
        let cutoff = loaded
            .iter()
            .position(|m| m.message.id == at_message_id)
            .ok_or_else(|| CoreError::new(ErrorKind::NotFound, format!("no such message: {at_message_id}")))?;

        let child = parent.fork_from(new_id());
        self.persist_session(&child).await?;
        self.store.put(&keys::dir_index_key(&child.project_directory, &child.id), b"", None).await.map_err(storage_err)?;

        for loaded_msg in &loaded[..=cutoff] {
            let new_message_id = new_id();
            let mut message = loaded_msg.message.clone();
            message.id = new_message_id.clone();
            message.session_id = child.id.clone();
            let bytes = serde_json::to_vec(&message).map_err(|e| json_err(e, "message"))?;
            self.store.put(&keys::message_key(&child.id, &new_message_id), &bytes, None).await.map_err(storage_err)?;

            for part in &loaded_msg.parts {
                let mut part = part.clone();
                retarget_part(&mut part, &new_message_id, &child.id);
                let part_bytes = serde_json::to_vec(&part).map_err(|e| json_err(e, "part"))?;
                self.store.put(&keys::part_key(&child.id, &new_message_id, part.id()), &part_bytes, None).await.map_err(storage_err)?;
            }
        }

        self.bus.publish(Event::new(Topic::SessionCreated, serde_json::json!({ "id": child.id })));
        Ok(child)
    }

    pub async fn revert(&self, session_id: &str, message_id: &str, _part_id: Option<String>) -> Result<(), CoreError> {
        let mut session = self.get(session_id).await?;
        session.revert(message_id.to_string());
        self.persist_session(&session).await
    }

    pub async fn unrevert(&self, session_id: &str) -> Result<(), CoreError> {
        let mut session = self.get(session_id).await?;
        session.unrevert();
        self.persist_session(&session).await
    }

    // ── Messages ──────────────────────────────────────────────────────────

    pub async fn add_message(&self, session_id: &str, content: &str) -> Result<Message, CoreError> {
        self.get(session_id).await?; // 404 if the session doesn't exist
        let message = Message::new_user(session_id);
        let bytes = serde_json::to_vec(&message).map_err(|e| json_err(e, "message"))?;
        self.store.put(&keys::message_key(session_id, &message.id), &bytes, None).await.map_err(storage_err)?;

        let part = Part::Text(TextPart {
            id: new_id(),
            message_id: message.id.clone(),
            session_id: session_id.to_string(),
            text: content.to_string(),
        });
        self.persist_part(session_id, &part).await?;

        self.bus.publish(Event::new(
            Topic::MessageCreated,
            serde_json::json!({ "session_id": session_id, "id": message.id }),
        ));
        Ok(message)
    }

    /// List every message in the session with its parts, in persistence
    /// order. Used by the `/session/{id}/message` read path.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<LoadedMessage>, CoreError> {
        self.get(session_id).await?; // 404 if the session doesn't exist
        self.load_messages(session_id).await
    }

    pub(crate) async fn persist_part(&self, session_id: &str, part: &Part) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(part).map_err(|e| json_err(e, "part"))?;
        self.store.put(&keys::part_key(session_id, part.message_id(), part.id()), &bytes, None).await.map_err(storage_err)?;
        self.bus.publish(Event::new(
            Topic::MessagePartUpdated,
            serde_json::json!({ "session_id": session_id, "message_id": part.message_id(), "id": part.id() }),
        ));
        Ok(())
    }

    pub(crate) async fn persist_message(&self, message: &Message) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(message).map_err(|e| json_err(e, "message"))?;
        self.store.put(&keys::message_key(&message.session_id, &message.id), &bytes, None).await.map_err(storage_err)?;
        Ok(())
    }

    pub(crate) async fn load_messages(&self, session_id: &str) -> Result<Vec<LoadedMessage>, CoreError> {
        let mut out = Vec::new();
        for (key, bytes) in self.store.list(&keys::message_prefix(session_id)).await.map_err(storage_err)? {
            if !keys::is_message_record_key(&key) {
                continue;
            }
            let message: Message = serde_json::from_slice(&bytes).map_err(|e| json_err(e, "message"))?;
            let mut parts = Vec::new();
            for (_, part_bytes) in self.store.list(&keys::part_prefix(session_id, &message.id)).await.map_err(storage_err)? {
                parts.push(serde_json::from_slice::<Part>(&part_bytes).map_err(|e| json_err(e, "part"))?);
            }
            out.push(LoadedMessage { message, parts });
        }
        out.sort_by(|a, b| a.message.id.cmp(&b.message.id));
        Ok(out)
    }

    // ── Turn lifecycle ────────────────────────────────────────────────────

    /// `None` if a turn is already running; otherwise registers and returns
    /// the token the orchestration task should watch for cancellation.
    pub(crate) fn begin_turn(&self, session_id: &str) -> Result<CancellationToken, CoreError> {
        let mut active = self.active.lock().unwrap();
        if active.contains_key(session_id) {
            return Err(CoreError::new(ErrorKind::Conflict, "session busy: a turn is already in progress"));
        }
        let cancel = CancellationToken::new();
        active.insert(session_id.to_string(), ActiveTurn { cancel: cancel.clone() });
        Ok(cancel)
    }

    pub(crate) fn end_turn(&self, session_id: &str) {
        self.active.lock().unwrap().remove(session_id);
    }

    pub async fn abort(&self, session_id: &str) -> Result<(), CoreError> {
        let cancel = {
            let active = self.active.lock().unwrap();
            active.get(session_id).map(|t| t.cancel.clone())
        };
        match cancel {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(CoreError::new(ErrorKind::NotFound, "no active turn for this session")),
        }
    }

    // ── Thin wrappers ─────────────────────────────────────────────────────

    pub async fn get_todos(&self, session_id: &str) -> Result<Vec<Todo>, CoreError> {
        let mut todos = Vec::new();
        for (_, bytes) in self.store.list(&keys::todo_prefix(session_id)).await.map_err(storage_err)? {
            todos.push(serde_json::from_slice(&bytes).map_err(|e| json_err(e, "todo"))?);
        }
        todos.sort_by(|a: &Todo, b: &Todo| a.created_at.cmp(&b.created_at));
        Ok(todos)
    }

    /// Summarize the session's history via its own configured provider — a
    /// one-shot completion over the full flattened history, no parts persisted.
    pub async fn summarize(&self, session_id: &str, model_provider_id: &str, model_id: &str) -> Result<String, CoreError> {
        use futures::StreamExt;
        let session = self.get(session_id).await?;
        let loaded = self.load_messages(session_id).await?;
        let visible = crate::history::apply_revert(&session, &loaded);
        let mut messages = crate::history::flatten(visible);
        messages.insert(
            0,
            sessiond_model::ProviderMessage::system(
                "Summarize this conversation in a few sentences: what was asked, what was done, and what remains.",
            ),
        );

        let provider = self.resolve_provider(model_provider_id)?;
        let req = sessiond_model::CompletionRequest { model_id: model_id.to_string(), messages, stream: true, ..Default::default() };
        let mut stream = provider
            .complete(CancellationToken::new(), req)
            .await
            .map_err(|e| CoreError::new(ErrorKind::Provider, e.to_string()))?;

        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event.map_err(|e| CoreError::new(ErrorKind::Provider, e.to_string()))? {
                sessiond_model::ResponseEvent::TextChunk(delta) => summary.push_str(&delta),
                sessiond_model::ResponseEvent::Finish { .. } => break,
                sessiond_model::ResponseEvent::Error { kind, message } => {
                    return Err(CoreError::new(ErrorKind::Provider, message).with_details(serde_json::json!({ "kind": kind })))
                }
                _ => {}
            }
        }
        Ok(summary)
    }

    /// Rename a session. The only field the `PATCH /session/{id}` contract
    /// exposes for mutation; everything else is derived or set at creation.
    pub async fn update_title(&self, session_id: &str, title: String) -> Result<Session, CoreError> {
        let mut session = self.get(session_id).await?;
        session.title = title;
        session.updated_at = now_ms();
        self.persist_session(&session).await?;
        self.bus.publish(Event::new(Topic::SessionUpdated, serde_json::json!({ "id": session_id })));
        Ok(session)
    }

    pub async fn share(&self, session_id: &str) -> Result<String, CoreError> {
        let mut session = self.get(session_id).await?;
        let url = format!("https://share.local/{}", new_id());
        session.share_url = Some(url.clone());
        session.updated_at = now_ms();
        self.persist_session(&session).await?;
        self.bus.publish(Event::new(Topic::SessionUpdated, serde_json::json!({ "id": session_id })));
        Ok(url)
    }

    pub async fn unshare(&self, session_id: &str) -> Result<(), CoreError> {
        let mut session = self.get(session_id).await?;
        session.share_url = None;
        session.updated_at = now_ms();
        self.persist_session(&session).await?;
        self.bus.publish(Event::new(Topic::SessionUpdated, serde_json::json!({ "id": session_id })));
        Ok(())
    }

    /// Per-file `git diff` against the session's project directory. A thin
    /// shell-out, not a diff engine of our own.
    pub async fn get_diffs(&self, session_id: &str) -> Result<Vec<FileDiff>, CoreError> {
        let session = self.get(session_id).await?;
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(&session.project_directory)
            .arg("diff")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CoreError::new(ErrorKind::Internal, format!("git diff failed to start: {e}")))?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(split_diff_by_file(&text))
    }

    /// Run a tool directly, outside the LLM loop (slash commands and similar
    /// caller-driven invocations). No permission gate: a caller invoking this
    /// API directly already *is* the approval.
    pub async fn execute_command(&self, ctx: CancellationToken, tool: &str, input: serde_json::Value) -> Result<ToolOutput, CoreError> {
        let call = sessiond_tools::ToolCall { call_id: new_id(), tool: tool.to_string(), input };
        Ok(self.tools.execute(ctx, &call).await)
    }

    pub async fn run_shell(&self, ctx: CancellationToken, command: &str) -> Result<ToolOutput, CoreError> {
        self.execute_command(ctx, "shell", serde_json::json!({ "command": command })).await
    }

    pub async fn respond_permission(
        &self,
        session_id: &str,
        request_id: &str,
        response: PermissionResponse,
    ) -> Result<(), CoreError> {
        self.permission.reply(session_id, request_id, response).await?;
        Ok(())
    }
}

/// Point a cloned part at its new message/session ids after a fork.
fn retarget_part(part: &mut Part, message_id: &str, session_id: &str) {
    match part {
        Part::Text(p) => {
            p.id = new_id();
            p.message_id = message_id.to_string();
            p.session_id = session_id.to_string();
        }
        Part::Tool(p) => {
            p.id = new_id();
            p.message_id = message_id.to_string();
            p.session_id = session_id.to_string();
        }
        Part::File(p) => {
            p.id = new_id();
            p.message_id = message_id.to_string();
            p.session_id = session_id.to_string();
        }
        Part::StepStart(p) | Part::StepFinish(p) => {
            p.id = new_id();
            p.message_id = message_id.to_string();
            p.session_id = session_id.to_string();
        }
        Part::Error(p) => {
            p.id = new_id();
            p.message_id = message_id.to_string();
            p.session_id = session_id.to_string();
        }
    }
}

/// One file's worth of a `git diff` run.
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub diff: String,
}

fn split_diff_by_file(text: &str) -> Vec<FileDiff> {
    let mut out = Vec::new();
    let mut current_path: Option<String> = None;
    let mut current_body = String::new();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git a/") {
            if let Some(path) = current_path.take() {
                out.push(FileDiff { path, diff: std::mem::take(&mut current_body) });
            }
            let path = rest.split(" b/").next().unwrap_or(rest).to_string();
            current_path = Some(path);
        }
        current_body.push_str(line);
        current_body.push('\n');
    }
    if let Some(path) = current_path {
        out.push(FileDiff { path, diff: current_body });
    } else if !text.trim().is_empty() {
        warn!("git diff produced output with no recognizable file headers");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessiond_permission::PermissionArbiter;
    use tempfile::TempDir;

    fn service() -> (TempDir, SessionService) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());
        let bus = EventBus::new();
        let tools = Arc::new(sessiond_tools::builtin_registry(sessiond_tools::builtin::todo::TodoState::new("s")));
        let permission = PermissionArbiter::new(store.clone(), bus.clone());
        (dir, SessionService::new(store, bus, tools, permission))
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/proj", Some("hello".into())).await.unwrap();
        let fetched = svc.get(&session.id).await.unwrap();
        assert_eq!(fetched.title, "hello");
    }

    #[tokio::test]
    async fn list_by_directory_filters() {
        let (_dir, svc) = service();
        svc.create("/tmp/a", None).await.unwrap();
        svc.create("/tmp/b", None).await.unwrap();
        let listed = svc.list(Some("/tmp/a")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_directory, "/tmp/a");
    }

    #[tokio::test]
    async fn list_with_no_directory_returns_everything() {
        let (_dir, svc) = service();
        svc.create("/tmp/a", None).await.unwrap();
        svc.create("/tmp/b", None).await.unwrap();
        assert_eq!(svc.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_cascades_messages_and_index() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/a", None).await.unwrap();
        svc.add_message(&session.id, "hi").await.unwrap();
        svc.delete(&session.id).await.unwrap();
        assert!(svc.get(&session.id).await.is_err());
        assert!(svc.list(Some("/tmp/a")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_message_to_missing_session_is_not_found() {
        let (_dir, svc) = service();
        let err = svc.add_message("ghost", "hi").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn fork_copies_messages_up_to_cutoff_with_new_ids() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/a", None).await.unwrap();
        let m1 = svc.add_message(&session.id, "first").await.unwrap();
        let _m2 = svc.add_message(&session.id, "second").await.unwrap();

        let child = svc.fork(&session.id, &m1.id).await.unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(session.id.as_str()));

        let child_messages = svc.load_messages(&child.id).await.unwrap();
        assert_eq!(child_messages.len(), 1);
        assert_ne!(child_messages[0].message.id, m1.id);
        assert_eq!(child_messages[0].message.session_id, child.id);
    }

    #[tokio::test]
    async fn revert_then_unrevert_round_trips() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/a", None).await.unwrap();
        let m1 = svc.add_message(&session.id, "first").await.unwrap();
        svc.revert(&session.id, &m1.id, None).await.unwrap();
        assert!(svc.get(&session.id).await.unwrap().revert_pointer.is_some());
        svc.unrevert(&session.id).await.unwrap();
        assert!(svc.get(&session.id).await.unwrap().revert_pointer.is_none());
    }

    #[tokio::test]
    async fn begin_turn_twice_is_busy() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/a", None).await.unwrap();
        let _token = svc.begin_turn(&session.id).unwrap();
        let err = svc.begin_turn(&session.id).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        svc.end_turn(&session.id);
        assert!(svc.begin_turn(&session.id).is_ok());
    }

    #[tokio::test]
    async fn abort_without_active_turn_is_not_found() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/a", None).await.unwrap();
        let err = svc.abort(&session.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn abort_cancels_the_registered_token() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/a", None).await.unwrap();
        let token = svc.begin_turn(&session.id).unwrap();
        svc.abort(&session.id).await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn share_then_unshare_round_trips() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/a", None).await.unwrap();
        let url = svc.share(&session.id).await.unwrap();
        assert!(url.starts_with("https://share.local/"));
        assert_eq!(svc.get(&session.id).await.unwrap().share_url.unwrap(), url);
        svc.unshare(&session.id).await.unwrap();
        assert!(svc.get(&session.id).await.unwrap().share_url.is_none());
    }

    #[tokio::test]
    async fn update_title_renames_and_bumps_updated_at() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/a", None).await.unwrap();
        let renamed = svc.update_title(&session.id, "new title".into()).await.unwrap();
        assert_eq!(renamed.title, "new title");
        assert_eq!(svc.get(&session.id).await.unwrap().title, "new title");
    }

    #[tokio::test]
    async fn list_messages_returns_messages_with_parts() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/a", None).await.unwrap();
        svc.add_message(&session.id, "hi").await.unwrap();
        let loaded = svc.list_messages(&session.id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].parts.len(), 1);
    }

    #[test]
    fn split_diff_groups_by_file_header() {
        let text = "diff --git a/foo.rs b/foo.rs\n--- a/foo.rs\n+++ b/foo.rs\n@@ -1 +1 @@\n-old\n+new\n";
        let diffs = split_diff_by_file(text);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "foo.rs");
        assert!(diffs[0].diff.contains("-old"));
    }

    #[tokio::test]
    async fn execute_command_runs_a_tool_directly() {
        let (_dir, svc) = service();
        let out = svc.execute_command(CancellationToken::new(), "todo_read", serde_json::json!({})).await.unwrap();
        assert!(!out.is_error);
    }
}
