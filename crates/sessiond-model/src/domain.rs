// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persisted domain entities: `Session`, `Message`, `Part`, `PermissionRequest`,
//! `Todo`. These are distinct from the [`crate::ProviderMessage`]/
//! [`crate::ProviderContent`] wire types — a `Message` here is the durable,
//! per-turn record; a `ProviderMessage` is what gets sent over the wire to an
//! LLM for a single completion call.
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::CoreError;

/// Generate a new lexicographically-sortable id.
///
/// ULIDs encode creation time in their first 48 bits, so ids minted later
/// always sort after ids minted earlier (invariant 1: Monotonic IDs).
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Integer milliseconds since the Unix epoch.
pub type TimestampMs = i64;

pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

/// A single conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub project_directory: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
    /// Id of the message a revert truncates history at. Visible history
    /// excludes messages with id >= this pointer; the underlying records
    /// are untouched. `None` means no revert is in effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert_pointer: Option<String>,
}

impl Session {
    pub fn new(project_directory: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: new_id(),
            parent_id: None,
            project_directory: project_directory.into(),
            title: title.into(),
            share_url: None,
            created_at: now,
            updated_at: now,
            revert_pointer: None,
        }
    }

    pub fn fork_from(&self, new_id_value: String) -> Self {
        let now = now_ms();
        Self {
            id: new_id_value,
            parent_id: Some(self.id.clone()),
            project_directory: self.project_directory.clone(),
            title: self.title.clone(),
            share_url: None,
            created_at: now,
            updated_at: now,
            revert_pointer: None,
        }
    }

    /// Revert truncates visible history at (and including) `message_id`.
    pub fn revert(&mut self, message_id: String) {
        self.revert_pointer = Some(message_id);
        self.updated_at = now_ms();
    }

    pub fn unrevert(&mut self) {
        self.revert_pointer = None;
        self.updated_at = now_ms();
    }

    /// Re-sending after a revert moves the pointer forward to the new
    /// message rather than clearing it — a pointer-bump, not a destructive
    /// replace of the reverted tail.
    pub fn bump_revert_pointer(&mut self, new_message_id: String) {
        if self.revert_pointer.is_some() {
            self.revert_pointer = Some(new_message_id);
            self.updated_at = now_ms();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Provider/model reference an assistant message was generated against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
    pub cache_read: u32,
    pub cache_write: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageTime {
    pub created: TimestampMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<TimestampMs>,
}

/// One user or assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<ModelRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<std::collections::BTreeMap<String, bool>>,
    pub time: MessageTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CoreError>,
}

impl Message {
    pub fn new_user(session_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: new_id(),
            session_id: session_id.into(),
            role: MessageRole::User,
            agent: None,
            model_ref: None,
            tools: None,
            time: MessageTime { created: now, completed: Some(now) },
            tokens: None,
            error: None,
        }
    }

    pub fn new_assistant(session_id: impl Into<String>, model_ref: ModelRef) -> Self {
        Self {
            id: new_id(),
            session_id: session_id.into(),
            role: MessageRole::Assistant,
            agent: None,
            model_ref: Some(model_ref),
            tools: None,
            time: MessageTime { created: now_ms(), completed: None },
            tokens: None,
            error: None,
        }
    }

    /// An assistant message is `completed` only when its LLM loop terminates
    /// normally or with a captured error — never left dangling mid-turn.
    pub fn complete(&mut self, tokens: Option<TokenUsage>, error: Option<CoreError>) {
        self.time.completed = Some(now_ms());
        self.tokens = tokens;
        self.error = error;
    }

    pub fn is_completed(&self) -> bool {
        self.time.completed.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    Pending,
    Running,
    AwaitingPermission,
    Done,
    Error,
}

/// A typed component of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text(TextPart),
    Tool(ToolPart),
    File(FilePart),
    StepStart(StepMarkerPart),
    StepFinish(StepMarkerPart),
    Error(ErrorPart),
}

impl Part {
    pub fn id(&self) -> &str {
        match self {
            Part::Text(p) => &p.id,
            Part::Tool(p) => &p.id,
            Part::File(p) => &p.id,
            Part::StepStart(p) | Part::StepFinish(p) => &p.id,
            Part::Error(p) => &p.id,
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Part::Text(p) => &p.message_id,
            Part::Tool(p) => &p.message_id,
            Part::File(p) => &p.message_id,
            Part::StepStart(p) | Part::StepFinish(p) => &p.message_id,
            Part::Error(p) => &p.message_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    pub id: String,
    pub message_id: String,
    pub session_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPart {
    pub id: String,
    pub message_id: String,
    pub session_id: String,
    pub tool: String,
    pub call_id: String,
    pub state: ToolState,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CoreError>,
}

impl ToolPart {
    pub fn new_pending(
        message_id: impl Into<String>,
        session_id: impl Into<String>,
        tool: impl Into<String>,
        call_id: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: new_id(),
            message_id: message_id.into(),
            session_id: session_id.into(),
            tool: tool.into(),
            call_id: call_id.into(),
            state: ToolState::Pending,
            input,
            output: None,
            error: None,
        }
    }

    /// A part in `done` or `error` state has immutable output/error;
    /// transitioning away from a terminal state is refused.
    pub fn resolve_ok(&mut self, output: serde_json::Value) -> Result<(), &'static str> {
        if self.is_terminal() {
            return Err("tool part already resolved");
        }
        self.state = ToolState::Done;
        self.output = Some(output);
        Ok(())
    }

    pub fn resolve_err(&mut self, error: CoreError) -> Result<(), &'static str> {
        if self.is_terminal() {
            return Err("tool part already resolved");
        }
        self.state = ToolState::Error;
        self.error = Some(error);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ToolState::Done | ToolState::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePart {
    pub id: String,
    pub message_id: String,
    pub session_id: String,
    pub mime: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

/// Boundary marker within an assistant message (streamed reasoning blocks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMarkerPart {
    pub id: String,
    pub message_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPart {
    pub id: String,
    pub message_id: String,
    pub session_id: String,
    #[serde(flatten)]
    pub error: CoreError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionState {
    Pending,
    AllowedOnce,
    AllowedAlways,
    Denied,
}

impl PermissionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PermissionState::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    pub tool: String,
    pub call_id: String,
    pub pattern: String,
    pub created_at: TimestampMs,
    pub state: PermissionState,
}

impl PermissionRequest {
    pub fn new_pending(
        session_id: impl Into<String>,
        tool: impl Into<String>,
        call_id: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            session_id: session_id.into(),
            tool: tool.into(),
            call_id: call_id.into(),
            pattern: pattern.into(),
            created_at: now_ms(),
            state: PermissionState::Pending,
        }
    }

    /// Terminal states are immutable: a second reply to an already-resolved
    /// request is refused so callers can surface it as `Conflict`.
    pub fn resolve(&mut self, state: PermissionState) -> Result<(), &'static str> {
        if self.state.is_terminal() {
            return Err("permission request already resolved");
        }
        self.state = state;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TodoState {
    Pending,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub session_id: String,
    pub text: String,
    pub state: TodoState,
    pub created_at: TimestampMs,
}

impl Todo {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            session_id: session_id.into(),
            text: text.into(),
            state: TodoState::Pending,
            created_at: now_ms(),
        }
    }
}
