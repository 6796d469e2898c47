// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sessiond_model::domain::{Todo, TodoState as DomainTodoState};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Shared todo list for one session. Cloning shares the underlying list —
/// `TodoReadTool` and `TodoWriteTool` hold independent clones that observe
/// the same state.
#[derive(Clone)]
pub struct TodoState {
    session_id: String,
    todos: Arc<Mutex<Vec<Todo>>>,
}

impl TodoState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), todos: Arc::new(Mutex::new(Vec::new())) }
    }
}

fn parse_state(s: &str) -> Option<DomainTodoState> {
    match s {
        "pending" => Some(DomainTodoState::Pending),
        "in_progress" => Some(DomainTodoState::InProgress),
        "done" => Some(DomainTodoState::Done),
        _ => None,
    }
}

fn state_label(s: DomainTodoState) -> &'static str {
    match s {
        DomainTodoState::Pending => "pending",
        DomainTodoState::InProgress => "in_progress",
        DomainTodoState::Done => "done",
    }
}

fn format_todos(items: &[Todo]) -> String {
    if items.is_empty() {
        return "Todo list cleared.".to_string();
    }
    let lines: Vec<String> = items
        .iter()
        .map(|t| {
            let icon = match t.state {
                DomainTodoState::Done => "✓",
                DomainTodoState::InProgress => "→",
                DomainTodoState::Pending => "○",
            };
            format!("{icon} [{}] {}", t.id, t.text)
        })
        .collect();
    format!("Todos updated:\n{}", lines.join("\n"))
}

// ── todo_read ─────────────────────────────────────────────────────────────────

pub struct TodoReadTool {
    state: TodoState,
}

impl TodoReadTool {
    pub fn new(state: TodoState) -> Self { Self { state } }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str { "todo_read" }

    fn description(&self) -> &str { "Read the current structured task list for the session." }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
        if ctx.is_cancelled() {
            return ToolOutput::cancelled(&call.call_id);
        }
        let items = self.state.todos.lock().await;
        if items.is_empty() {
            ToolOutput::ok(&call.call_id, "(no todos)")
        } else {
            ToolOutput::ok(&call.call_id, format_todos(&items))
        }
    }
}

// ── todo_write ────────────────────────────────────────────────────────────────

pub struct TodoWriteTool {
    state: TodoState,
}

impl TodoWriteTool {
    pub fn new(state: TodoState) -> Self { Self { state } }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str { "todo_write" }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current session.\n\n\
         Note: Other than when first creating todos, don't tell the user you're updating \
         todos — just do it silently.\n\n\
         ## Task Statuses\n\
         - pending: Not yet started\n\
         - in_progress: Currently being worked on (only ONE at a time)\n\
         - done: Finished successfully\n\n\
         ## When to Use\n\
         Use proactively for:\n\
         - Complex multi-step tasks (3+ distinct steps)\n\
         - Non-trivial tasks requiring careful planning\n\
         - User provides multiple tasks to accomplish\n\n\
         ## When NOT to Use\n\
         Skip for single, straightforward, or purely conversational requests.\n\n\
         ## IMPORTANT\n\
         - Each item requires a unique id and text\n\
         - Only one item in_progress at a time — enforced at execution\n\
         - Calling todo_write replaces the entire list (not a merge/patch)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Array of todo items to set (replaces existing list)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "description": "Unique identifier for the task" },
                            "text": { "type": "string", "description": "Description of the task" },
                            "state": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "done"],
                                "description": "Current state of the task"
                            }
                        },
                        "required": ["id", "text", "state"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
        let todos_value = match call.input.get("todos").and_then(|v| v.as_array()) {
            Some(arr) => arr.clone(),
            None => return ToolOutput::err(&call.call_id, "missing 'todos' array"),
        };

        if ctx.is_cancelled() {
            return ToolOutput::cancelled(&call.call_id);
        }

        let mut items: Vec<Todo> = Vec::new();
        for item in &todos_value {
            let id = match item.get("id").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.call_id, "todo item missing 'id'"),
            };
            let text = match item.get("text").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.call_id, format!("todo '{id}' missing 'text'")),
            };
            let state_str = match item.get("state").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.call_id, format!("todo '{id}' missing 'state'")),
            };
            let state = match parse_state(&state_str) {
                Some(s) => s,
                None => return ToolOutput::err(&call.call_id, format!("invalid state '{state_str}' for todo '{id}'")),
            };

            let mut todo = Todo::new(self.state.session_id.clone(), text);
            todo.id = id;
            todo.state = state;
            items.push(todo);
        }

        let in_progress_count = items.iter().filter(|t| t.state == DomainTodoState::InProgress).count();
        if in_progress_count > 1 {
            return ToolOutput::err(&call.call_id, "at most one todo can be 'in_progress' at a time");
        }

        debug!(count = items.len(), "todo_write tool");

        *self.state.todos.lock().await = items.clone();

        let summary = format_todos(&items);
        ToolOutput::ok(&call.call_id, summary)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::Tool;

    fn call(input: serde_json::Value) -> ToolCall {
        ToolCall { call_id: "t1".into(), tool: "todo_write".into(), input }
    }

    #[tokio::test]
    async fn sets_todos() {
        let state = TodoState::new("sess1");
        let write = TodoWriteTool::new(state.clone());
        let out = write
            .execute(
                CancellationToken::new(),
                &call(json!({
                    "todos": [
                        {"id": "1", "text": "do something", "state": "pending"},
                        {"id": "2", "text": "in progress", "state": "in_progress"}
                    ]
                })),
            )
            .await;
        assert!(!out.is_error, "{}", out.content);
        let locked = state.todos.lock().await;
        assert_eq!(locked.len(), 2);
        assert_eq!(locked[0].id, "1");
    }

    #[tokio::test]
    async fn read_reflects_write() {
        let state = TodoState::new("sess1");
        let write = TodoWriteTool::new(state.clone());
        let read = TodoReadTool::new(state.clone());

        write.execute(CancellationToken::new(), &call(json!({"todos": [{"id": "a", "text": "task", "state": "pending"}]}))).await;

        let out = read.execute(CancellationToken::new(), &ToolCall { call_id: "r1".into(), tool: "todo_read".into(), input: json!({}) }).await;
        assert!(!out.is_error);
        assert!(out.content.contains("task"));
    }

    #[tokio::test]
    async fn rejects_multiple_in_progress() {
        let state = TodoState::new("sess1");
        let write = TodoWriteTool::new(state);
        let out = write
            .execute(
                CancellationToken::new(),
                &call(json!({
                    "todos": [
                        {"id": "1", "text": "a", "state": "in_progress"},
                        {"id": "2", "text": "b", "state": "in_progress"}
                    ]
                })),
            )
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("at most one"));
    }

    #[tokio::test]
    async fn rejects_unknown_state() {
        let state = TodoState::new("sess1");
        let write = TodoWriteTool::new(state);
        let out = write.execute(CancellationToken::new(), &call(json!({"todos": [{"id": "1", "text": "a", "state": "cancelled"}]}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid state"));
    }

    #[tokio::test]
    async fn missing_todos_is_error() {
        let state = TodoState::new("sess1");
        let write = TodoWriteTool::new(state);
        let out = write.execute(CancellationToken::new(), &call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing 'todos'"));
    }

    #[tokio::test]
    async fn empty_read_before_any_write() {
        let state = TodoState::new("sess1");
        let read = TodoReadTool::new(state);
        let out = read.execute(CancellationToken::new(), &ToolCall { call_id: "r1".into(), tool: "todo_read".into(), input: json!({}) }).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "(no todos)");
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits_write() {
        let state = TodoState::new("sess1");
        let write = TodoWriteTool::new(state);
        let ctx = CancellationToken::new();
        ctx.cancel();
        let out = write.execute(ctx, &call(json!({"todos": []}))).await;
        assert!(out.is_error);
        assert_eq!(out.content, "cancelled");
    }
}
