// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::policy::ApprovalPolicy;

/// A tool invocation as C3 receives it from the session loop: the id C6
/// correlates a response to, which tool, and its arguments.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub call_id: String,
    pub tool: String,
    pub input: Value,
}

#[derive(Debug, Clone)]
pub enum ToolOutputPart {
    Text(String),
    Image(String),
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub parts: Vec<ToolOutputPart>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: &str, content: impl Into<String>) -> Self {
        Self { call_id: call_id.to_string(), content: content.into(), parts: Vec::new(), is_error: false }
    }

    pub fn err(call_id: &str, content: impl Into<String>) -> Self {
        Self { call_id: call_id.to_string(), content: content.into(), parts: Vec::new(), is_error: true }
    }

    pub fn with_parts(call_id: &str, parts: Vec<ToolOutputPart>) -> Self {
        let content = parts.iter()
            .filter_map(|p| match p { ToolOutputPart::Text(t) => Some(t.clone()), ToolOutputPart::Image(_) => None })
            .collect::<Vec<_>>()
            .join("\n");
        Self { call_id: call_id.to_string(), content, parts, is_error: false }
    }

    /// A cancelled invocation: §A.4.3 requires `error = {kind: cancelled}`.
    pub fn cancelled(call_id: &str) -> Self {
        Self::err(call_id, "cancelled")
    }

    pub fn has_images(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ToolOutputPart::Image(_)))
    }
}

/// Hints the presenting layer at how to shape long output (where to truncate,
/// which lines matter most) without the tool having to do its own rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Preserve both ends: shell output where the command preamble and the
    /// final error both matter.
    HeadTail,
    /// A list of file:line matches — each line stands alone.
    MatchList,
    /// File content with line numbers.
    FileContent,
    #[default]
    Generic,
}

/// A built-in or externally-bridged tool. `execute` must honor `ctx`
/// cancellation: once cancelled, further work should stop and the call
/// should resolve via [`ToolOutput::cancelled`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn default_policy(&self) -> ApprovalPolicy;
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    async fn execute(&self, ctx: CancellationToken, call: &ToolCall) -> ToolOutput;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str { "minimal" }
        fn description(&self) -> &str { "does nothing" }
        fn parameters_schema(&self) -> Value { serde_json::json!({"type": "object"}) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
        async fn execute(&self, _ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.call_id, "done")
        }
    }

    struct HeadTailTool;

    #[async_trait]
    impl Tool for HeadTailTool {
        fn name(&self) -> &str { "head_tail" }
        fn description(&self) -> &str { "shell-like" }
        fn parameters_schema(&self) -> Value { serde_json::json!({"type": "object"}) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Ask }
        fn output_category(&self) -> OutputCategory { OutputCategory::HeadTail }
        async fn execute(&self, _ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.call_id, "done")
        }
    }

    #[test]
    fn default_output_category_is_generic() {
        assert_eq!(MinimalTool.output_category(), OutputCategory::Generic);
    }

    #[test]
    fn overridden_output_category_is_respected() {
        assert_eq!(HeadTailTool.output_category(), OutputCategory::HeadTail);
    }

    #[tokio::test]
    async fn execute_runs_to_completion() {
        let t = MinimalTool;
        let call = ToolCall { call_id: "c1".into(), tool: "minimal".into(), input: serde_json::json!({}) };
        let out = t.execute(CancellationToken::new(), &call).await;
        assert!(!out.is_error);
        assert_eq!(out.content, "done");
    }

    #[test]
    fn cancelled_output_is_flagged_error() {
        let out = ToolOutput::cancelled("c1");
        assert!(out.is_error);
        assert_eq!(out.content, "cancelled");
    }

    #[test]
    fn with_parts_joins_text_and_flags_images() {
        let out = ToolOutput::with_parts("c1", vec![
            ToolOutputPart::Text("hello".into()),
            ToolOutputPart::Image("data:image/png;base64,AAAA".into()),
        ]);
        assert_eq!(out.content, "hello");
        assert!(out.has_images());
    }
}
