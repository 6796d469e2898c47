// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Picks a formatter subprocess by file extension. This is a thin boundary
/// over whatever formatter is installed on $PATH — it does not implement
/// formatting itself.
fn formatter_for(path: &str) -> Option<(&'static str, Vec<String>)> {
    let ext = std::path::Path::new(path).extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "rs" => Some(("rustfmt", vec![path.to_string()])),
        "go" => Some(("gofmt", vec!["-w".to_string(), path.to_string()])),
        "py" => Some(("black", vec!["-q".to_string(), path.to_string()])),
        "js" | "jsx" | "ts" | "tsx" | "json" | "css" | "scss" | "html" | "md" | "yaml" | "yml" => {
            Some(("prettier", vec!["--write".to_string(), path.to_string()]))
        }
        _ => None,
    }
}

pub struct FormatTool;

#[async_trait]
impl Tool for FormatTool {
    fn name(&self) -> &str { "format" }

    fn description(&self) -> &str {
        "Format a file in place using the formatter for its extension:\n\
         .rs → rustfmt, .go → gofmt, .py → black, .js/.ts/.json/.css/.html/.md/.yaml → prettier.\n\
         Requires the formatter binary to be installed on PATH. Unknown extensions are an error."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to format in place"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
        let path = match call.input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.call_id, "missing required parameter 'path'"),
        };

        let (bin, args) = match formatter_for(&path) {
            Some(pair) => pair,
            None => return ToolOutput::err(&call.call_id, format!("no formatter registered for {path}")),
        };

        debug!(path = %path, formatter = bin, "format tool");

        if ctx.is_cancelled() {
            return ToolOutput::cancelled(&call.call_id);
        }

        let mut cmd = tokio::process::Command::new(bin);
        cmd.args(&args).stdin(Stdio::null()).kill_on_drop(true);

        let result = tokio::select! {
            res = cmd.output() => res,
            _ = ctx.cancelled() => return ToolOutput::cancelled(&call.call_id),
        };

        match result {
            Ok(out) if out.status.success() => ToolOutput::ok(&call.call_id, format!("formatted {path} with {bin}")),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                ToolOutput::err(&call.call_id, format!("{bin} failed: {stderr}"))
            }
            Err(e) => ToolOutput::err(&call.call_id, format!("spawn error: {bin}: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::Tool;

    fn call(input: serde_json::Value) -> ToolCall {
        ToolCall { call_id: "f1".into(), tool: "format".into(), input }
    }

    #[tokio::test]
    async fn missing_path_is_error() {
        let out = FormatTool.execute(CancellationToken::new(), &call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("path"));
    }

    #[tokio::test]
    async fn unknown_extension_is_error() {
        let out = FormatTool.execute(CancellationToken::new(), &call(json!({"path": "/tmp/file.xyz_unknown"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("no formatter"));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let out = FormatTool.execute(ctx, &call(json!({"path": "/tmp/file.rs"}))).await;
        assert!(out.is_error);
        assert_eq!(out.content, "cancelled");
    }

    #[test]
    fn formatter_for_maps_known_extensions() {
        assert_eq!(formatter_for("/a/b.rs").unwrap().0, "rustfmt");
        assert_eq!(formatter_for("/a/b.go").unwrap().0, "gofmt");
        assert_eq!(formatter_for("/a/b.py").unwrap().0, "black");
        assert_eq!(formatter_for("/a/b.ts").unwrap().0, "prettier");
        assert!(formatter_for("/a/b.bin").is_none());
    }
}
