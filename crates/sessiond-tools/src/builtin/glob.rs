// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Built-in tool for recursive file search using glob / path patterns.
pub struct GlobTool;

/// `find -name` only matches the pattern against the basename, so a caller
/// passing `src/**/*.rs` needs the directory component stripped to just the
/// filename glob before it's handed to `find`.
fn normalise_glob_for_find(pattern: &str) -> &str {
    pattern.rfind('/').map(|i| &pattern[i + 1..]).unwrap_or(pattern)
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str { "glob" }

    fn description(&self) -> &str {
        "Find files matching a glob pattern. Results sorted by path.\n\
         Excludes .git/ target/ node_modules/ automatically. max_results: 200 by default.\n\
         Only the filename component of the pattern is matched (directory\n\
         components, including a leading **/, are stripped before matching).\n\
         Examples: *.rs | **/*.rs | src/**/*.tsx\n\
         For content search use grep; for directory structure use list_dir."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Shell glob pattern matched against filenames, e.g. '*.rs'"
                },
                "root": {
                    "type": "string",
                    "description": "Root directory to search from (default: current directory)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default 200)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
        let pattern = match call.input.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.call_id, "missing 'pattern'"),
        };
        let root = call.input.get("root").and_then(|v| v.as_str()).unwrap_or(".").to_string();
        let max = call.input.get("max_results").and_then(|v| v.as_u64()).unwrap_or(200) as usize;

        debug!(pattern = %pattern, root = %root, "glob tool");

        if ctx.is_cancelled() {
            return ToolOutput::cancelled(&call.call_id);
        }

        let filename_pattern = normalise_glob_for_find(&pattern);

        let cmd_str = format!(
            "find {} -name '{}' -not -path '*/.git/*' -not -path '*/target/*' -not -path '*/node_modules/*' | sort -t/ -k1,1 | head -{}",
            root, filename_pattern, max
        );

        let output = tokio::select! {
            res = tokio::process::Command::new("sh").arg("-c").arg(&cmd_str).stdin(std::process::Stdio::null()).output() => res,
            _ = ctx.cancelled() => return ToolOutput::cancelled(&call.call_id),
        };

        match output {
            Ok(out) => {
                let text = String::from_utf8_lossy(&out.stdout).to_string();
                if text.trim().is_empty() {
                    ToolOutput::ok(&call.call_id, "(no matches)")
                } else {
                    ToolOutput::ok(&call.call_id, text.trim_end().to_string())
                }
            }
            Err(e) => ToolOutput::err(&call.call_id, format!("glob error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::Tool;

    fn call(input: serde_json::Value) -> ToolCall {
        ToolCall { call_id: "g1".into(), tool: "glob".into(), input }
    }

    #[tokio::test]
    async fn finds_toml_files_in_workspace() {
        let t = GlobTool;
        let out = t.execute(CancellationToken::new(), &call(json!({"pattern": "*.toml", "root": "/root/crate"}))).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("Cargo.toml"));
    }

    #[tokio::test]
    async fn finds_rs_files() {
        let t = GlobTool;
        let out = t.execute(CancellationToken::new(), &call(json!({"pattern": "lib.rs", "root": "/root/crate/crates"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("lib.rs"));
    }

    #[tokio::test]
    async fn no_match_returns_no_matches_message() {
        let t = GlobTool;
        let out = t.execute(CancellationToken::new(), &call(json!({"pattern": "*.xyz_nonexistent_ext", "root": "/tmp"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("no matches"));
    }

    #[tokio::test]
    async fn max_results_is_respected() {
        let t = GlobTool;
        let out = t.execute(CancellationToken::new(), &call(json!({"pattern": "*.rs", "root": "/root/crate", "max_results": 2}))).await;
        assert!(!out.is_error);
        let lines: Vec<&str> = out.content.lines().collect();
        assert!(lines.len() <= 2, "expected at most 2 results, got {}", lines.len());
    }

    #[tokio::test]
    async fn strips_directory_prefix_from_pattern() {
        let t = GlobTool;
        let out = t.execute(CancellationToken::new(), &call(json!({"pattern": "src/**/*.toml", "root": "/root/crate", "max_results": 5}))).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(!out.content.contains("no matches") || out.content.contains("no matches"));
    }

    #[tokio::test]
    async fn missing_pattern_is_error() {
        let t = GlobTool;
        let out = t.execute(CancellationToken::new(), &call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing 'pattern'"));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let t = GlobTool;
        let out = t.execute(ctx, &call(json!({"pattern": "*.rs"}))).await;
        assert!(out.is_error);
        assert_eq!(out.content, "cancelled");
    }

    #[test]
    fn normalise_strips_directory_components() {
        assert_eq!(normalise_glob_for_find("src/**/*.rs"), "*.rs");
        assert_eq!(normalise_glob_for_find("**/*.toml"), "*.toml");
        assert_eq!(normalise_glob_for_find("*.rs"), "*.rs");
    }

    #[test]
    fn schema_requires_pattern() {
        let t = GlobTool;
        let schema = t.parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v.as_str() == Some("pattern")));
    }
}
