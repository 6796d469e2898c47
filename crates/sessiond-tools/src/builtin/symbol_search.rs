// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Ripgrep-backed symbol lookup. There is no language server integration in
/// this binary, so "symbol search" is a regex built from common definition
/// keywords (fn/struct/class/def/interface/...) across popular languages
/// rather than a semantic lookup.
pub struct SymbolSearchTool;

/// Regex alternation matching the start of a definition for `symbol` across
/// Rust, Python, JS/TS, Go, Java/C#/C++ without a language parameter.
fn definition_pattern(symbol: &str) -> String {
    let esc = regex::escape(symbol);
    format!(
        r"\b(fn|struct|enum|trait|impl|class|def|interface|type|func|public\s+\w+\s+class|void|const|let|var)\s+{esc}\b"
    )
}

#[async_trait]
impl Tool for SymbolSearchTool {
    fn name(&self) -> &str { "symbol_search" }

    fn description(&self) -> &str {
        "Find where a symbol (function, type, class) is defined.\n\
         Matches common definition keywords (fn, struct, class, def, interface, ...)\n\
         followed by the symbol name — a heuristic, not a language-server lookup,\n\
         so it can both miss unusual declaration styles and report false positives.\n\
         For free-text or partial matches use grep instead."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "Exact identifier to search for a definition of"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (default: current directory)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of matches to return (default 50)"
                }
            },
            "required": ["symbol"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
    fn output_category(&self) -> OutputCategory { OutputCategory::MatchList }

    async fn execute(&self, ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
        let symbol = match call.input.get("symbol").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.call_id, "missing required parameter 'symbol'"),
        };
        let path = call.input.get("path").and_then(|v| v.as_str()).unwrap_or(".").to_string();
        let limit = call.input.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as usize;

        debug!(symbol = %symbol, path = %path, "symbol_search tool");

        if ctx.is_cancelled() {
            return ToolOutput::cancelled(&call.call_id);
        }

        let pattern = definition_pattern(&symbol);
        let result = tokio::select! {
            res = run_rg(&pattern, &path, limit) => res,
            _ = ctx.cancelled() => return ToolOutput::cancelled(&call.call_id),
        };

        match result {
            Ok(output) if output.trim().is_empty() => ToolOutput::ok(&call.call_id, format!("No definition of '{symbol}' found")),
            Ok(output) => ToolOutput::ok(&call.call_id, output),
            Err(e) => ToolOutput::err(&call.call_id, format!("symbol_search error: {e}")),
        }
    }
}

async fn run_rg(pattern: &str, path: &str, limit: usize) -> anyhow::Result<String> {
    let has_rg = tokio::process::Command::new("which")
        .arg("rg")
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);

    let output = if has_rg {
        tokio::process::Command::new("rg")
            .args(["--color", "never", "--vimgrep", "--no-heading", "-g", "!.git", "-g", "!target", "-g", "!node_modules", pattern, path])
            .stdin(std::process::Stdio::null())
            .output()
            .await?
    } else {
        tokio::process::Command::new("grep").args(["-rnE", pattern, path]).stdin(std::process::Stdio::null()).output().await?
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().take(limit).collect();
    let mut result = lines.join("\n");
    let total = stdout.lines().count();
    if total > limit {
        result.push_str(&format!("\n...[{} more matches not shown]", total - limit));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::Tool;

    fn call(input: serde_json::Value) -> ToolCall {
        ToolCall { call_id: "s1".into(), tool: "symbol_search".into(), input }
    }

    #[tokio::test]
    async fn finds_struct_definition() {
        let out = SymbolSearchTool
            .execute(CancellationToken::new(), &call(json!({"symbol": "ToolCall", "path": "/root/crate/crates/sessiond-tools/src/tool.rs"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("ToolCall"));
    }

    #[tokio::test]
    async fn missing_symbol_is_error() {
        let out = SymbolSearchTool.execute(CancellationToken::new(), &call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("symbol"));
    }

    #[tokio::test]
    async fn no_definition_found_message() {
        let out = SymbolSearchTool.execute(CancellationToken::new(), &call(json!({"symbol": "XyzzyNoSuchSymbol12345", "path": "/tmp"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("No definition"));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let out = SymbolSearchTool.execute(ctx, &call(json!({"symbol": "Foo"}))).await;
        assert!(out.is_error);
        assert_eq!(out.content, "cancelled");
    }

    #[test]
    fn definition_pattern_escapes_regex_metacharacters() {
        let pat = definition_pattern("Foo.Bar");
        assert!(pat.contains(r"Foo\.Bar") || pat.contains("Foo\\.Bar"));
    }
}
