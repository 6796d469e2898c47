// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str { "write" }

    fn description(&self) -> &str {
        "Writes a file to the local filesystem. This tool will overwrite the existing file if \
         one exists at the provided path. ALWAYS prefer editing existing files with edit_file. \
         NEVER write new files unless explicitly required. \
         NEVER proactively create documentation or README files unless explicitly requested. \
         Creates parent directories automatically. \
         Set append=true to add to the end of an existing file instead of overwriting."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                },
                "append": {
                    "type": "boolean",
                    "description": "If true, append to existing content instead of overwriting (default false)"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Ask }

    async fn execute(&self, ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
        let path = match call.input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => {
                let input_preview = serde_json::to_string(&call.input).unwrap_or_else(|_| "null".to_string());
                return ToolOutput::err(
                    &call.call_id,
                    format!("missing required parameter 'path'. Received: {}", input_preview),
                );
            }
        };
        let content = match call.input.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => {
                let input_preview = serde_json::to_string(&call.input).unwrap_or_else(|_| "null".to_string());
                return ToolOutput::err(
                    &call.call_id,
                    format!("missing required parameter 'content'. Received: {}", input_preview),
                );
            }
        };
        let should_append = call.input.get("append").and_then(|v| v.as_bool()).unwrap_or(false);

        debug!(path = %path, append = should_append, "write tool");

        if ctx.is_cancelled() {
            return ToolOutput::cancelled(&call.call_id);
        }

        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }

        if should_append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new().append(true).create(true).open(&path).await {
                Ok(mut f) => {
                    let result = f.write_all(content.as_bytes()).await;
                    let _ = f.flush().await;
                    let _ = f.shutdown().await;
                    match result {
                        Ok(_) => ToolOutput::ok(&call.call_id, format!("appended {} bytes to {path}", content.len())),
                        Err(e) => ToolOutput::err(&call.call_id, format!("write error: {e}")),
                    }
                }
                Err(e) => ToolOutput::err(&call.call_id, format!("open error: {e}")),
            }
        } else {
            match tokio::fs::write(&path, &content).await {
                Ok(_) => ToolOutput::ok(&call.call_id, format!("wrote {} bytes to {path}", content.len())),
                Err(e) => ToolOutput::err(&call.call_id, format!("write error: {e}")),
            }
        }
    }
}
