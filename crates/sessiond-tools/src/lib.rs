// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool registry and runtime (C3): built-in tools plus the registry that
//! gives external tools (MCP, client-tool bridge) the same face as an
//! in-process one. See [`tool::Tool`] for the invocation contract.
pub mod builtin;
pub mod policy;
pub mod registry;
pub mod tool;

pub use policy::{glob_to_regex, ApprovalPolicy, ToolPolicy};
pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{OutputCategory, Tool, ToolCall, ToolOutput, ToolOutputPart};

/// Build a registry with every built-in tool registered under its spec name.
pub fn builtin_registry(todo_state: builtin::todo::TodoState) -> ToolRegistry {
    use std::sync::Arc;

    let mut reg = ToolRegistry::new();
    reg.register(Arc::new(builtin::read_file::ReadFileTool));
    reg.register(Arc::new(builtin::write::WriteTool));
    reg.register(Arc::new(builtin::edit_file::EditFileTool));
    reg.register(Arc::new(builtin::list_dir::ListDirTool));
    reg.register(Arc::new(builtin::shell::ShellTool::default()));
    reg.register(Arc::new(builtin::grep::GrepTool));
    reg.register(Arc::new(builtin::glob::GlobTool));
    reg.register(Arc::new(builtin::symbol_search::SymbolSearchTool));
    reg.register(Arc::new(builtin::web_fetch::WebFetchTool));
    reg.register(Arc::new(builtin::format::FormatTool));
    reg.register(Arc::new(builtin::todo::TodoReadTool::new(todo_state.clone())));
    reg.register(Arc::new(builtin::todo::TodoWriteTool::new(todo_state)));
    reg
}
