// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System prompt assembly (§A.4.6 step 2): agent definition, project context
//! files, and init directives, concatenated into the one system message
//! every completion request opens with.
use std::path::Path;

/// Project context file names checked, in order, in the session's project
/// directory. The first one found is read in full; later names are
/// fallbacks for repos that use a different convention.
const PROJECT_CONTEXT_FILES: &[&str] = &["AGENTS.md", "CLAUDE.md", "README.md"];

/// Runtime-detected context for one session, separate from persisted state:
/// which agent it runs as, and any directives layered on top by the caller
/// (CLI `--append-system-prompt`, a CI init script, etc).
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub agent_name: Option<String>,
    pub agent_system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
    pub init_directives: Vec<String>,
}

fn read_project_context(project_directory: &str) -> Option<(String, String)> {
    let root = Path::new(project_directory);
    for name in PROJECT_CONTEXT_FILES {
        let path = root.join(name);
        if let Ok(text) = std::fs::read_to_string(&path) {
            return Some((name.to_string(), text));
        }
    }
    None
}

/// Build the system prompt for one completion call. Order: agent
/// definition, project context file, init directives, then any
/// caller-supplied append text last so it always has the final word.
pub fn build_system_prompt(project_directory: &str, ctx: &PromptContext) -> String {
    let mut sections = Vec::new();

    if let Some(agent) = &ctx.agent_system_prompt {
        sections.push(agent.clone());
    } else {
        sections.push("You are a careful, autonomous coding assistant.".to_string());
    }

    if let Some((name, text)) = read_project_context(project_directory) {
        sections.push(format!("# Project context ({name})\n\n{text}"));
    }

    for directive in &ctx.init_directives {
        sections.push(directive.clone());
    }

    if let Some(append) = &ctx.append_system_prompt {
        sections.push(append.clone());
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn falls_back_to_default_persona_with_no_agent_prompt() {
        let dir = TempDir::new().unwrap();
        let prompt = build_system_prompt(dir.path().to_str().unwrap(), &PromptContext::default());
        assert!(prompt.contains("careful, autonomous"));
    }

    #[test]
    fn includes_project_context_file_when_present() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "Always run tests before committing.").unwrap();
        let prompt = build_system_prompt(dir.path().to_str().unwrap(), &PromptContext::default());
        assert!(prompt.contains("Always run tests before committing."));
        assert!(prompt.contains("AGENTS.md"));
    }

    #[test]
    fn append_system_prompt_comes_last() {
        let dir = TempDir::new().unwrap();
        let ctx = PromptContext { append_system_prompt: Some("Extra rule.".into()), ..Default::default() };
        let prompt = build_system_prompt(dir.path().to_str().unwrap(), &ctx);
        assert!(prompt.trim_end().ends_with("Extra rule."));
    }

    #[test]
    fn init_directives_are_included_in_order() {
        let dir = TempDir::new().unwrap();
        let ctx = PromptContext {
            init_directives: vec!["Directive A".into(), "Directive B".into()],
            ..Default::default()
        };
        let prompt = build_system_prompt(dir.path().to_str().unwrap(), &ctx);
        assert!(prompt.find("Directive A").unwrap() < prompt.find("Directive B").unwrap());
    }
}
