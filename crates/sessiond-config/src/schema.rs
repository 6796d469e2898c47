// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_state_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("sessiond")
}

fn default_true() -> bool {
    true
}

fn default_max_tool_rounds() -> u32 {
    25
}

fn default_tool_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for session/message/part storage (see `sessiond-storage`).
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Named provider overrides (base URL, credential env var, API key),
    /// keyed by the `DriverMeta::id` they customize.
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Named agent presets bundling a system prompt, tool allowlist, and
    /// approval patterns; selected per-session by name.
    #[serde(default)]
    pub agents: AgentsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            model: ModelConfig::default(),
            tools: ToolsConfig::default(),
            providers: ProvidersConfig::default(),
            agents: AgentsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default provider id; must resolve via `sessiond_model::registry::get_driver`.
    pub provider: String,
    /// Default model id forwarded to the provider.
    pub model: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { provider: "anthropic".into(), model: "claude-opus-4-6".into(), temperature: None, max_output_tokens: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Environment variable holding the API key; overrides the driver default.
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer `api_key_env` in committed config files.
    pub api_key: Option<String>,
    /// Base URL override, e.g. a local proxy or gateway.
    pub base_url: Option<String>,
}

pub type ProvidersConfig = HashMap<String, ProviderConfig>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Shell command glob patterns that are auto-approved without asking.
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
    /// Shell command glob patterns that are always denied.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Per-tool-call wall-clock timeout.
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    /// Tool-loop round budget; see `sessiond_core::service::DEFAULT_MAX_TOOL_ROUNDS`.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Client-tool response timeout in seconds (§A.4.5).
    #[serde(default = "default_client_tool_timeout_secs")]
    pub client_tool_timeout_secs: u64,
}

fn default_client_tool_timeout_secs() -> u64 {
    120
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: Vec::new(),
            deny_patterns: Vec::new(),
            timeout_secs: default_tool_timeout_secs(),
            max_tool_rounds: default_max_tool_rounds(),
            client_tool_timeout_secs: default_client_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPreset {
    /// System prompt override; falls back to the built-in prompt when unset.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Restricts which tools this agent may call; `None` means all registered
    /// tools are available.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

pub type AgentsConfig = HashMap<String, AgentPreset>;
