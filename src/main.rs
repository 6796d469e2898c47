// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use sessiond_bus::EventBus;
use sessiond_core::SessionService;
use sessiond_permission::PermissionArbiter;
use sessiond_storage::Store;
use sessiond_tools::builtin::todo::TodoState;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Session Orchestration Core: an HTTP + SSE service multiplexing AI coding
/// sessions over pluggable LLM providers.
#[derive(Parser, Debug)]
#[command(name = "sessiond", version, about)]
struct Cli {
    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "127.0.0.1:4096")]
    bind: SocketAddr,

    /// Path to an explicit config file, merged over the layered search path.
    #[arg(long, short = 'c')]
    config: Option<std::path::PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). Ignored if RUST_LOG or
    /// SESSIOND_LOG_FILE is set.
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Logs go to a file when `SESSIOND_LOG_FILE` is set (useful under a
/// process supervisor), to `RUST_LOG`'s filter if set, or otherwise to
/// stderr at a level derived from `-v` — stderr is safe here since, unlike
/// the interactive TUI this binary's ancestor shipped, nothing here owns
/// the terminal screen; SSE and streaming responses go out over HTTP, not
/// stdout.
fn init_logging(verbosity: u8) {
    if let Ok(log_path) = std::env::var("SESSIOND_LOG_FILE") {
        use std::sync::Mutex;
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_ansi(false).with_writer(Mutex::new(file)))
                .with(filter)
                .try_init();
            return;
        }
    }

    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = sessiond_config::load(cli.config.as_deref())?;
    tracing::info!(state_dir = %config.state_dir.display(), "sessiond: configuration loaded");

    std::fs::create_dir_all(&config.state_dir)?;
    let store = Store::open(config.state_dir.clone());
    let bus = EventBus::new();
    let permission = PermissionArbiter::new(store.clone(), bus.clone());

    // Per-process todo state. §A.6 does not expose todo reads/writes over
    // HTTP, so a single shared TodoState (rather than one per session) is
    // sufficient for now — see DESIGN.md's open question on `get_todos`.
    let todo_state = TodoState::new("default");
    let tools = Arc::new(sessiond_tools::builtin_registry(todo_state));

    let sessions = SessionService::new(store.clone(), bus.clone(), tools.clone(), permission.clone())
        .with_max_tool_rounds(config.tools.max_tool_rounds);

    // Real wire drivers (Anthropic, OpenAI, ...) are out of scope for this
    // core; only the mock provider is registered so the service is usable
    // out of the box. A deployment wires its own `ModelProvider` impls via
    // `register_provider` the same way.
    sessions.register_provider("mock", Arc::new(sessiond_model::MockProvider));

    let sse = sessiond_sse::SseHub::new(bus.clone());
    let bridge = sessiond_bridge::ClientToolBridge::new(bus.clone());

    let state = http::AppState { sessions, permission, sse, bridge, tools, config };

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    tracing::info!(addr = %cli.bind, "sessiond: listening");
    axum::serve(listener, app).await?;

    Ok(())
}
