// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Client-Tool Bridge (C8): lets a process outside the server (an editor
//! extension, say) host tools the model can call. The bridge hands C3 a
//! [`ClientToolProxy`] that looks like any other [`Tool`] — C3 never knows
//! the implementation lives on the far end of an SSE stream.
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use sessiond_bus::{Event, EventBus, Topic};
use sessiond_model::error::{CoreError, ErrorKind};
use sessiond_tools::{ApprovalPolicy, Tool, ToolCall, ToolOutput};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default time to wait for an external client to POST a result.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// A tool definition an external client registered.
#[derive(Debug, Clone)]
pub struct ClientToolDescriptor {
    pub client_id: String,
    pub tool: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Default)]
struct Inner {
    tools: HashMap<String, ClientToolDescriptor>,
    waiters: HashMap<String, oneshot::Sender<ToolOutput>>,
    inflight_by_client: HashMap<String, Vec<String>>,
}

/// Per-process registry of client-hosted tools plus their in-flight calls.
/// Cheap to clone, same idiom as [`EventBus`].
#[derive(Clone)]
pub struct ClientToolBridge {
    bus: EventBus,
    timeout: Duration,
    inner: Arc<StdMutex<Inner>>,
}

impl ClientToolBridge {
    pub fn new(bus: EventBus) -> Self {
        Self::with_timeout(bus, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(bus: EventBus, timeout: Duration) -> Self {
        Self { bus, timeout, inner: Arc::new(StdMutex::new(Inner::default())) }
    }

    /// Register a tool hosted by `client_id`. A later registration of the
    /// same tool name replaces the earlier one (last writer wins — the spec
    /// does not require uniqueness across clients).
    pub fn register(&self, client_id: &str, tool: &str, description: &str, parameters: Value) {
        let descriptor = ClientToolDescriptor {
            client_id: client_id.to_string(),
            tool: tool.to_string(),
            description: description.to_string(),
            parameters,
        };
        self.inner.lock().unwrap().tools.insert(tool.to_string(), descriptor);
    }

    /// Remove every tool `client_id` registered and resolve its in-flight
    /// calls as `client-disconnected`. Returns the names removed.
    pub fn unregister_client(&self, client_id: &str) -> Vec<String> {
        let (removed, waiters): (Vec<String>, Vec<(String, oneshot::Sender<ToolOutput>)>) = {
            let mut inner = self.inner.lock().unwrap();
            let removed: Vec<String> = inner
                .tools
                .iter()
                .filter(|(_, d)| d.client_id == client_id)
                .map(|(name, _)| name.clone())
                .collect();
            for name in &removed {
                inner.tools.remove(name);
            }
            let call_ids = inner.inflight_by_client.remove(client_id).unwrap_or_default();
            let waiters = call_ids.into_iter().filter_map(|id| inner.waiters.remove(&id).map(|tx| (id, tx))).collect();
            (removed, waiters)
        };
        for (call_id, tx) in waiters {
            let _ = tx.send(ToolOutput::err(&call_id, "client-disconnected"));
        }
        removed
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().tools.keys().cloned().collect()
    }

    pub fn descriptor(&self, tool: &str) -> Option<ClientToolDescriptor> {
        self.inner.lock().unwrap().tools.get(tool).cloned()
    }

    /// Build a [`Tool`] façade for a registered client tool, for C3 to
    /// register alongside its built-ins. `None` if the tool is unknown.
    pub fn proxy(&self, tool: &str) -> Option<ClientToolProxy> {
        self.descriptor(tool).map(|descriptor| ClientToolProxy { bridge: self.clone(), descriptor })
    }

    /// Resolve a pending call. Called by the HTTP handler that receives the
    /// external client's `result` POST.
    pub fn resolve(&self, call_id: &str, output: ToolOutput) -> Result<(), CoreError> {
        let waiter = {
            let mut inner = self.inner.lock().unwrap();
            for ids in inner.inflight_by_client.values_mut() {
                ids.retain(|id| id != call_id);
            }
            inner.waiters.remove(call_id)
        };
        match waiter {
            Some(tx) => {
                let _ = tx.send(output);
                Ok(())
            }
            None => Err(CoreError::new(ErrorKind::NotFound, format!("no pending client-tool call for {call_id}"))),
        }
    }

    async fn invoke(&self, ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
        let client_id = match self.descriptor(&call.tool) {
            Some(d) => d.client_id,
            None => return ToolOutput::err(&call.call_id, "no client hosts this tool"),
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.waiters.insert(call.call_id.clone(), tx);
            inner.inflight_by_client.entry(client_id.clone()).or_default().push(call.call_id.clone());
        }

        self.bus.publish(Event::new(
            Topic::ClientToolRequest,
            serde_json::json!({
                "client_id": client_id, "call_id": call.call_id,
                "tool": call.tool, "input": call.input,
            }),
        ));

        let result = tokio::select! {
            recv = rx => recv.ok(),
            _ = tokio::time::sleep(self.timeout) => {
                self.forget_waiter(&call.call_id);
                debug!(call_id = %call.call_id, tool = %call.tool, "client-tool: timed out");
                Some(ToolOutput::err(&call.call_id, "client-tool-timeout"))
            }
            _ = ctx.cancelled() => {
                self.forget_waiter(&call.call_id);
                Some(ToolOutput::cancelled(&call.call_id))
            }
        };

        result.unwrap_or_else(|| ToolOutput::err(&call.call_id, "client-disconnected"))
    }

    fn forget_waiter(&self, call_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.waiters.remove(call_id);
        for ids in inner.inflight_by_client.values_mut() {
            ids.retain(|id| id != call_id);
        }
    }
}

/// The `Tool` face a client-hosted tool presents to C3.
pub struct ClientToolProxy {
    bridge: ClientToolBridge,
    descriptor: ClientToolDescriptor,
}

#[async_trait]
impl Tool for ClientToolProxy {
    fn name(&self) -> &str {
        &self.descriptor.tool
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn parameters_schema(&self) -> Value {
        self.descriptor.parameters.clone()
    }

    /// Client-bridge tools default to `Ask`: the registering client is not
    /// assumed trustworthy until the user (or a pre-approval policy C3
    /// layers on top) says otherwise.
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, ctx: CancellationToken, call: &ToolCall) -> ToolOutput {
        self.bridge.invoke(ctx, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(tool: &str, id: &str) -> ToolCall {
        ToolCall { call_id: id.to_string(), tool: tool.to_string(), input: serde_json::json!({}) }
    }

    #[tokio::test]
    async fn resolve_unblocks_invoke_with_posted_output() {
        let bridge = ClientToolBridge::new(EventBus::new());
        bridge.register("editor-1", "insert_snippet", "Inserts a snippet", serde_json::json!({"type":"object"}));

        let bridge2 = bridge.clone();
        let handle = tokio::spawn(async move {
            bridge2.invoke(CancellationToken::new(), &call("insert_snippet", "c1")).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bridge.resolve("c1", ToolOutput::ok("c1", "inserted")).unwrap();

        let out = handle.await.unwrap();
        assert!(!out.is_error);
        assert_eq!(out.content, "inserted");
    }

    #[tokio::test]
    async fn invoking_unknown_tool_is_an_error() {
        let bridge = ClientToolBridge::new(EventBus::new());
        let out = bridge.invoke(CancellationToken::new(), &call("nonexistent", "c1")).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn cancellation_resolves_as_cancelled() {
        let bridge = ClientToolBridge::new(EventBus::new());
        bridge.register("editor-1", "slow_tool", "", serde_json::json!({}));
        let ctx = CancellationToken::new();
        let ctx2 = ctx.clone();
        let bridge2 = bridge.clone();
        let handle = tokio::spawn(async move { bridge2.invoke(ctx2, &call("slow_tool", "c1")).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        ctx.cancel();

        let out = handle.await.unwrap();
        assert!(out.is_error);
        assert_eq!(out.content, "cancelled");
    }

    #[tokio::test]
    async fn timeout_resolves_as_client_tool_timeout() {
        let bridge = ClientToolBridge::with_timeout(EventBus::new(), std::time::Duration::from_millis(30));
        bridge.register("editor-1", "slow_tool", "", serde_json::json!({}));
        let out = bridge.invoke(CancellationToken::new(), &call("slow_tool", "c1")).await;
        assert!(out.is_error);
        assert_eq!(out.content, "client-tool-timeout");
    }

    #[tokio::test]
    async fn disconnect_removes_tools_and_resolves_inflight_as_disconnected() {
        let bridge = ClientToolBridge::new(EventBus::new());
        bridge.register("editor-1", "slow_tool", "", serde_json::json!({}));

        let bridge2 = bridge.clone();
        let handle = tokio::spawn(async move { bridge2.invoke(CancellationToken::new(), &call("slow_tool", "c1")).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let removed = bridge.unregister_client("editor-1");
        assert_eq!(removed, vec!["slow_tool".to_string()]);
        assert!(bridge.descriptor("slow_tool").is_none());

        let out = handle.await.unwrap();
        assert!(out.is_error);
        assert_eq!(out.content, "client-disconnected");
    }

    #[tokio::test]
    async fn resolve_with_no_pending_call_is_not_found() {
        let bridge = ClientToolBridge::new(EventBus::new());
        let err = bridge.resolve("ghost", ToolOutput::ok("ghost", "x")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn proxy_exposes_descriptor_fields() {
        let bridge = ClientToolBridge::new(EventBus::new());
        bridge.register("editor-1", "insert_snippet", "Inserts a snippet", serde_json::json!({"type":"object"}));
        let proxy = bridge.proxy("insert_snippet").unwrap();
        assert_eq!(proxy.name(), "insert_snippet");
        assert_eq!(proxy.description(), "Inserts a snippet");
        assert_eq!(proxy.default_policy(), ApprovalPolicy::Ask);
    }

    #[tokio::test]
    async fn proxy_for_unregistered_tool_is_none() {
        let bridge = ClientToolBridge::new(EventBus::new());
        assert!(bridge.proxy("nope").is_none());
    }
}
