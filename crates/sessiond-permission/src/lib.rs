// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Permission Arbiter (C4): gates sensitive tool invocations behind a
//! per-session FIFO of [`PermissionRequest`]s, suspending the caller until a
//! reply arrives or its context cancels. Granted-always decisions are cached
//! per `(session, tool)` so a matching future request short-circuits without
//! round-tripping to the user.
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use regex::Regex;
use sessiond_bus::{Event, EventBus, Topic};
use sessiond_model::domain::{PermissionRequest, PermissionState};
use sessiond_model::error::{CoreError, ErrorKind};
use sessiond_storage::Store;
use sessiond_tools::glob_to_regex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A decision the caller of `reply` supplies for a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionResponse {
    Once,
    Always,
    Reject,
}

impl PermissionResponse {
    fn to_state(self) -> PermissionState {
        match self {
            PermissionResponse::Once => PermissionState::AllowedOnce,
            PermissionResponse::Always => PermissionState::AllowedAlways,
            PermissionResponse::Reject => PermissionState::Denied,
        }
    }
}

struct CachedGrant {
    regex: Regex,
}

#[derive(Default)]
struct Inner {
    /// Pending-request waiters, keyed by request id.
    waiters: HashMap<String, oneshot::Sender<PermissionState>>,
    /// `always`-granted patterns per `(session_id, tool)`.
    cache: HashMap<(String, String), Vec<CachedGrant>>,
}

/// Per-process permission arbiter. Cheap to clone — state lives behind an
/// `Arc`, same idiom as [`EventBus`].
#[derive(Clone)]
pub struct PermissionArbiter {
    store: Store,
    bus: EventBus,
    inner: Arc<StdMutex<Inner>>,
}

fn request_key(session_id: &str, request_id: &str) -> String {
    format!("session/{session_id}/permission/{request_id}")
}

impl PermissionArbiter {
    pub fn new(store: Store, bus: EventBus) -> Self {
        Self { store, bus, inner: Arc::new(StdMutex::new(Inner::default())) }
    }

    /// Request permission to invoke `tool` with the given `pattern` (a string
    /// identifying the call, e.g. a shell command). Returns the terminal
    /// [`PermissionState`] once decided.
    ///
    /// A cached `always` grant whose pattern matches `pattern` short-circuits
    /// immediately: a resolved record is persisted but no one is kept
    /// waiting. Otherwise a `pending` request is persisted and published,
    /// and this call blocks until [`Self::reply`] resolves it or `ctx`
    /// cancels (in which case the request is resolved `denied`).
    pub async fn request(
        &self,
        ctx: &CancellationToken,
        session_id: &str,
        tool: &str,
        call_id: &str,
        pattern: &str,
    ) -> Result<PermissionState, CoreError> {
        if let Some(state) = self.cached_decision(session_id, tool, pattern) {
            let mut req = PermissionRequest::new_pending(session_id, tool, call_id, pattern);
            req.resolve(state).expect("fresh request cannot already be terminal");
            self.persist(&req).await?;
            debug!(session_id, tool, pattern, "permission: cache hit, short-circuiting");
            return Ok(state);
        }

        let mut req = PermissionRequest::new_pending(session_id, tool, call_id, pattern);
        self.persist(&req).await?;

        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.waiters.insert(req.id.clone(), tx);
        }

        self.bus.publish(Event::new(
            Topic::PermissionUpdated,
            serde_json::json!({
                "id": req.id, "session_id": req.session_id, "tool": req.tool,
                "call_id": req.call_id, "pattern": req.pattern, "state": "pending",
            }),
        ));

        let state = tokio::select! {
            recv = rx => recv.map_err(|_| CoreError::new(ErrorKind::Internal, "permission waiter dropped without a reply"))?,
            _ = ctx.cancelled() => {
                self.inner.lock().unwrap().waiters.remove(&req.id);
                req.resolve(PermissionState::Denied).ok();
                self.persist(&req).await?;
                return Err(CoreError::new(ErrorKind::Cancelled, "permission request cancelled"));
            }
        };

        req.resolve(state).ok();
        self.persist(&req).await?;
        Ok(state)
    }

    /// Resolve a pending request, waking whoever is blocked in [`Self::request`].
    pub async fn reply(&self, session_id: &str, request_id: &str, response: PermissionResponse) -> Result<PermissionRequest, CoreError> {
        let bytes = self
            .store
            .get(&request_key(session_id, request_id))
            .await
            .map_err(|e| CoreError::new(ErrorKind::NotFound, format!("permission request not found: {e}")))?;
        let mut req: PermissionRequest =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::new(ErrorKind::Internal, format!("corrupt permission record: {e}")))?;

        let state = response.to_state();
        req.resolve(state).map_err(|e| CoreError::new(ErrorKind::Conflict, e))?;
        self.persist(&req).await?;

        if let PermissionResponse::Always = response {
            self.cache_grant(session_id, &req.tool, &req.pattern);
        }

        let waiter = self.inner.lock().unwrap().waiters.remove(request_id);
        if let Some(tx) = waiter {
            let _ = tx.send(state);
        }

        self.bus.publish(Event::new(
            Topic::PermissionReplied,
            serde_json::json!({
                "id": req.id, "session_id": req.session_id, "tool": req.tool,
                "call_id": req.call_id, "pattern": req.pattern, "state": state_label(state),
            }),
        ));

        Ok(req)
    }

    /// List all permission requests recorded for a session, in creation order.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<PermissionRequest>, CoreError> {
        let prefix = format!("session/{session_id}/permission/");
        let entries = self.store.list(&prefix).await.map_err(|e| CoreError::new(ErrorKind::Storage, e.to_string()))?;
        entries
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(|e| CoreError::new(ErrorKind::Internal, format!("corrupt permission record: {e}"))))
            .collect()
    }

    fn cached_decision(&self, session_id: &str, tool: &str, pattern: &str) -> Option<PermissionState> {
        let inner = self.inner.lock().unwrap();
        let grants = inner.cache.get(&(session_id.to_string(), tool.to_string()))?;
        grants.iter().any(|g| g.regex.is_match(pattern)).then_some(PermissionState::AllowedAlways)
    }

    fn cache_grant(&self, session_id: &str, tool: &str, pattern: &str) {
        let Some(regex) = glob_to_regex(pattern) else { return };
        let mut inner = self.inner.lock().unwrap();
        inner
            .cache
            .entry((session_id.to_string(), tool.to_string()))
            .or_default()
            .push(CachedGrant { regex });
    }

    async fn persist(&self, req: &PermissionRequest) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(req).expect("PermissionRequest always serializes");
        self.store
            .put(&request_key(&req.session_id, &req.id), &bytes, None)
            .await
            .map_err(|e| CoreError::new(ErrorKind::Storage, e.to_string()))?;
        Ok(())
    }
}

fn state_label(state: PermissionState) -> &'static str {
    match state {
        PermissionState::Pending => "pending",
        PermissionState::AllowedOnce => "allowed-once",
        PermissionState::AllowedAlways => "allowed-always",
        PermissionState::Denied => "denied",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn arbiter() -> (TempDir, PermissionArbiter) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());
        let bus = EventBus::new();
        (dir, PermissionArbiter::new(store, bus))
    }

    #[tokio::test]
    async fn reply_once_unblocks_request_with_matching_state() {
        let (_dir, arb) = arbiter();
        let ctx = CancellationToken::new();

        let arb2 = arb.clone();
        let requester = tokio::spawn(async move { arb2.request(&ctx, "s1", "shell", "c1", "rm -rf /tmp/x").await });

        // Give the requester a moment to register its waiter.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let pending = arb.list_for_session("s1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state, PermissionState::Pending);

        let req_id = pending[0].id.clone();
        arb.reply("s1", &req_id, PermissionResponse::Once).await.unwrap();

        let result = requester.await.unwrap().unwrap();
        assert_eq!(result, PermissionState::AllowedOnce);
    }

    #[tokio::test]
    async fn reject_denies_and_does_not_cache() {
        let (_dir, arb) = arbiter();
        let ctx = CancellationToken::new();

        let arb2 = arb.clone();
        let requester = tokio::spawn(async move { arb2.request(&ctx, "s1", "shell", "c1", "rm -rf /").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let pending = arb.list_for_session("s1").await.unwrap();
        let req_id = pending[0].id.clone();
        arb.reply("s1", &req_id, PermissionResponse::Reject).await.unwrap();

        assert_eq!(requester.await.unwrap().unwrap(), PermissionState::Denied);
        assert!(arb.cached_decision("s1", "shell", "rm -rf /").is_none());
    }

    #[tokio::test]
    async fn always_grant_is_cached_and_short_circuits_future_requests() {
        let (_dir, arb) = arbiter();
        let ctx = CancellationToken::new();

        let arb2 = arb.clone();
        let requester = tokio::spawn(async move { arb2.request(&ctx, "s1", "shell", "c1", "git diff").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let req_id = arb.list_for_session("s1").await.unwrap()[0].id.clone();
        arb.reply("s1", &req_id, PermissionResponse::Always).await.unwrap();
        assert_eq!(requester.await.unwrap().unwrap(), PermissionState::AllowedAlways);

        // Second call with the same pattern never blocks: it resolves immediately.
        let ctx2 = CancellationToken::new();
        let second = tokio::time::timeout(std::time::Duration::from_millis(200), arb.request(&ctx2, "s1", "shell", "c2", "git diff")).await;
        assert_eq!(second.unwrap().unwrap(), PermissionState::AllowedAlways);

        let history = arb.list_for_session("s1").await.unwrap();
        assert_eq!(history.len(), 3, "pending+resolved original, plus the short-circuited one");
    }

    #[tokio::test]
    async fn cancellation_denies_and_unblocks_waiter() {
        let (_dir, arb) = arbiter();
        let ctx = CancellationToken::new();
        let ctx2 = ctx.clone();

        let arb2 = arb.clone();
        let requester = tokio::spawn(async move { arb2.request(&ctx2, "s1", "shell", "c1", "sleep 99").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        ctx.cancel();

        let result = requester.await.unwrap();
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn replying_twice_is_a_conflict() {
        let (_dir, arb) = arbiter();
        let ctx = CancellationToken::new();
        let arb2 = arb.clone();
        tokio::spawn(async move { arb2.request(&ctx, "s1", "shell", "c1", "ls").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let req_id = arb.list_for_session("s1").await.unwrap()[0].id.clone();
        arb.reply("s1", &req_id, PermissionResponse::Once).await.unwrap();
        let second = arb.reply("s1", &req_id, PermissionResponse::Denied).await;
        assert!(second.is_err());
        assert_eq!(second.unwrap_err().kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn reply_to_unknown_request_is_not_found() {
        let (_dir, arb) = arbiter();
        let err = arb.reply("s1", "does-not-exist", PermissionResponse::Once).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_for_session_is_creation_ordered() {
        let (_dir, arb) = arbiter();
        let ctx = CancellationToken::new();
        let arb2 = arb.clone();
        let arb3 = arb.clone();
        tokio::spawn(async move { arb2.request(&ctx, "s1", "shell", "c1", "a").await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tokio::spawn(async move { arb3.request(&CancellationToken::new(), "s1", "shell", "c2", "b").await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let listed = arb.list_for_session("s1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id < listed[1].id, "ULIDs sort by creation order");
    }
}
