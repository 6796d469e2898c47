// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-process typed topic tree. Publishers never block: each subscriber has
//! a bounded inbox, and an event destined for a full inbox is dropped (and
//! the drop logged) rather than stalling the publisher.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Bounded inbox capacity per subscriber.
const INBOX_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    SessionCreated,
    SessionUpdated,
    SessionDeleted,
    SessionIdle,
    SessionError,
    MessageCreated,
    MessageUpdated,
    MessagePartUpdated,
    PermissionUpdated,
    PermissionReplied,
    FileEdited,
    ClientToolRequest,
    ServerConnected,
}

impl Topic {
    /// Dotted wire name used in the SSE `type` field, e.g. `"session.created"`.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Topic::SessionCreated => "session.created",
            Topic::SessionUpdated => "session.updated",
            Topic::SessionDeleted => "session.deleted",
            Topic::SessionIdle => "session.idle",
            Topic::SessionError => "session.error",
            Topic::MessageCreated => "message.created",
            Topic::MessageUpdated => "message.updated",
            Topic::MessagePartUpdated => "message.part.updated",
            Topic::PermissionUpdated => "permission.updated",
            Topic::PermissionReplied => "permission.replied",
            Topic::FileEdited => "file.edited",
            Topic::ClientToolRequest => "client-tool.request",
            Topic::ServerConnected => "server.connected",
        }
    }
}

/// An event published on the bus: a topic plus its typed payload.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: Topic,
    pub properties: serde_json::Value,
}

impl Event {
    pub fn new(topic: Topic, properties: serde_json::Value) -> Self {
        Self { topic, properties }
    }

    /// Render as the SSE wire envelope: `{"type": "<topic>", "properties": {...}}`.
    pub fn to_wire_json(&self) -> serde_json::Value {
        serde_json::json!({ "type": self.topic.as_wire_str(), "properties": self.properties })
    }
}

/// What a subscription matches.
#[derive(Debug, Clone, Copy)]
pub enum Filter {
    All,
    Only(Topic),
}

impl Filter {
    fn matches(self, topic: Topic) -> bool {
        match self {
            Filter::All => true,
            Filter::Only(t) => t == topic,
        }
    }
}

type Handler = Arc<Mutex<dyn FnMut(Event) + Send>>;

struct Subscriber {
    id: u64,
    filter: Filter,
    tx: mpsc::Sender<Event>,
    handler: Handler,
}

/// An in-process typed topic tree.
///
/// Clone is cheap (shared registry); every clone publishes and subscribes
/// against the same fan-out set.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

/// Releases a subscription when `unsubscribe()` is called, or the handle is
/// dropped without calling it — either way, the subscriber's task exits once
/// its channel closes.
pub struct Subscription {
    id: u64,
    bus: EventBus,
    _task: tokio::task::JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.bus.remove(self.id);
        self._task.abort();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: Arc::new(Mutex::new(Vec::new())), next_id: Arc::new(AtomicU64::new(1)) }
    }

    fn remove(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Subscribe `handler` to `filter`. Events matching the filter are
    /// delivered, in publish order, to a dedicated task that drains this
    /// subscriber's inbox and invokes `handler`.
    pub fn subscribe<F>(&self, filter: Filter, handler: F) -> Subscription
    where
        F: FnMut(Event) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel(INBOX_CAPACITY);
        let handler: Handler = Arc::new(Mutex::new(handler));
        self.subscribers.lock().unwrap().push(Subscriber { id, filter, tx, handler: handler.clone() });

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                (handler.lock().unwrap())(event);
            }
        });

        Subscription { id, bus: self.clone(), _task: task }
    }

    /// Enqueue `event` to every matching subscriber's inbox. Never blocks:
    /// a full inbox drops the event for that subscriber and logs the drop.
    pub fn publish(&self, event: Event) {
        let subs: Vec<(u64, mpsc::Sender<Event>)> = {
            let guard = self.subscribers.lock().unwrap();
            guard.iter().filter(|s| s.filter.matches(event.topic)).map(|s| (s.id, s.tx.clone())).collect()
        };
        for (id, tx) in subs {
            match tx.try_send(event.clone()) {
                Ok(()) => trace!(subscriber = id, topic = event.topic.as_wire_str(), "bus: delivered"),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = id, topic = event.topic.as_wire_str(), "bus: inbox full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Same matching as `publish`, but invokes each matching subscriber's
    /// handler inline and synchronously, bypassing the inbox. Used in tests
    /// that need delivery to have happened before the call returns.
    pub fn publish_sync(&self, event: Event) {
        let handlers: Vec<Handler> = {
            let guard = self.subscribers.lock().unwrap();
            guard.iter().filter(|s| s.filter.matches(event.topic)).map(|s| s.handler.clone()).collect()
        };
        for handler in handlers {
            (handler.lock().unwrap())(event.clone());
        }
    }
}
