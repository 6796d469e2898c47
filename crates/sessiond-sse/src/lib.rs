// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! SSE Fan-out (C7): per-client bus subscription rendered as an
//! `axum::response::sse::Event` stream.
//!
//! Each client gets a bounded inbox (capacity [`CHANNEL_CAPACITY`]); a slow
//! client that fills it loses events — [`sessiond_bus::EventBus::publish`]
//! never blocks on a subscriber, and the bus itself does not retry, so
//! there is no buffering to fall back on. Reconnect replays nothing.
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::response::sse::Event as SseEvent;
use futures::Stream;
use sessiond_bus::{Event, EventBus, Filter, Subscription, Topic};
use serde_json::Value;
use tokio::sync::mpsc;

/// Bounded inbox capacity per SSE client (§A.4.7: M≈10).
pub const CHANNEL_CAPACITY: usize = 10;
/// Heartbeat comment cadence for an idle connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// What a stream forwards.
#[derive(Debug, Clone)]
pub enum StreamScope {
    /// Every event on the bus, prefixed by a synthetic `server.connected`.
    Global,
    /// Only events belonging to one session (see [`belongs_to_session`]).
    Session(String),
}

/// An item queued for one client before it is rendered as an SSE frame.
/// Kept distinct from [`SseEvent`] so the filtering/ordering logic can be
/// exercised in tests without depending on axum's wire formatting.
#[derive(Debug, Clone)]
enum Frame {
    Data(Event),
    Heartbeat,
}

/// An event belongs to session `S` iff it carries a `session_id` field equal
/// to `S` (message/part/permission events) or `id == S` (session lifecycle
/// events). `file.edited` is session-agnostic and always forwarded;
/// `client-tool.request` carries neither and so never matches a per-session
/// stream; `server.connected` is a global-only synthetic event.
pub fn belongs_to_session(session_id: &str, event: &Event) -> bool {
    match event.topic {
        Topic::SessionCreated
        | Topic::SessionUpdated
        | Topic::SessionDeleted
        | Topic::SessionIdle
        | Topic::SessionError => event.properties.get("id").and_then(Value::as_str) == Some(session_id),
        Topic::FileEdited => true,
        Topic::ServerConnected | Topic::ClientToolRequest => false,
        _ => event.properties.get("session_id").and_then(Value::as_str) == Some(session_id),
    }
}

fn matches_scope(scope: &StreamScope, event: &Event) -> bool {
    match scope {
        StreamScope::Global => true,
        StreamScope::Session(id) => belongs_to_session(id, event),
    }
}

fn encode_event(event: &Event) -> SseEvent {
    SseEvent::default().event("message").data(event.to_wire_json().to_string())
}

fn heartbeat_frame() -> SseEvent {
    SseEvent::default().comment("heartbeat")
}

fn encode_frame(frame: Frame) -> SseEvent {
    match frame {
        Frame::Data(event) => encode_event(&event),
        Frame::Heartbeat => heartbeat_frame(),
    }
}

/// Fans the bus out to per-client SSE streams.
#[derive(Clone)]
pub struct SseHub {
    bus: EventBus,
}

impl SseHub {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Open a new client stream for `scope`. The returned [`SseStream`]
    /// unsubscribes from the bus and stops its heartbeat task when dropped
    /// (axum drops the stream on client disconnect).
    pub fn stream(&self, scope: StreamScope) -> SseStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        if matches!(scope, StreamScope::Global) {
            let _ = tx.try_send(Frame::Data(Event::new(Topic::ServerConnected, serde_json::json!({}))));
        }

        let forward_tx = tx.clone();
        let filter_scope = scope.clone();
        let subscription = self.bus.subscribe(Filter::All, move |event| {
            if matches_scope(&filter_scope, &event) {
                let topic = event.topic.as_wire_str();
                if forward_tx.try_send(Frame::Data(event)).is_err() {
                    tracing::warn!(topic, "sse: client inbox full, dropping event");
                }
            }
        });

        let heartbeat_tx = tx;
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await; // first tick fires immediately; consume it
            loop {
                interval.tick().await;
                if heartbeat_tx.send(Frame::Heartbeat).await.is_err() {
                    break;
                }
            }
        });

        SseStream { rx, subscription: Some(subscription), heartbeat }
    }
}

/// A single client's SSE event stream. Implements [`Stream`] so it can be
/// handed straight to `axum::response::sse::Sse::new`.
pub struct SseStream {
    rx: mpsc::Receiver<Frame>,
    subscription: Option<Subscription>,
    heartbeat: tokio::task::JoinHandle<()>,
}

impl Stream for SseStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.rx.poll_recv(cx).map(|opt| opt.map(|frame| Ok(encode_frame(frame))))
    }
}

impl Drop for SseStream {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.heartbeat.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_event(topic: Topic, session_id: &str) -> Event {
        let key = if matches!(
            topic,
            Topic::SessionCreated | Topic::SessionUpdated | Topic::SessionDeleted | Topic::SessionIdle | Topic::SessionError
        ) {
            "id"
        } else {
            "session_id"
        };
        Event::new(topic, serde_json::json!({ key: session_id }))
    }

    fn unwrap_data(frame: Frame) -> Event {
        match frame {
            Frame::Data(event) => event,
            Frame::Heartbeat => panic!("expected a data frame, got a heartbeat"),
        }
    }

    #[test]
    fn session_lifecycle_matches_by_id_field() {
        let ev = session_event(Topic::SessionCreated, "s1");
        assert!(belongs_to_session("s1", &ev));
        assert!(!belongs_to_session("s2", &ev));
    }

    #[test]
    fn message_events_match_by_session_id_field() {
        let ev = session_event(Topic::MessageCreated, "s1");
        assert!(belongs_to_session("s1", &ev));
        assert!(!belongs_to_session("s2", &ev));
    }

    #[test]
    fn file_edited_is_session_agnostic() {
        let ev = Event::new(Topic::FileEdited, serde_json::json!({"path": "a.rs"}));
        assert!(belongs_to_session("s1", &ev));
        assert!(belongs_to_session("anything", &ev));
    }

    #[test]
    fn client_tool_request_never_matches_a_session_stream() {
        let ev = Event::new(Topic::ClientToolRequest, serde_json::json!({"client_id": "c1"}));
        assert!(!belongs_to_session("s1", &ev));
    }

    #[test]
    fn server_connected_never_matches_a_session_stream() {
        let ev = Event::new(Topic::ServerConnected, serde_json::json!({}));
        assert!(!belongs_to_session("s1", &ev));
    }

    #[tokio::test]
    async fn global_stream_starts_with_server_connected() {
        let hub = SseHub::new(EventBus::new());
        let mut stream = hub.stream(StreamScope::Global);
        let first = unwrap_data(stream.rx.recv().await.unwrap());
        assert_eq!(first.topic, Topic::ServerConnected);
    }

    #[tokio::test]
    async fn global_stream_forwards_every_topic() {
        let bus = EventBus::new();
        let hub = SseHub::new(bus.clone());
        let mut stream = hub.stream(StreamScope::Global);
        stream.rx.recv().await; // consume the synthetic server.connected frame

        bus.publish(Event::new(Topic::SessionCreated, serde_json::json!({"id": "s1"})));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frame = unwrap_data(stream.rx.recv().await.unwrap());
        assert_eq!(frame.topic, Topic::SessionCreated);
    }

    #[tokio::test]
    async fn session_stream_filters_out_other_sessions() {
        let bus = EventBus::new();
        let hub = SseHub::new(bus.clone());
        let mut stream = hub.stream(StreamScope::Session("s1".to_string()));

        bus.publish(Event::new(Topic::SessionCreated, serde_json::json!({"id": "s2"})));
        bus.publish(Event::new(Topic::SessionCreated, serde_json::json!({"id": "s1"})));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frame = unwrap_data(stream.rx.recv().await.unwrap());
        assert_eq!(frame.properties["id"], "s1");
    }

    #[tokio::test]
    async fn poll_next_yields_axum_sse_events() {
        use futures::StreamExt;
        let hub = SseHub::new(EventBus::new());
        let mut stream = hub.stream(StreamScope::Global);
        let first = stream.next().await;
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes_from_the_bus() {
        let bus = EventBus::new();
        let hub = SseHub::new(bus.clone());
        let stream = hub.stream(StreamScope::Global);
        drop(stream);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A publish after the only subscriber dropped must not panic or hang.
        bus.publish(Event::new(Topic::SessionCreated, serde_json::json!({"id": "s1"})));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
