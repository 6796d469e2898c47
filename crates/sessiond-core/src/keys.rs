// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Storage key layout for session records. Mirrors the path-like scheme
//! `sessiond-permission` already uses for `session/<id>/permission/<id>`, so
//! every session-scoped record lives under one cascade-deletable prefix.

pub fn session_key(session_id: &str) -> String {
    format!("session/{session_id}")
}

pub fn session_prefix(session_id: &str) -> String {
    format!("session/{session_id}")
}

pub fn message_key(session_id: &str, message_id: &str) -> String {
    format!("session/{session_id}/message/{message_id}")
}

pub fn message_prefix(session_id: &str) -> String {
    format!("session/{session_id}/message/")
}

pub fn part_key(session_id: &str, message_id: &str, part_id: &str) -> String {
    format!("session/{session_id}/message/{message_id}/part/{part_id}")
}

pub fn part_prefix(session_id: &str, message_id: &str) -> String {
    format!("session/{session_id}/message/{message_id}/part/")
}

pub fn todo_key(session_id: &str, todo_id: &str) -> String {
    format!("session/{session_id}/todo/{todo_id}")
}

pub fn todo_prefix(session_id: &str) -> String {
    format!("session/{session_id}/todo/")
}

/// `directory` may contain `/`; replace it so the index key stays a single
/// path segment rather than nesting inside the directory tree itself.
fn sanitize_directory(directory: &str) -> String {
    directory.replace('/', "_")
}

pub fn dir_index_key(directory: &str, session_id: &str) -> String {
    format!("dir-index/{}/{session_id}", sanitize_directory(directory))
}

pub fn dir_index_prefix(directory: &str) -> String {
    format!("dir-index/{}/", sanitize_directory(directory))
}

/// Is `key` a session record itself (`session/<id>`), not a nested message,
/// part, or todo key?
pub fn is_session_record_key(key: &str) -> bool {
    key.split('/').count() == 2
}

/// Is `key` a message record (`session/<id>/message/<id>`), not a part?
pub fn is_message_record_key(key: &str) -> bool {
    key.split('/').count() == 4
}
