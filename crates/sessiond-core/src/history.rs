// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Effective history computation (§A.4.6 step 2) and flattening of the
//! persisted `Message`/`Part` records into the provider wire format.
use sessiond_model::domain::{Message, MessageRole, Part, Session};
use sessiond_model::{ProviderContent, ProviderMessage};

/// One message with its parts loaded, in persistence order.
pub struct LoadedMessage {
    pub message: Message,
    pub parts: Vec<Part>,
}

/// Drop every message at or after the session's revert pointer. A session
/// with no active revert keeps its full history. Message-granularity only:
/// a part-level cutoff within the pointer message itself is a finer detail
/// the part ordering invariant (§A.4.9) leaves to the UI layer, not to what
/// the model sees.
pub fn apply_revert<'a>(session: &Session, messages: &'a [LoadedMessage]) -> &'a [LoadedMessage] {
    match &session.revert_pointer {
        None => messages,
        Some(cutoff) => {
            let idx = messages.iter().position(|m| &m.message.id >= cutoff).unwrap_or(messages.len());
            &messages[..idx]
        }
    }
}

/// Flatten persisted history into the wire messages a provider call sends.
/// User messages become a single text turn; assistant messages expand each
/// part in order — text parts become an assistant text turn, a resolved
/// tool part becomes a `(tool_call, tool_result)` pair. Parts still pending
/// (a crash mid-turn, or the in-progress turn itself) and step markers carry
/// no wire representation and are skipped.
pub fn flatten(messages: &[LoadedMessage]) -> Vec<ProviderMessage> {
    let mut out = Vec::new();
    for entry in messages {
        match entry.message.role {
            MessageRole::User => {
                let text: String = entry
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Text(t) => Some(t.text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                out.push(ProviderMessage::user(text));
            }
            MessageRole::Assistant => {
                for part in &entry.parts {
                    match part {
                        Part::Text(t) if !t.text.is_empty() => {
                            out.push(ProviderMessage::assistant(t.text.clone()));
                        }
                        Part::Tool(tool) if tool.state == sessiond_model::domain::ToolState::Done => {
                            out.push(ProviderMessage {
                                role: sessiond_model::Role::Assistant,
                                content: ProviderContent::ToolCall {
                                    tool_call_id: tool.call_id.clone(),
                                    function: sessiond_model::FunctionCall {
                                        name: tool.tool.clone(),
                                        arguments: tool.input.to_string(),
                                    },
                                },
                            });
                            let output = tool.output.as_ref().map(|v| v.to_string()).unwrap_or_default();
                            out.push(ProviderMessage::tool_result(&tool.call_id, output));
                        }
                        Part::Tool(tool) if tool.state == sessiond_model::domain::ToolState::Error => {
                            out.push(ProviderMessage {
                                role: sessiond_model::Role::Assistant,
                                content: ProviderContent::ToolCall {
                                    tool_call_id: tool.call_id.clone(),
                                    function: sessiond_model::FunctionCall {
                                        name: tool.tool.clone(),
                                        arguments: tool.input.to_string(),
                                    },
                                },
                            });
                            let message = tool.error.as_ref().map(|e| e.message.clone()).unwrap_or_default();
                            out.push(ProviderMessage::tool_result(&tool.call_id, format!("error: {message}")));
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    out
}
