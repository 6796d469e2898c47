// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The LLM orchestration loop (§A.4.6 step 3 onward): stream a completion,
//! run any tool calls it asks for, and re-invoke until the model stops
//! asking or the round budget runs out.
use futures::StreamExt;
use sessiond_bus::{Event, Topic};
use sessiond_model::domain::{new_id, ErrorPart, Message, ModelRef, Part, StepMarkerPart, TextPart, TokenUsage, ToolPart};
use sessiond_model::error::{CoreError, ErrorKind};
use sessiond_model::{CompletionRequest, ResponseEvent, StopReason, ToolSchema as WireToolSchema, Usage};
use sessiond_tools::{ApprovalPolicy, ToolCall};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::events::SessionUpdate;
use crate::history;
use crate::prompt::{build_system_prompt, PromptContext};
use crate::service::SessionService;

/// Tool-loop round budget exceeded without the model reaching a final turn.
const TOOL_LOOP_EXCEEDED: &str = "tool-loop-exceeded";
const CANCELLED: &str = "cancelled";

fn to_wire_usage(usage: &Usage) -> TokenUsage {
    TokenUsage {
        input: usage.input_tokens,
        output: usage.output_tokens,
        cache_read: usage.cache_read_tokens,
        cache_write: usage.cache_write_tokens,
    }
}

impl SessionService {
    /// Run one user turn to completion: append `content` as a user message,
    /// then stream the model's reply, executing any tool calls it makes,
    /// until it produces a final answer, errors, is cancelled, or the tool
    /// round budget is exhausted.
    ///
    /// `on_update` is called synchronously for every part that changes and
    /// at loop boundaries; it never blocks the loop on I/O of its own.
    pub async fn process(
        &self,
        session_id: &str,
        content: &str,
        model_ref: ModelRef,
        prompt_ctx: PromptContext,
        mut on_update: impl FnMut(SessionUpdate) + Send,
    ) -> Result<(Message, Vec<Part>), CoreError> {
        let cancel = self.begin_turn(session_id)?;
        let result = self.run_turn(session_id, content, model_ref, &prompt_ctx, &cancel, &mut on_update).await;
        self.end_turn(session_id);
        result
    }

    async fn run_turn(
        &self,
        session_id: &str,
        content: &str,
        model_ref: ModelRef,
        prompt_ctx: &PromptContext,
        cancel: &CancellationToken,
        on_update: &mut impl FnMut(SessionUpdate),
    ) -> Result<(Message, Vec<Part>), CoreError> {
        let mut session = self.get(session_id).await?;
        self.add_message(session_id, content).await?;

        let mut message = Message::new_assistant(session_id, model_ref.clone());
        self.persist_message(&message).await?;
        self.bus.publish(Event::new(
            Topic::MessageCreated,
            serde_json::json!({ "session_id": session_id, "id": message.id }),
        ));

        // A send after a revert logically replaces the reverted tail: bump
        // the pointer past both messages just written (`apply_revert`'s
        // cutoff is inclusive, so the bump target itself must sort after
        // them) instead of leaving the new user/assistant turn truncated
        // away by `effective_history`. A no-op when there is no active
        // revert.
        if session.revert_pointer.is_some() {
            session.bump_revert_pointer(new_id());
            self.persist_session(&session).await?;
        }

        let provider = match self.resolve_provider(&model_ref.provider_id) {
            Ok(p) => p,
            Err(e) => return self.fail_turn(session_id, message, e, on_update).await,
        };

        let mut parts: Vec<Part> = Vec::new();
        let mut current_text: Option<TextPart> = None;
        let mut round: u32 = 0;

        let outcome = loop {
            if cancel.is_cancelled() {
                break TurnOutcome::Cancelled;
            }
            if round >= self.max_tool_rounds {
                break TurnOutcome::Error(CoreError::new(
                    ErrorKind::Tool,
                    format!("exceeded {} tool rounds", self.max_tool_rounds),
                )
                .with_details(serde_json::json!({ "kind": TOOL_LOOP_EXCEEDED })));
            }
            round += 1;
            on_update(SessionUpdate::ToolRoundStarted { round });

            let history = self.effective_history(session_id, &session).await?;
            let system_prompt = build_system_prompt(&session.project_directory, prompt_ctx);
            let mut messages = vec![sessiond_model::ProviderMessage::system(system_prompt)];
            messages.extend(history);

            let req = CompletionRequest {
                model_id: model_ref.model_id.clone(),
                messages,
                tools: self.wire_tool_schemas(),
                stream: true,
                cache_key: Some(session_id.to_string()),
                ..Default::default()
            };

            let mut stream = match provider.complete(cancel.clone(), req).await {
                Ok(s) => s,
                Err(e) => break TurnOutcome::Error(CoreError::new(ErrorKind::Provider, e.to_string())),
            };

            let mut tool_called_this_round = false;
            let mut round_outcome = None;

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => {
                        round_outcome = Some(TurnOutcome::Cancelled);
                        break;
                    }
                    next = stream.next() => next,
                };
                let Some(event) = event else { break };
                let event = match event {
                    Ok(e) => e,
                    Err(e) => {
                        round_outcome = Some(TurnOutcome::Error(CoreError::new(ErrorKind::Provider, e.to_string())));
                        break;
                    }
                };

                match event {
                    ResponseEvent::TextChunk(delta) => {
                        let part = current_text.get_or_insert_with(|| TextPart {
                            id: new_id(),
                            message_id: message.id.clone(),
                            session_id: session_id.to_string(),
                            text: String::new(),
                        });
                        part.text.push_str(&delta);
                        self.persist_part(session_id, &Part::Text(part.clone())).await?;
                        on_update(SessionUpdate::PartUpdated(Part::Text(part.clone())));
                    }
                    ResponseEvent::ThinkingDelta(_) => {}
                    ResponseEvent::ToolCall { call_id, tool, arguments, .. } => {
                        if let Some(text) = current_text.take() {
                            parts.push(Part::Text(text));
                        }
                        let input: serde_json::Value =
                            serde_json::from_str(&arguments).unwrap_or(serde_json::Value::Null);
                        let mut tool_part =
                            ToolPart::new_pending(message.id.as_str(), session_id, tool.as_str(), call_id.as_str(), input.clone());
                        self.persist_part(session_id, &Part::Tool(tool_part.clone())).await?;
                        on_update(SessionUpdate::PartUpdated(Part::Tool(tool_part.clone())));

                        self.run_tool_call(session_id, &tool, &call_id, input, cancel, &mut tool_part).await;
                        self.persist_part(session_id, &Part::Tool(tool_part.clone())).await?;
                        on_update(SessionUpdate::PartUpdated(Part::Tool(tool_part.clone())));
                        parts.push(Part::Tool(tool_part));
                        tool_called_this_round = true;
                    }
                    ResponseEvent::StepStart => {
                        let marker = StepMarkerPart { id: new_id(), message_id: message.id.clone(), session_id: session_id.to_string() };
                        self.persist_part(session_id, &Part::StepStart(marker.clone())).await?;
                        parts.push(Part::StepStart(marker));
                    }
                    ResponseEvent::StepFinish => {
                        let marker = StepMarkerPart { id: new_id(), message_id: message.id.clone(), session_id: session_id.to_string() };
                        self.persist_part(session_id, &Part::StepFinish(marker.clone())).await?;
                        parts.push(Part::StepFinish(marker));
                    }
                    ResponseEvent::Finish { stop_reason, usage } => {
                        if let Some(text) = current_text.take() {
                            parts.push(Part::Text(text));
                        }
                        if stop_reason == StopReason::ToolUse && tool_called_this_round {
                            round_outcome = Some(TurnOutcome::Continue);
                        } else {
                            round_outcome = Some(TurnOutcome::Finished(to_wire_usage(&usage)));
                        }
                    }
                    ResponseEvent::Error { kind, message: msg } => {
                        round_outcome = Some(TurnOutcome::Error(
                            CoreError::new(ErrorKind::Provider, msg).with_details(serde_json::json!({ "kind": kind })),
                        ));
                    }
                }

                if round_outcome.is_some() {
                    break;
                }
            }

            match round_outcome {
                Some(TurnOutcome::Continue) => continue,
                Some(other) => break other,
                None => break TurnOutcome::Error(CoreError::new(ErrorKind::Provider, "stream ended with no terminal event")),
            }
        };

        match outcome {
            TurnOutcome::Finished(usage) => {
                message.complete(Some(usage), None);
                self.persist_message(&message).await?;
                self.bus.publish(Event::new(
                    Topic::MessageUpdated,
                    serde_json::json!({ "session_id": session_id, "id": message.id }),
                ));
                self.bus.publish(Event::new(Topic::SessionIdle, serde_json::json!({ "id": session_id })));
                on_update(SessionUpdate::Completed { tokens: message.tokens });
                info!(session_id, message_id = %message.id, "turn completed");
                Ok((message, parts))
            }
            TurnOutcome::Cancelled => {
                if let Some(text) = current_text.take() {
                    parts.push(Part::Text(text));
                }
                let err = CoreError::new(ErrorKind::Cancelled, "turn cancelled")
                    .with_details(serde_json::json!({ "kind": CANCELLED }));
                self.seal_with_error(session_id, &mut message, &err).await?;
                on_update(SessionUpdate::Failed(err.clone()));
                Err(err)
            }
            TurnOutcome::Error(err) => {
                self.seal_with_error(session_id, &mut message, &err).await?;
                on_update(SessionUpdate::Failed(err.clone()));
                error!(session_id, message_id = %message.id, error = %err, "turn failed");
                Ok((message, parts))
            }
            TurnOutcome::Continue => unreachable!("loop must not break with Continue"),
        }
    }

    async fn fail_turn(
        &self,
        session_id: &str,
        mut message: Message,
        err: CoreError,
        on_update: &mut impl FnMut(SessionUpdate),
    ) -> Result<(Message, Vec<Part>), CoreError> {
        self.seal_with_error(session_id, &mut message, &err).await?;
        on_update(SessionUpdate::Failed(err.clone()));
        Ok((message, Vec::new()))
    }

    async fn seal_with_error(&self, session_id: &str, message: &mut Message, err: &CoreError) -> Result<(), CoreError> {
        message.complete(None, Some(err.clone()));
        self.persist_message(message).await?;
        let error_part = ErrorPart { id: new_id(), message_id: message.id.clone(), session_id: session_id.to_string(), error: err.clone() };
        self.persist_part(session_id, &Part::Error(error_part)).await?;
        self.bus.publish(Event::new(
            Topic::SessionError,
            serde_json::json!({ "id": session_id, "message": err.message }),
        ));
        Ok(())
    }

    async fn effective_history(
        &self,
        session_id: &str,
        session: &sessiond_model::domain::Session,
    ) -> Result<Vec<sessiond_model::ProviderMessage>, CoreError> {
        let loaded = self.load_messages(session_id).await?;
        let visible = history::apply_revert(session, &loaded);
        Ok(history::flatten(visible))
    }

    fn wire_tool_schemas(&self) -> Vec<WireToolSchema> {
        self.tools
            .schemas()
            .into_iter()
            .map(|s| WireToolSchema { name: s.name, description: s.description, parameters: s.parameters })
            .collect()
    }

    /// Resolve the approval policy for a call and either run it directly or
    /// suspend on a permission request; always leaves `tool_part` terminal.
    async fn run_tool_call(
        &self,
        session_id: &str,
        tool: &str,
        call_id: &str,
        input: serde_json::Value,
        cancel: &CancellationToken,
        tool_part: &mut ToolPart,
    ) {
        let Some(handle) = self.tools.get(tool) else {
            let _ = tool_part.resolve_err(CoreError::new(ErrorKind::Tool, format!("unknown tool: {tool}")));
            return;
        };

        let policy = handle.default_policy();
        let granted = match policy {
            ApprovalPolicy::Auto => true,
            ApprovalPolicy::Deny => false,
            ApprovalPolicy::Ask => {
                match self.permission.request(cancel, session_id, tool, call_id, &input.to_string()).await {
                    Ok(sessiond_model::domain::PermissionState::AllowedOnce)
                    | Ok(sessiond_model::domain::PermissionState::AllowedAlways) => true,
                    Ok(_) => false,
                    Err(e) => {
                        let _ = tool_part.resolve_err(e);
                        return;
                    }
                }
            }
        };

        if !granted {
            let _ = tool_part.resolve_err(CoreError::new(ErrorKind::Permission, "tool call denied"));
            return;
        }

        if cancel.is_cancelled() {
            let _ = tool_part.resolve_err(CoreError::new(ErrorKind::Cancelled, "cancelled before tool ran"));
            return;
        }

        let call = ToolCall { call_id: call_id.to_string(), tool: tool.to_string(), input };
        let output = self.tools.execute(cancel.clone(), &call).await;
        if output.is_error {
            let _ = tool_part.resolve_err(CoreError::new(ErrorKind::Tool, output.content));
        } else {
            let _ = tool_part.resolve_ok(serde_json::Value::String(output.content));
        }
    }
}

enum TurnOutcome {
    Continue,
    Finished(TokenUsage),
    Error(CoreError),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::SessionService;
    use sessiond_bus::EventBus;
    use sessiond_model::mock::ScriptedMockProvider;
    use sessiond_permission::PermissionArbiter;
    use sessiond_storage::Store;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn service() -> (TempDir, SessionService) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());
        let bus = EventBus::new();
        let tools = Arc::new(sessiond_tools::builtin_registry(sessiond_tools::builtin::todo::TodoState::new("s")));
        let permission = PermissionArbiter::new(store.clone(), bus.clone());
        (dir, SessionService::new(store, bus, tools, permission))
    }

    #[tokio::test]
    async fn process_without_a_registered_provider_seals_an_error() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/proj", None).await.unwrap();
        let model_ref = ModelRef { provider_id: "nope".into(), model_id: "m".into() };
        let (message, _parts) = svc.process(&session.id, "hi", model_ref, PromptContext::default(), |_| {}).await.unwrap();
        assert!(message.error.is_some());
        assert_eq!(message.error.unwrap().kind, ErrorKind::Provider);
    }

    #[tokio::test]
    async fn process_with_a_scripted_provider_completes_with_text() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/proj", None).await.unwrap();
        let provider = ScriptedMockProvider::new(vec![vec![
            ResponseEvent::TextChunk("hello there".into()),
            ResponseEvent::Finish { stop_reason: StopReason::EndTurn, usage: Usage::default() },
        ]]);
        svc.register_provider("mock", Arc::new(provider));
        let model_ref = ModelRef { provider_id: "mock".into(), model_id: "mock-model".into() };

        let mut updates = Vec::new();
        let (message, parts) = svc
            .process(&session.id, "hi", model_ref, PromptContext::default(), |u| updates.push(format!("{u:?}")))
            .await
            .unwrap();

        assert!(message.is_completed());
        assert!(message.error.is_none());
        assert_eq!(parts.len(), 1);
        assert!(matches!(&parts[0], Part::Text(t) if t.text == "hello there"));
    }

    #[tokio::test]
    async fn resending_after_a_revert_reaches_the_provider() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/proj", None).await.unwrap();
        let model_ref = ModelRef { provider_id: "mock".into(), model_id: "mock-model".into() };

        let first = ScriptedMockProvider::new(vec![vec![
            ResponseEvent::TextChunk("original reply".into()),
            ResponseEvent::Finish { stop_reason: StopReason::EndTurn, usage: Usage::default() },
        ]]);
        svc.register_provider("mock", Arc::new(first));
        let (first_message, _) = svc.process(&session.id, "original", model_ref.clone(), PromptContext::default(), |_| {}).await.unwrap();

        svc.revert(&session.id, &first_message.id, None).await.unwrap();
        assert!(svc.get(&session.id).await.unwrap().revert_pointer.is_some());

        let second = ScriptedMockProvider::new(vec![vec![
            ResponseEvent::TextChunk("edited reply".into()),
            ResponseEvent::Finish { stop_reason: StopReason::EndTurn, usage: Usage::default() },
        ]]);
        let last_request = second.last_request.clone();
        svc.register_provider("mock", Arc::new(second));

        let (message, parts) = svc.process(&session.id, "edited prompt", model_ref, PromptContext::default(), |_| {}).await.unwrap();

        assert!(message.is_completed());
        assert!(matches!(&parts[0], Part::Text(t) if t.text == "edited reply"));

        let sent = last_request.lock().unwrap().clone().expect("provider must have been invoked");
        let has_new_prompt = sent
            .messages
            .iter()
            .any(|m| matches!(&m.content, sessiond_model::ProviderContent::Text(t) if t.contains("edited prompt")));
        assert!(has_new_prompt, "revert+resend must still reach the provider with the new prompt: {sent:?}");

        assert!(svc.get(&session.id).await.unwrap().revert_pointer.is_some());
    }

    #[tokio::test]
    async fn a_second_process_call_on_a_busy_session_is_rejected() {
        let (_dir, svc) = service();
        let session = svc.create("/tmp/proj", None).await.unwrap();
        let _token = svc.begin_turn(&session.id).unwrap();
        let model_ref = ModelRef { provider_id: "mock".into(), model_id: "m".into() };
        let err = svc.process(&session.id, "hi", model_ref, PromptContext::default(), |_| {}).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }
}
