// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Incremental updates a [`crate::SessionService::process`] caller observes
//! as its turn streams in, distinct from the bus events C6 also publishes
//! for C7's benefit — this is the in-process callback, not the wire.
use sessiond_model::domain::{Part, TokenUsage};
use sessiond_model::error::CoreError;

/// One increment of an in-flight assistant turn.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// A part was created or had new content appended.
    PartUpdated(Part),
    /// The stream finished a round and is about to re-invoke the provider
    /// with a fresh tool result in hand.
    ToolRoundStarted { round: u32 },
    /// The turn completed normally.
    Completed { tokens: Option<TokenUsage> },
    /// The turn ended in error (provider error, cancellation, or budget
    /// exhaustion).
    Failed(CoreError),
}
