// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Error taxonomy shared across every component, per the core's error design.
///
/// Library crates return their own `thiserror` enums; each variant maps onto
/// one of these kinds at the boundary where an error crosses into a
/// `CoreError` destined for the (out-of-scope) HTTP envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad client input.
    Validation,
    /// Missing session/message/part/tool.
    NotFound,
    /// Storage `if-match` failure or session-busy.
    Conflict,
    /// Context cancellation.
    Cancelled,
    /// Upstream LLM failure.
    Provider,
    /// Tool execution failure.
    Tool,
    /// User denied or no response within timeout.
    Permission,
    /// I/O fault.
    Storage,
    /// Unanticipated bug.
    Internal,
}

impl ErrorKind {
    /// HTTP status class this kind maps to at the gateway boundary.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Permission => 403,
            ErrorKind::Cancelled => 499,
            ErrorKind::Provider | ErrorKind::Tool => 502,
            ErrorKind::Storage | ErrorKind::Internal => 500,
        }
    }

    /// Machine-readable error code used in the HTTP envelope's `code` field.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "INVALID_REQUEST",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Provider => "PROVIDER_ERROR",
            ErrorKind::Tool => "TOOL_ERROR",
            ErrorKind::Permission => "PERMISSION_DENIED",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// The error envelope surfaced to HTTP clients and captured on parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(ErrorKind::Validation.http_status(), 400);
    }

    #[test]
    fn cancelled_maps_to_499_not_5xx() {
        assert_eq!(ErrorKind::Cancelled.http_status(), 499);
    }

    #[test]
    fn core_error_display_includes_code() {
        let e = CoreError::new(ErrorKind::NotFound, "session missing");
        assert!(e.to_string().contains("NOT_FOUND"));
    }
}
