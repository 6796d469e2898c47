// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Storage-layer errors. Retryable I/O faults are distinguished from
/// programmer-visible conditions (`NotFound`, `Conflict`) so callers can
/// decide whether a retry-with-backoff is worth attempting.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("if-match mismatch on {key}: expected {expected}, found {actual}")]
    Conflict { key: String, expected: String, actual: String },

    #[error("I/O error on {key}: {source}")]
    Io { key: String, #[source] source: std::io::Error },
}

impl StorageError {
    /// Whether a retry-with-backoff is worthwhile for this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            StorageError::NotFound { .. } | StorageError::Conflict { .. } => false,
        }
    }
}
