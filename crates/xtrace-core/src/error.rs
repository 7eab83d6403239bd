// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the X-Trace core.
//!
//! None of these are fatal to the host process. Malformed identifiers degrade to
//! "no context", a mismatched task id leaves the local context untouched and an
//! unmatched exit resets the context, so callers mostly log them and move on.

use crate::xtrace::TaskId;

/// Errors raised by the tracing core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid X-Trace: {0}")]
    InvalidXTrace(&'static str),

    #[error("Mismatched task id: local {local}, remote {remote}")]
    MismatchedTaskId { local: TaskId, remote: TaskId },

    #[error("Context exit without a matching entry")]
    ContextUnderflow,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed event at line {line}: {message}")]
    MalformedEvent { line: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::InvalidXTrace("bad length");
        assert_eq!(error.to_string(), "Invalid X-Trace: bad length");

        let error = Error::MalformedEvent {
            line: 3,
            message: "expected value".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Malformed event at line 3: expected value"
        );
    }

    #[test]
    fn test_mismatched_task_id_display() {
        let local = TaskId::from_bytes([0x11; 20]);
        let remote = TaskId::from_bytes([0x22; 20]);
        let error = Error::MismatchedTaskId { local, remote };
        let rendered = error.to_string();
        assert!(rendered.contains(&"11".repeat(20)));
        assert!(rendered.contains(&"22".repeat(20)));
    }
}
