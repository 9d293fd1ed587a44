// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the deskbridge workspace.

use thiserror::Error;

/// The error type shared by every deskbridge crate.
///
/// Variants map onto the failure taxonomy the pipeline acts on:
/// transient failures are retried through the queue, not-found failures
/// invalidate cached references, validation failures are counted as skips,
/// and configuration failures abort an operation before any write.
#[derive(Debug, Error)]
pub enum DeskbridgeError {
    /// Invalid or missing configuration (missing helpdesk database, bad inbox).
    #[error("configuration error: {0}")]
    Config(String),

    /// Local or helpdesk database failure.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Helpdesk REST API failure. `status` is the HTTP status when one was received.
    #[error("helpdesk error: {message}")]
    Helpdesk {
        message: String,
        status: Option<u16>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Chat protocol client failure.
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A referenced helpdesk or mirror record no longer exists.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Input that can never succeed (unresolvable identifier, excluded chat kind).
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// The operation observed the shutdown signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Envelope or payload (de)serialization failure.
    #[error("codec error: {source}")]
    Codec {
        #[from]
        source: serde_json::Error,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeskbridgeError {
    /// Shorthand for a helpdesk error without an HTTP status or source.
    pub fn helpdesk(message: impl Into<String>) -> Self {
        Self::Helpdesk {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Shorthand for a protocol error without a source.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a not-found error.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// The referenced record was deleted out-of-band.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Helpdesk {
                    status: Some(404),
                    ..
                }
        )
    }

    /// Worth another delivery attempt: network/database hiccups, rate limits, timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage { .. } | Self::Timeout { .. } | Self::Protocol { .. } => true,
            Self::Helpdesk { status, .. } => match status {
                None => true,
                Some(code) => *code == 408 || *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }

    /// Misconfiguration that must abort an operation before it writes anything.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpdesk_404_counts_as_not_found() {
        let err = DeskbridgeError::Helpdesk {
            message: "contact gone".into(),
            status: Some(404),
            source: None,
        };
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        for code in [429u16, 500, 502, 503] {
            let err = DeskbridgeError::Helpdesk {
                message: "busy".into(),
                status: Some(code),
                source: None,
            };
            assert!(err.is_transient(), "{code} should be transient");
        }
        let bad_request = DeskbridgeError::Helpdesk {
            message: "bad".into(),
            status: Some(422),
            source: None,
        };
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn validation_is_neither_transient_nor_fatal() {
        let err = DeskbridgeError::Validation("no phone".into());
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
        assert!(DeskbridgeError::Config("missing db".into()).is_fatal());
    }

    #[test]
    fn not_found_display_names_entity() {
        let err = DeskbridgeError::not_found("contact", 42);
        assert_eq!(err.to_string(), "contact not found: 42");
    }
}
