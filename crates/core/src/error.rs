//! Error model shared by the auth and security crates.

use thiserror::Error;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation of identifiers,
/// roles and permission names). Remote failures are a [`RemoteError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. empty subject id).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// A call to an external collaborator (BaaS, risk scoring, geo lookup) failed.
///
/// Every variant carries a human-readable message; callers that only need to
/// log the failure can use [`RemoteError::message`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// The collaborator rejected our credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The collaborator answered with a non-success status.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn server(status: u16, msg: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Network(m) | Self::Unauthorized(m) | Self::Decode(m) => m,
            Self::Server { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_exposes_message() {
        let err = RemoteError::server(503, "maintenance");
        assert_eq!(err.message(), "maintenance");
        assert_eq!(err.to_string(), "server error (503): maintenance");
    }
}
