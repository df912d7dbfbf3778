//! Gateway Errors
//!
//! Terminal failures surfaced to callers. Each variant maps to a stable
//! [`ErrorKind`] so the HTTP surface can pick a status code without matching
//! on message text.

use thiserror::Error;

use crate::routing::DispatchError;

/// Stable error kinds exposed to callers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or unparseable input (terminal, not retried)
    InvalidRequest,
    /// The only eligible tier exceeded its deadline
    Timeout,
    /// No tier could complete the request
    AllTiersExhausted,
    /// No dispatch capacity available
    Overloaded,
    /// Unexpected failure inside the gateway
    Internal,
}

impl ErrorKind {
    /// Wire name of this kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::Timeout => "Timeout",
            Self::AllTiersExhausted => "AllTiersExhausted",
            Self::Overloaded => "Overloaded",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the gateway service
///
/// `Clone` because a single outcome is broadcast to every caller waiting on
/// the same fingerprint.
#[derive(Clone, Debug, Error)]
pub enum GatewayError {
    /// Request could not be parsed or failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Dispatch failed after the fallback chain was exhausted
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The computing caller went away without publishing an outcome
    #[error("Computation for fingerprint {0} was abandoned")]
    Abandoned(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Dispatch(DispatchError::Timeout { .. }) => ErrorKind::Timeout,
            Self::Dispatch(DispatchError::AllTiersExhausted { .. }) => {
                ErrorKind::AllTiersExhausted
            }
            Self::Dispatch(DispatchError::Overloaded { .. }) => ErrorKind::Overloaded,
            Self::Abandoned(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a caller may usefully retry the same request later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::InvalidRequest)
    }
}
