//! Fallback Chain Tracking
//!
//! Records the tiers attempted for one request, in order. The record is
//! diagnostic only: it is logged and returned to callers, never consulted by
//! later routing decisions beyond "has this tier been tried for *this*
//! request".
//!
//! ```text
//! Tier A (max 20) times out
//!         |
//!         v
//! Tier B (max 1000) succeeds
//!
//! attempts = [A: Timeout 5000ms, B: Success 812ms]
//! ```

use std::time::Duration;

use serde::Serialize;

use crate::backend::BackendError;
use crate::request::Fingerprint;

/// Outcome of one tier attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The tier returned a result within its deadline
    Success,
    /// The tier exceeded its deadline
    Timeout,
    /// The tier failed
    Error(String),
}

impl From<&BackendError> for AttemptOutcome {
    fn from(error: &BackendError) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Error(error.to_string())
        }
    }
}

/// A single tier attempt
#[derive(Clone, Debug, Serialize)]
pub struct DispatchAttempt {
    /// Tier that was tried
    pub tier_id: String,
    /// Time spent on this attempt
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// What happened
    pub outcome: AttemptOutcome,
}

/// Record of how one request was dispatched
#[derive(Clone, Debug, Serialize)]
pub struct DispatchDecision {
    /// Request ID
    pub request_id: String,
    /// Request fingerprint
    pub fingerprint: Fingerprint,
    /// Size metric used for routing
    pub size: usize,
    /// Attempts in order
    pub attempts: Vec<DispatchAttempt>,
    /// Total time across all attempts
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl DispatchDecision {
    /// Create an empty decision record
    pub fn new(request_id: impl Into<String>, fingerprint: Fingerprint, size: usize) -> Self {
        Self {
            request_id: request_id.into(),
            fingerprint,
            size,
            attempts: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Record an attempt
    pub fn record(&mut self, tier_id: impl Into<String>, elapsed: Duration, outcome: AttemptOutcome) {
        self.elapsed += elapsed;
        self.attempts.push(DispatchAttempt {
            tier_id: tier_id.into(),
            elapsed,
            outcome,
        });
    }

    /// Check if a tier has already been tried
    #[must_use]
    pub fn has_tried(&self, tier_id: &str) -> bool {
        self.attempts.iter().any(|a| a.tier_id == tier_id)
    }

    /// Tier that produced the result (the last successful attempt)
    #[must_use]
    pub fn served_by(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.outcome == AttemptOutcome::Success)
            .map(|a| a.tier_id.as_str())
    }

    /// Get the number of fallback attempts
    #[must_use]
    pub fn fallback_count(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }

    /// Tier ids in attempt order
    #[must_use]
    pub fn chain(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.tier_id.as_str()).collect()
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
