//! Planning Backend Traits
//!
//! Trait definitions for planning tiers. This abstraction lets the
//! dispatcher route to any planning server (HTTP today, in-process fakes in
//! tests) without changing routing logic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::{PlanningRequest, PlanningResult};

/// Failure of a single tier attempt
///
/// Every variant triggers fallback to the next tier.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The attempt exceeded the tier's deadline
    #[error("Tier {tier} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// Tier that timed out
        tier: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// The tier could not be reached
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The tier answered with a non-success status
    #[error("Tier returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// The tier answered with a body that is not a planning result
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No backend is registered for the tier
    #[error("No backend registered for tier {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether this failure was a deadline expiry
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Health report from a planning tier
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TierHealth {
    /// Whether the tier answered its health probe
    pub healthy: bool,
    /// Advertised maximum site count (if reported)
    pub max_sites: Option<usize>,
    /// Advertised timeout budget in seconds (if reported)
    pub timeout_seconds: Option<u64>,
}

/// Planning backend trait
///
/// Implement this trait to add support for a planning server transport.
#[async_trait]
pub trait PlanningBackend: Send + Sync {
    /// Backend name for logs (e.g. the tier id)
    fn name(&self) -> &str;

    /// Probe the tier
    async fn health_check(&self) -> TierHealth;

    /// Submit a request and wait for the result
    ///
    /// `deadline` is the tier's timeout budget. The dispatcher enforces it
    /// independently; implementations should also apply it to their
    /// transport so abandoned calls do not linger.
    async fn plan(
        &self,
        request: &PlanningRequest,
        deadline: Duration,
    ) -> Result<PlanningResult, BackendError>;
}

/// Backends keyed by tier id
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: HashMap<String, Arc<dyn PlanningBackend>>,
}

impl BackendSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend for a tier
    #[must_use]
    pub fn with(mut self, tier_id: impl Into<String>, backend: Arc<dyn PlanningBackend>) -> Self {
        self.insert(tier_id, backend);
        self
    }

    /// Register a backend for a tier, replacing any previous one
    pub fn insert(&mut self, tier_id: impl Into<String>, backend: Arc<dyn PlanningBackend>) {
        self.backends.insert(tier_id.into(), backend);
    }

    /// Look up the backend for a tier
    #[must_use]
    pub fn get(&self, tier_id: &str) -> Option<Arc<dyn PlanningBackend>> {
        self.backends.get(tier_id).cloned()
    }

    /// Registered tier ids
    pub fn tier_ids(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Number of registered backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no backends are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.tier_ids().collect();
        ids.sort_unstable();
        f.debug_struct("BackendSet").field("tiers", &ids).finish()
    }
}
