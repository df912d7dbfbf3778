//! Routing Configuration
//!
//! Tier definitions and dispatcher limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Tier
// ============================================================================

/// One backend planning server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tier {
    /// Unique tier identifier (e.g. "A")
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// What this tier is for
    pub description: String,

    /// Base URL of the planning server
    pub endpoint: String,

    /// Largest network (by size metric) this tier accepts
    pub max_sites: usize,

    /// Deadline for a single attempt on this tier
    pub timeout: Duration,

    /// Whether this tier may be selected
    pub enabled: bool,
}

impl Tier {
    /// Create an enabled tier
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        max_sites: usize,
        timeout: Duration,
    ) -> Self {
        let id = id.into();
        Self {
            name: format!("Planning Server {id}"),
            description: String::new(),
            id,
            endpoint: endpoint.into(),
            max_sites,
            timeout,
            enabled: true,
        }
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the enabled flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether a network of this size fits
    #[must_use]
    pub fn accepts(&self, size: usize) -> bool {
        size <= self.max_sites
    }

    /// Fast, always-on tier for simple networks
    #[must_use]
    pub fn default_fast(endpoint: impl Into<String>) -> Self {
        Self::new("A", endpoint, 20, Duration::from_secs(5))
            .with_name("Planning Server A")
            .with_description("Fast, always-on planning server for simple networks")
    }

    /// High-capacity tier for complex networks
    #[must_use]
    pub fn default_high_capacity(endpoint: impl Into<String>) -> Self {
        Self::new("B", endpoint, 1000, Duration::from_secs(600))
            .with_name("Planning Server B")
            .with_description("High-capacity planning server for complex networks")
    }
}

/// Summary of a tier for status reporting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TierSummary {
    /// Tier identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Maximum network size
    pub max_sites: usize,
    /// Attempt deadline in seconds
    pub timeout_seconds: f64,
    /// Whether the tier may be selected
    pub enabled: bool,
}

impl From<&Tier> for TierSummary {
    fn from(tier: &Tier) -> Self {
        Self {
            id: tier.id.clone(),
            name: tier.name.clone(),
            max_sites: tier.max_sites,
            timeout_seconds: tier.timeout.as_secs_f64(),
            enabled: tier.enabled,
        }
    }
}

// ============================================================================
// Dispatcher Limits
// ============================================================================

/// Dispatcher concurrency limits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Maximum simultaneous dispatches across all tiers
    pub max_concurrent: usize,

    /// How long a dispatch may wait for capacity before `Overloaded`
    pub queue_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            queue_timeout: Duration::from_secs(5),
        }
    }
}
