//! Planning Requests
//!
//! Parsing, canonicalization and fingerprinting of inbound planning requests.
//!
//! # Canonical Form
//!
//! Two requests that describe the same network must hash to the same
//! [`Fingerprint`], regardless of site order or JSON key order:
//!
//! - sites are sorted by id
//! - constraint objects are key-sorted at every depth (`serde_json::Map` is
//!   ordered)
//! - the canonical JSON bytes are hashed with SHA-256
//!
//! The size metric is computed by a pluggable [`SizeMetric`] strategy; the
//! default is the number of sites.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GatewayError;

/// Maximum length of a site identifier
pub const MAX_SITE_ID_LEN: usize = 128;

// ============================================================================
// Fingerprint
// ============================================================================

/// Deterministic content hash of a canonicalized planning request
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash canonical request bytes
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Parse a hex fingerprint (64 lowercase hex characters)
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_string()))
    }

    /// Hex representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Network Description
// ============================================================================

/// A site in the fiber network
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Site {
    /// Unique site identifier
    pub id: String,
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
    /// Site role (e.g. "central-office", "cabinet", "premise")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Bandwidth or fiber-count demand at this site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demand: Option<f64>,
}

/// Network to be planned: the set of sites plus planning constraints
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkDescription {
    /// Sites to connect
    pub sites: Vec<Site>,
    /// Free-form planning constraints, passed through to the tier
    #[serde(default)]
    pub constraints: serde_json::Map<String, serde_json::Value>,
}

impl NetworkDescription {
    /// Validate and put the description into canonical form
    fn canonicalize(mut self) -> Result<Self, GatewayError> {
        if self.sites.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "network must contain at least one site".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.sites.len());
        for site in &mut self.sites {
            let id = site.id.trim();
            if id.is_empty() || id.len() > MAX_SITE_ID_LEN {
                return Err(GatewayError::InvalidRequest(format!(
                    "site id must be 1-{MAX_SITE_ID_LEN} characters"
                )));
            }
            if !site.lat.is_finite() || !(-90.0..=90.0).contains(&site.lat) {
                return Err(GatewayError::InvalidRequest(format!(
                    "site {id}: latitude out of range"
                )));
            }
            if !site.lon.is_finite() || !(-180.0..=180.0).contains(&site.lon) {
                return Err(GatewayError::InvalidRequest(format!(
                    "site {id}: longitude out of range"
                )));
            }
            if site.demand.is_some_and(|d| !d.is_finite() || d < 0.0) {
                return Err(GatewayError::InvalidRequest(format!(
                    "site {id}: demand must be a non-negative number"
                )));
            }
            if !seen.insert(id.to_string()) {
                return Err(GatewayError::InvalidRequest(format!(
                    "duplicate site id: {id}"
                )));
            }
            site.id = id.to_string();
            // -0.0 and 0.0 serialize differently
            site.lat += 0.0;
            site.lon += 0.0;
        }

        self.sites.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(self)
    }
}

// ============================================================================
// Size Metric
// ============================================================================

/// Strategy mapping a network to the size metric used for tier selection
pub trait SizeMetric: Send + Sync {
    /// Compute the size of the network
    fn measure(&self, network: &NetworkDescription) -> usize;
}

/// Size is the number of sites
#[derive(Clone, Copy, Debug, Default)]
pub struct SiteCount;

impl SizeMetric for SiteCount {
    fn measure(&self, network: &NetworkDescription) -> usize {
        network.sites.len()
    }
}

impl<F> SizeMetric for F
where
    F: Fn(&NetworkDescription) -> usize + Send + Sync,
{
    fn measure(&self, network: &NetworkDescription) -> usize {
        self(network)
    }
}

// ============================================================================
// Planning Request
// ============================================================================

/// An immutable, canonicalized planning request
#[derive(Clone, Debug)]
pub struct PlanningRequest {
    /// Request ID for log correlation (not part of the fingerprint)
    pub request_id: String,
    network: Arc<NetworkDescription>,
    size: usize,
    fingerprint: Fingerprint,
}

impl PlanningRequest {
    /// Parse raw JSON bytes into a canonical request
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidRequest` if the body is not a valid
    /// network description.
    pub fn parse(raw: &[u8], metric: &dyn SizeMetric) -> Result<Self, GatewayError> {
        let network: NetworkDescription = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::InvalidRequest(format!("malformed network: {e}")))?;
        Self::from_network(network, metric)
    }

    /// Build a canonical request from an already-decoded network
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidRequest` if validation fails.
    pub fn from_network(
        network: NetworkDescription,
        metric: &dyn SizeMetric,
    ) -> Result<Self, GatewayError> {
        let network = network.canonicalize()?;
        let canonical = serde_json::to_vec(&network)
            .map_err(|e| GatewayError::Internal(format!("canonical encoding failed: {e}")))?;
        let size = metric.measure(&network);

        Ok(Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            fingerprint: Fingerprint::of_bytes(&canonical),
            network: Arc::new(network),
            size,
        })
    }

    /// Canonical network description
    #[must_use]
    pub fn network(&self) -> &NetworkDescription {
        &self.network
    }

    /// Size metric used for tier selection
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Content fingerprint
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

// ============================================================================
// Planning Result
// ============================================================================

/// Opaque payload returned by a planning tier
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanningResult(serde_json::Value);

impl PlanningResult {
    /// Wrap a JSON payload
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Borrow the payload
    #[must_use]
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Take the payload
    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        self.0
    }
}
